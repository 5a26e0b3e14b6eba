//! The runtime's universal datum.
//!
//! A [`Value`] is a small tagged record. Immediate variants carry their
//! payload inline; `Chars` and `Object` refer into the pool; `Reference`
//! designates an object slot and only ever flows between the reference-
//! producing ops and the assignment ops that consume them. Object
//! sub-kinds (function, error, date, …) are not value tags — they live on
//! the heap object as [`crate::object::ObjectKind`].

use crate::{
    chars::{self, Append, ScanFlags},
    context::Context,
    engine::Engine,
    heap::HeapId,
    interp,
    key::Key,
    object::ObjectKind,
    text::Text,
    Run,
};

bitflags::bitflags! {
    /// Property attribute flags, stored on object slots and used as lookup
    /// masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct PropFlags: u8 {
        const READONLY = 0x01;
        /// Non-enumerable.
        const HIDDEN = 0x02;
        /// Non-configurable.
        const SEALED = 0x04;
        const GETTER = 0x08;
        const SETTER = 0x10;
        /// Lookup mask: do not walk the prototype chain.
        const AS_OWN = 0x20;
        /// Lookup mask: accept accessor slots as data.
        const AS_DATA = 0x40;

        const FROZEN = Self::READONLY.bits() | Self::SEALED.bits();
        const ACCESSOR = Self::GETTER.bits() | Self::SETTER.bits();
    }
}

/// A computed string short enough to live inline in the value.
#[derive(Debug, Clone, Copy)]
pub struct InlineBuffer {
    bytes: [u8; 7],
    len: u8,
}

impl InlineBuffer {
    pub(crate) fn try_from_str(s: &str) -> Option<Self> {
        if s.len() > 7 {
            return None;
        }
        let mut bytes = [0u8; 7];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Some(Self { bytes, len: s.len() as u8 })
    }

    pub(crate) fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).expect("inline buffer holds utf-8")
    }
}

/// Which storage half of an object a reference points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Place {
    Slot(u16),
    Element(u32),
}

/// A pointer to a value occupying an object slot; produced by the
/// `*Ref` ops and consumed by assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub(crate) owner: HeapId,
    pub(crate) place: Place,
}

#[derive(Debug, Clone, Copy)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Integer(i32),
    Binary(f64),
    /// An interned property name used as a string (e.g. `for-in` keys).
    Key(#[doc(hidden)] Key),
    /// A string view into static storage or a registered input.
    Text(#[doc(hidden)] Text),
    /// A short computed string stored inline.
    Buffer(#[doc(hidden)] InlineBuffer),
    /// A pool-resident computed string.
    Chars(#[doc(hidden)] HeapId),
    /// Any heap object, functions included.
    Object(#[doc(hidden)] HeapId),
    /// An object-slot locator; never observable from script.
    Reference(#[doc(hidden)] SlotRef),
}

/// Hint passed to `ToPrimitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Auto,
    String,
    Number,
}

impl Value {
    pub(crate) fn is_primitive(&self) -> bool {
        !matches!(self, Value::Object(_) | Value::Reference(_))
    }

    pub(crate) fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub(crate) fn is_boolean(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub(crate) fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Binary(_))
    }

    pub(crate) fn is_string(&self) -> bool {
        matches!(self, Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_))
    }

    /// Values the pool tracks (and pins must cover).
    pub(crate) fn is_dynamic(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Chars(_))
    }

    pub(crate) fn is_true(&self, vm: &Engine) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Bool(false) => false,
            Value::Bool(true) | Value::Object(_) => true,
            Value::Integer(i) => *i != 0,
            Value::Binary(b) => !b.is_nan() && *b != 0.0,
            Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_) => {
                !string_slice(vm, self).is_empty()
            }
            Value::Reference(_) => panic!("references have no truth value"),
        }
    }

    pub(crate) fn object_id(&self) -> Option<HeapId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

/// Resolves the bytes of any string-carrying value. Panics on non-string
/// variants; callers coerce first.
pub(crate) fn string_slice<'a>(vm: &'a Engine, value: &'a Value) -> &'a str {
    match value {
        Value::Key(key) => vm.keys.text_of(*key),
        Value::Text(text) => text.slice(&vm.inputs),
        Value::Buffer(buffer) => buffer.as_str(),
        Value::Chars(id) => &vm.heap.chars(*id).bytes,
        other => panic!("not a string value: {other:?}"),
    }
}

pub(crate) fn string_length(vm: &Engine, value: &Value) -> usize {
    crate::text::utf16_length(string_slice(vm, value))
}

/// The `typeof` spelling for a value.
pub(crate) fn type_of(vm: &Engine, value: &Value) -> Text {
    match value {
        Value::Undefined => Text::UNDEFINED,
        Value::Null => Text::OBJECT,
        Value::Bool(_) => Text::BOOLEAN,
        Value::Integer(_) | Value::Binary(_) => Text::NUMBER,
        Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_) => Text::STRING,
        Value::Object(id) => match vm.heap.object(*id).kind {
            ObjectKind::Function(_) => Text::FUNCTION,
            _ => Text::OBJECT,
        },
        Value::Reference(_) => panic!("references have no type"),
    }
}

// --- coercions -------------------------------------------------------------

/// ES5 ToPrimitive. Identity on primitives; objects try `valueOf` /
/// `toString` in hint order and fail with a TypeError when neither yields
/// a primitive.
pub(crate) fn to_primitive(cx: &mut Context<'_>, vm: &mut Engine, value: Value, hint: Hint) -> Run<Value> {
    let Value::Object(id) = value else {
        return Ok(value);
    };

    let hint = match hint {
        Hint::Auto => {
            if matches!(vm.heap.object(id).kind, ObjectKind::Date(_)) {
                Hint::String
            } else {
                Hint::Number
            }
        }
        other => other,
    };
    let keys: [Key; 2] = if hint == Hint::String {
        [Key::TO_STRING, Key::VALUE_OF]
    } else {
        [Key::VALUE_OF, Key::TO_STRING]
    };

    for key in keys {
        let method = vm.get_member(cx, id, key)?;
        if matches!(&method, Value::Object(fid) if matches!(vm.heap.object(*fid).kind, ObjectKind::Function(_))) {
            let result = interp::call_function_value(cx, vm, method, value, &[], false)?;
            if result.is_primitive() {
                return Ok(result);
            }
        }
    }
    Err(cx.type_error(vm, "cannot convert value to primitive".to_owned()))
}

/// ES5 ToNumber.
pub(crate) fn to_binary(cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<f64> {
    match value {
        Value::Object(_) => {
            let primitive = to_primitive(cx, vm, value, Hint::Number)?;
            to_binary(cx, vm, primitive)
        }
        other => Ok(primitive_to_binary(vm, &other)),
    }
}

/// ToNumber restricted to primitives; no script can run.
pub(crate) fn primitive_to_binary(vm: &Engine, value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null | Value::Bool(false) => 0.0,
        Value::Bool(true) => 1.0,
        Value::Integer(i) => f64::from(*i),
        Value::Binary(b) => *b,
        Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_) => {
            let bytes = string_slice(vm, value);
            let trimmed = bytes.trim_matches(crate::text::is_space);
            if trimmed.is_empty() {
                0.0
            } else {
                chars::scan_binary(trimmed, ScanFlags::empty())
            }
        }
        Value::Object(_) | Value::Reference(_) => panic!("primitive_to_binary on a dynamic value"),
    }
}

/// ES5 ToInteger, saturating: NaN maps to 0, infinities clamp to the i32
/// range, everything else truncates toward zero.
pub(crate) fn binary_to_integer(binary: f64) -> i32 {
    if binary.is_nan() {
        0
    } else if binary >= f64::from(i32::MAX) {
        i32::MAX
    } else if binary <= f64::from(i32::MIN) {
        i32::MIN
    } else {
        binary.trunc() as i32
    }
}

pub(crate) fn to_integer(cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<i32> {
    Ok(binary_to_integer(to_binary(cx, vm, value)?))
}

/// ES5 ToString, producing a string-carrying value.
pub(crate) fn to_string(cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<Value> {
    match value {
        Value::Undefined => Ok(Value::Text(Text::UNDEFINED)),
        Value::Null => Ok(Value::Text(Text::NULL)),
        Value::Bool(true) => Ok(Value::Text(Text::TRUE)),
        Value::Bool(false) => Ok(Value::Text(Text::FALSE)),
        Value::Integer(i) => Ok(chars::string_value(&mut vm.heap, chars::binary_to_string(f64::from(i), 10))),
        Value::Binary(b) => Ok(chars::string_value(&mut vm.heap, chars::binary_to_string(b, 10))),
        Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_) => Ok(value),
        Value::Object(_) => {
            let primitive = to_primitive(cx, vm, value, Hint::String)?;
            to_string(cx, vm, primitive)
        }
        Value::Reference(_) => panic!("references cannot be stringified"),
    }
}

/// ES5 ToObject: primitives box into their wrapper kinds; undefined and
/// null refuse.
pub(crate) fn to_object(cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<Value> {
    match value {
        Value::Object(_) => Ok(value),
        Value::Undefined => Err(cx.type_error(vm, "cannot convert undefined to object".to_owned())),
        Value::Null => Err(cx.type_error(vm, "cannot convert null to object".to_owned())),
        Value::Bool(b) => Ok(Value::Object(vm.new_boolean_object(b))),
        Value::Integer(i) => Ok(Value::Object(vm.new_number_object(f64::from(i)))),
        Value::Binary(b) => Ok(Value::Object(vm.new_number_object(b))),
        Value::Key(_) | Value::Text(_) | Value::Buffer(_) | Value::Chars(_) => {
            let bytes = string_slice(vm, &value).to_owned();
            Ok(Value::Object(vm.new_string_object(bytes)))
        }
        Value::Reference(_) => panic!("references cannot be boxed"),
    }
}

// --- operators -------------------------------------------------------------

/// Strict equality (`===`).
pub(crate) fn same(vm: &Engine, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (x, y) if x.is_number() && y.is_number() => {
            primitive_to_binary(vm, x) == primitive_to_binary(vm, y)
        }
        (x, y) if x.is_string() && y.is_string() => string_slice(vm, x) == string_slice(vm, y),
        (Value::Object(x), Value::Object(y)) => x == y,
        _ => false,
    }
}

/// Loose equality (`==`) per ES5 §11.9.3. Operands are rooted across the
/// coercions, which may run script.
pub(crate) fn equals(cx: &mut Context<'_>, vm: &mut Engine, a: Value, b: Value) -> Run<bool> {
    let mark = vm.guard_mark();
    vm.guard(&a);
    vm.guard(&b);
    let result = equals_inner(cx, vm, a, b);
    vm.unguard_to(mark);
    result
}

fn equals_inner(cx: &mut Context<'_>, vm: &mut Engine, a: Value, b: Value) -> Run<bool> {
    match (&a, &b) {
        _ if (a.is_number() && b.is_number())
            || (a.is_string() && b.is_string())
            || matches!((&a, &b), (Value::Bool(_), Value::Bool(_))) =>
        {
            if a.is_string() || b.is_string() {
                Ok(same(vm, &a, &b))
            } else {
                Ok(primitive_to_binary(vm, &a) == primitive_to_binary(vm, &b))
            }
        }
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
        (Value::Object(x), Value::Object(y)) => Ok(x == y),
        (Value::Object(_), _) if b.is_primitive() && !matches!(b, Value::Undefined | Value::Null) => {
            let a = to_primitive(cx, vm, a, Hint::Auto)?;
            equals(cx, vm, a, b)
        }
        (_, Value::Object(_)) if a.is_primitive() && !matches!(a, Value::Undefined | Value::Null) => {
            let b = to_primitive(cx, vm, b, Hint::Auto)?;
            equals(cx, vm, a, b)
        }
        (Value::Bool(_), _) => {
            let a = Value::Binary(primitive_to_binary(vm, &a));
            equals(cx, vm, a, b)
        }
        (_, Value::Bool(_)) => {
            let b = Value::Binary(primitive_to_binary(vm, &b));
            equals(cx, vm, a, b)
        }
        _ if a.is_number() && b.is_string() => {
            let b = Value::Binary(primitive_to_binary(vm, &b));
            Ok(primitive_to_binary(vm, &a) == primitive_to_binary(vm, &b))
        }
        _ if a.is_string() && b.is_number() => {
            let a = Value::Binary(primitive_to_binary(vm, &a));
            Ok(primitive_to_binary(vm, &a) == primitive_to_binary(vm, &b))
        }
        _ => Ok(false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compare {
    Less,
    LessOrEqual,
    More,
    MoreOrEqual,
}

/// The ES5 abstract relational comparison, post-coercion. Intermediates
/// stay rooted while the other side's coercion runs script.
pub(crate) fn compare(cx: &mut Context<'_>, vm: &mut Engine, op: Compare, a: Value, b: Value) -> Run<bool> {
    let mark = vm.guard_mark();
    let result = (|| {
        let pa = to_primitive(cx, vm, a, Hint::Number)?;
        vm.guard(&pa);
        let pb = to_primitive(cx, vm, b, Hint::Number)?;
        vm.guard(&pb);
        compare_primitives(vm, op, pa, pb)
    })();
    vm.unguard_to(mark);
    result
}

fn compare_primitives(vm: &Engine, op: Compare, pa: Value, pb: Value) -> Run<bool> {
    if pa.is_string() && pb.is_string() {
        let (sa, sb) = (string_slice(vm, &pa).to_owned(), string_slice(vm, &pb));
        let ord = sa.as_str().cmp(sb);
        return Ok(match op {
            Compare::Less => ord.is_lt(),
            Compare::LessOrEqual => ord.is_le(),
            Compare::More => ord.is_gt(),
            Compare::MoreOrEqual => ord.is_ge(),
        });
    }

    let (na, nb) = (primitive_to_binary(vm, &pa), primitive_to_binary(vm, &pb));
    Ok(match op {
        Compare::Less => na < nb,
        Compare::LessOrEqual => na <= nb,
        Compare::More => na > nb,
        Compare::MoreOrEqual => na >= nb,
    })
}

/// `+`: string concatenation when either primitive side is a string,
/// numeric addition otherwise. Concatenation goes through the Append
/// builder so repeated adds stay linear.
pub(crate) fn add(cx: &mut Context<'_>, vm: &mut Engine, a: Value, b: Value) -> Run<Value> {
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        let sum = i64::from(*x) + i64::from(*y);
        return Ok(i32::try_from(sum).map_or(Value::Binary(sum as f64), Value::Integer));
    }

    let mark = vm.guard_mark();
    let result = (|| {
        let pa = to_primitive(cx, vm, a, Hint::Auto)?;
        vm.guard(&pa);
        let pb = to_primitive(cx, vm, b, Hint::Auto)?;
        vm.guard(&pb);

        if pa.is_string() || pb.is_string() {
            let mut append = Append::begin();
            append_primitive(&mut append, cx, vm, pa)?;
            append_primitive(&mut append, cx, vm, pb)?;
            Ok(append.end(&mut vm.heap))
        } else {
            Ok(Value::Binary(primitive_to_binary(vm, &pa) + primitive_to_binary(vm, &pb)))
        }
    })();
    vm.unguard_to(mark);
    result
}

fn append_primitive(append: &mut Append, cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<()> {
    if value.is_string() {
        append.push_string_value(string_slice(vm, &value));
    } else {
        let string = to_string(cx, vm, value)?;
        append.push_string_value(string_slice(vm, &string));
    }
    Ok(())
}

pub(crate) fn subtract(cx: &mut Context<'_>, vm: &mut Engine, a: Value, b: Value) -> Run<Value> {
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        let diff = i64::from(*x) - i64::from(*y);
        return Ok(i32::try_from(diff).map_or(Value::Binary(diff as f64), Value::Integer));
    }
    let na = to_binary(cx, vm, a)?;
    let nb = to_binary(cx, vm, b)?;
    Ok(Value::Binary(na - nb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_saturation() {
        assert_eq!(binary_to_integer(f64::NAN), 0);
        assert_eq!(binary_to_integer(f64::INFINITY), i32::MAX);
        assert_eq!(binary_to_integer(f64::NEG_INFINITY), i32::MIN);
        assert_eq!(binary_to_integer(-3.9), -3);
        assert_eq!(binary_to_integer(3.9), 3);
    }

    #[test]
    fn inline_buffer_bounds() {
        assert!(InlineBuffer::try_from_str("1234567").is_some());
        assert!(InlineBuffer::try_from_str("12345678").is_none());
        assert_eq!(InlineBuffer::try_from_str("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn string_lengths_count_utf16_units() {
        let vm = crate::Engine::new();
        let short = Value::Buffer(InlineBuffer::try_from_str("a𝄞").expect("fits inline"));
        assert_eq!(string_length(&vm, &short), 3);
        assert_eq!(string_slice(&vm, &short), "a𝄞");
    }
}
