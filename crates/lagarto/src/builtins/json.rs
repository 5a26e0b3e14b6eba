//! The `JSON` namespace object: a hand-rolled ES5 subset — `stringify`
//! with indent and array-replacer support, `parse` without reviver.

use super::{add_member, add_method};
use crate::{
    context::Context,
    engine::Engine,
    heap::{HeapData, HeapId},
    interp,
    key::Key,
    object::{member_ref, Obj, ObjectKind},
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let json = vm
        .heap
        .allocate(HeapData::Object(Obj::with_kind(ObjectKind::Json, Some(vm.prototypes.object))));
    add_method(vm, json, "stringify", stringify, 3);
    add_method(vm, json, "parse", parse, 2);
    add_member(vm, vm.global, "JSON", Value::Object(json), PropFlags::HIDDEN);
}

// --- stringify -------------------------------------------------------------

struct Stringifier {
    indent: String,
    /// Property allow-list from an array replacer, when given.
    filter: Option<Vec<String>>,
    /// Objects on the current path, for cycle refusal.
    stack: Vec<HeapId>,
}

fn stringify(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let subject = cx.argument(vm, 0);
    let replacer = cx.argument(vm, 1);
    let space = cx.argument(vm, 2);

    let filter = match replacer {
        Value::Object(id) if matches!(vm.heap.object(id).kind, ObjectKind::Array) => {
            let count = vm.heap.object(id).element_count;
            let mut names = Vec::new();
            for index in 0..count {
                let element = vm.get_element(cx, id, index)?;
                if element.is_string() {
                    names.push(value::string_slice(vm, &element).to_owned());
                }
            }
            Some(names)
        }
        _ => None,
    };

    let indent = match space {
        Value::Integer(n) => " ".repeat((n.clamp(0, 10)) as usize),
        Value::Binary(n) => " ".repeat((n as i64).clamp(0, 10) as usize),
        value if value.is_string() => {
            let bytes = value::string_slice(vm, &value);
            bytes.chars().take(10).collect()
        }
        _ => String::new(),
    };

    let mut stringifier = Stringifier { indent, filter, stack: Vec::new() };
    let mut out = String::new();
    if stringifier.write_value(cx, vm, &mut out, subject, 0)? {
        Ok(vm.string_value(&out))
    } else {
        Ok(Value::Undefined)
    }
}

impl Stringifier {
    /// Serialises one value; `false` means the value does not serialise
    /// (functions, undefined) and the caller drops it.
    fn write_value(
        &mut self,
        cx: &mut Context<'_>,
        vm: &mut Engine,
        out: &mut String,
        value: Value,
        depth: usize,
    ) -> Run<bool> {
        match value {
            Value::Undefined => Ok(false),
            Value::Null => {
                out.push_str("null");
                Ok(true)
            }
            Value::Bool(true) => {
                out.push_str("true");
                Ok(true)
            }
            Value::Bool(false) => {
                out.push_str("false");
                Ok(true)
            }
            Value::Integer(_) | Value::Binary(_) => {
                let binary = value::primitive_to_binary(vm, &value);
                if binary.is_finite() {
                    out.push_str(&crate::chars::binary_to_string(binary, 10));
                } else {
                    out.push_str("null");
                }
                Ok(true)
            }
            v if v.is_string() => {
                let bytes = value::string_slice(vm, &v).to_owned();
                write_quoted(out, &bytes);
                Ok(true)
            }
            Value::Object(id) => self.write_object(cx, vm, out, id, depth),
            Value::Reference(_) => Ok(false),
            _ => Ok(false),
        }
    }

    fn write_object(
        &mut self,
        cx: &mut Context<'_>,
        vm: &mut Engine,
        out: &mut String,
        id: HeapId,
        depth: usize,
    ) -> Run<bool> {
        if self.stack.contains(&id) {
            return Err(cx.type_error(vm, "converting circular structure to JSON".to_owned()));
        }

        // toJSON and wrapper kinds first.
        match &vm.heap.object(id).kind {
            ObjectKind::Function(_) => return Ok(false),
            ObjectKind::Number(binary) => {
                let binary = *binary;
                return self.write_value(cx, vm, out, Value::Binary(binary), depth);
            }
            ObjectKind::Boolean(truth) => {
                let truth = *truth;
                return self.write_value(cx, vm, out, Value::Bool(truth), depth);
            }
            ObjectKind::String(bytes) => {
                write_quoted(out, &bytes.to_string());
                return Ok(true);
            }
            ObjectKind::Date(_) => {
                let to_iso = vm.get_member(cx, id, Key::TO_ISO_STRING)?;
                let formatted = interp::call_function_value(cx, vm, to_iso, Value::Object(id), &[], false)?;
                let bytes = value::string_slice(vm, &formatted).to_owned();
                write_quoted(out, &bytes);
                return Ok(true);
            }
            _ => {}
        }

        self.stack.push(id);
        let result = self.write_container(cx, vm, out, id, depth);
        self.stack.pop();
        result
    }

    fn write_container(
        &mut self,
        cx: &mut Context<'_>,
        vm: &mut Engine,
        out: &mut String,
        id: HeapId,
        depth: usize,
    ) -> Run<bool> {
        let is_array = matches!(vm.heap.object(id).kind, ObjectKind::Array | ObjectKind::Arguments);

        if is_array {
            out.push('[');
            let count = vm.heap.object(id).element_count;
            for index in 0..count {
                if index > 0 {
                    out.push(',');
                }
                self.newline(out, depth + 1);
                let element = vm.get_element(cx, id, index)?;
                if !self.write_value(cx, vm, out, element, depth + 1)? {
                    out.push_str("null");
                }
            }
            if count > 0 {
                self.newline(out, depth);
            }
            out.push(']');
            return Ok(true);
        }

        out.push('{');
        let mut names: Vec<(String, Value)> = Vec::new();
        {
            let obj = vm.heap.object(id);
            for (index, element) in obj.elements.iter().enumerate() {
                if let Some(property) = element
                    && !property.flags.contains(PropFlags::HIDDEN)
                {
                    names.push((index.to_string(), property.value));
                }
            }
            for (_, property) in obj.leaves() {
                if !property.flags.contains(PropFlags::HIDDEN) {
                    names.push((vm.keys.text_of(property.key).to_owned(), property.value));
                }
            }
        }

        let mut first = true;
        for (name, mut value) in names {
            if let Some(filter) = &self.filter
                && !filter.contains(&name)
            {
                continue;
            }
            // Accessor slots read through the getter.
            if let Some(key) = vm.keys.search(&name)
                && let Some(slot_ref) = member_ref(&vm.heap, id, key, PropFlags::AS_OWN)
            {
                value = vm.get_value(cx, id, Some(slot_ref))?;
            }

            let mut piece = String::new();
            if !self.write_value(cx, vm, &mut piece, value, depth + 1)? {
                continue;
            }
            if !first {
                out.push(',');
            }
            first = false;
            self.newline(out, depth + 1);
            write_quoted(out, &name);
            out.push(':');
            if !self.indent.is_empty() {
                out.push(' ');
            }
            out.push_str(&piece);
        }
        if !first {
            self.newline(out, depth);
        }
        out.push('}');
        Ok(true)
    }

    fn newline(&self, out: &mut String, depth: usize) {
        if self.indent.is_empty() {
            return;
        }
        out.push('\n');
        for _ in 0..depth {
            out.push_str(&self.indent);
        }
    }
}

fn write_quoted(out: &mut String, bytes: &str) {
    out.push('"');
    for c in bytes.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// --- parse -----------------------------------------------------------------

struct JsonParser<'s> {
    bytes: &'s [u8],
    offset: usize,
}

fn parse(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let text = super::arg_string(cx, vm, 0)?;
    let mut parser = JsonParser { bytes: text.as_bytes(), offset: 0 };
    let value = parser
        .parse_value(vm)
        .ok_or_else(|| cx.syntax_error(vm, "unexpected token in JSON".to_owned()))?;
    parser.skip_space();
    if parser.offset != parser.bytes.len() {
        return Err(cx.syntax_error(vm, "trailing characters in JSON".to_owned()));
    }
    Ok(value)
}

impl JsonParser<'_> {
    fn skip_space(&mut self) {
        while matches!(self.bytes.get(self.offset), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.offset += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        self.skip_space();
        if self.bytes.get(self.offset) == Some(&expected) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn eat_literal(&mut self, literal: &str) -> bool {
        if self.bytes[self.offset..].starts_with(literal.as_bytes()) {
            self.offset += literal.len();
            true
        } else {
            false
        }
    }

    fn parse_value(&mut self, vm: &mut Engine) -> Option<Value> {
        self.skip_space();
        match self.bytes.get(self.offset)? {
            b'n' => self.eat_literal("null").then_some(Value::Null),
            b't' => self.eat_literal("true").then_some(Value::Bool(true)),
            b'f' => self.eat_literal("false").then_some(Value::Bool(false)),
            b'"' => {
                let bytes = self.parse_string()?;
                Some(crate::chars::string_value(&mut vm.heap, bytes))
            }
            b'[' => {
                self.offset += 1;
                let array = vm.new_array(0);
                let mut index = 0u32;
                if !self.eat(b']') {
                    loop {
                        let element = self.parse_value(vm)?;
                        vm.add_element(array, index, element, PropFlags::empty());
                        index += 1;
                        if self.eat(b']') {
                            break;
                        }
                        if !self.eat(b',') {
                            return None;
                        }
                    }
                }
                Some(Value::Object(array))
            }
            b'{' => {
                self.offset += 1;
                let object = vm.new_object();
                if !self.eat(b'}') {
                    loop {
                        self.skip_space();
                        let name = self.parse_string()?;
                        if !self.eat(b':') {
                            return None;
                        }
                        let value = self.parse_value(vm)?;
                        let property = crate::chars::string_value(&mut vm.heap, name);
                        vm.add_property(object, property, value, PropFlags::empty());
                        if self.eat(b'}') {
                            break;
                        }
                        if !self.eat(b',') {
                            return None;
                        }
                    }
                }
                Some(Value::Object(object))
            }
            _ => self.parse_number(),
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        if self.bytes.get(self.offset) != Some(&b'"') {
            return None;
        }
        self.offset += 1;
        let mut out = String::new();
        loop {
            let c = *self.bytes.get(self.offset)?;
            self.offset += 1;
            match c {
                b'"' => return Some(out),
                b'\\' => {
                    let escape = *self.bytes.get(self.offset)?;
                    self.offset += 1;
                    match escape {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'b' => out.push('\u{8}'),
                        b'f' => out.push('\u{c}'),
                        b'n' => out.push('\n'),
                        b'r' => out.push('\r'),
                        b't' => out.push('\t'),
                        b'u' => {
                            let hex = self.bytes.get(self.offset..self.offset + 4)?;
                            let unit = u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                            self.offset += 4;
                            out.push(char::from_u32(unit).unwrap_or('\u{fffd}'));
                        }
                        _ => return None,
                    }
                }
                c if c < 0x80 => out.push(char::from(c)),
                _ => {
                    // Re-decode the multibyte character from the source.
                    let start = self.offset - 1;
                    let source = std::str::from_utf8(&self.bytes[start..]).ok()?;
                    let decoded = source.chars().next()?;
                    out.push(decoded);
                    self.offset = start + decoded.len_utf8();
                }
            }
        }
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.offset;
        if self.bytes.get(self.offset) == Some(&b'-') {
            self.offset += 1;
        }
        while matches!(self.bytes.get(self.offset), Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')) {
            self.offset += 1;
        }
        if start == self.offset {
            return None;
        }
        let slice = std::str::from_utf8(&self.bytes[start..self.offset]).ok()?;
        let binary: f64 = slice.parse().ok()?;
        if binary.fract() == 0.0 && binary >= f64::from(i32::MIN) && binary <= f64::from(i32::MAX) {
            Some(Value::Integer(binary as i32))
        } else {
            Some(Value::Binary(binary))
        }
    }
}
