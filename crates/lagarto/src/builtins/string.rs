//! The `String` constructor and `String.prototype`.
//!
//! Prototype methods accept any coercible receiver; indices are UTF-16
//! code units, mapped onto the UTF-8 storage through the text helpers.

use super::{add_method, arg_binary, arg_string, setup_builtin_object, this_string};
use crate::{
    chars::Append,
    context::Context,
    engine::Engine,
    object::ObjectKind,
    text,
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.string;
    let constructor = setup_builtin_object(vm, "String", constructor, 1, prototype);
    add_method(vm, constructor, "fromCharCode", from_char_code, -1);

    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "valueOf", to_string, 0);
    add_method(vm, prototype, "charAt", char_at, 1);
    add_method(vm, prototype, "charCodeAt", char_code_at, 1);
    add_method(vm, prototype, "concat", concat, -1);
    add_method(vm, prototype, "indexOf", index_of, -1);
    add_method(vm, prototype, "lastIndexOf", last_index_of, -1);
    add_method(vm, prototype, "slice", slice, 2);
    add_method(vm, prototype, "substring", substring, 2);
    add_method(vm, prototype, "split", split, 2);
    add_method(vm, prototype, "toLowerCase", to_lower_case, 0);
    add_method(vm, prototype, "toUpperCase", to_upper_case, 0);
    add_method(vm, prototype, "trim", trim, 0);
    add_method(vm, prototype, "replace", replace, 2);
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = if cx.argument_count(vm) == 0 {
        String::new()
    } else {
        arg_string(cx, vm, 0)?
    };
    if cx.construct {
        Ok(Value::Object(vm.new_string_object(bytes)))
    } else {
        Ok(vm.string_value(&bytes))
    }
}

fn from_char_code(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let mut append = Append::begin();
    for index in 0..cx.argument_count(vm) {
        let unit = super::arg_integer(cx, vm, index)?;
        append.push_codepoint(unit as u32 & 0xffff);
    }
    Ok(append.end(&mut vm.heap))
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    match cx.this() {
        value if value.is_string() => Ok(value),
        Value::Object(id) => match &vm.heap.object(id).kind {
            ObjectKind::String(bytes) => {
                let owned = bytes.to_string();
                Ok(vm.string_value(&owned))
            }
            _ => Err(cx.type_error(vm, "not a string".to_owned())),
        },
        _ => Err(cx.type_error(vm, "not a string".to_owned())),
    }
}

fn char_at(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let index = super::arg_integer(cx, vm, 0)?;
    if index < 0 || index as usize >= text::utf16_length(&bytes) {
        return Ok(vm.string_value(""));
    }
    let (offset, inside_pair) = text::byte_offset_of_unit(&bytes, index as usize);
    if inside_pair {
        return Ok(vm.string_value("\u{fffd}"));
    }
    match bytes[offset..].chars().next() {
        Some(c) if c.len_utf16() == 1 => Ok(vm.string_value(&c.to_string())),
        Some(_) => Ok(vm.string_value("\u{fffd}")),
        None => Ok(vm.string_value("")),
    }
}

fn char_code_at(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let index = super::arg_integer(cx, vm, 0)?;
    if index < 0 {
        return Ok(Value::Binary(f64::NAN));
    }
    match text::unit_at(&bytes, index as usize) {
        Some(unit) => Ok(Value::Integer(i32::from(unit))),
        None => Ok(Value::Binary(f64::NAN)),
    }
}

fn concat(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let mut out = this_string(cx, vm)?;
    for index in 0..cx.argument_count(vm) {
        out.push_str(&arg_string(cx, vm, index)?);
    }
    Ok(vm.string_value(&out))
}

/// Maps a UTF-16 unit range onto byte offsets, clamped to the string.
fn unit_range(bytes: &str, start: usize, end: usize) -> (usize, usize) {
    let (start_byte, _) = text::byte_offset_of_unit(bytes, start);
    let (end_byte, _) = text::byte_offset_of_unit(bytes, end);
    (start_byte, end_byte.max(start_byte))
}

fn index_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let haystack = this_string(cx, vm)?;
    let needle = arg_string(cx, vm, 0)?;
    let from = match cx.argument(vm, 1) {
        Value::Undefined => 0usize,
        other => value::to_integer(cx, vm, other)?.max(0) as usize,
    };
    let (from_byte, _) = text::byte_offset_of_unit(&haystack, from);
    match haystack[from_byte..].find(&needle) {
        Some(found) => {
            let unit = text::utf16_length(&haystack[..from_byte + found]);
            Ok(Value::Integer(unit as i32))
        }
        None => Ok(Value::Integer(-1)),
    }
}

fn last_index_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let haystack = this_string(cx, vm)?;
    let needle = arg_string(cx, vm, 0)?;
    match haystack.rfind(&needle) {
        Some(found) => Ok(Value::Integer(text::utf16_length(&haystack[..found]) as i32)),
        None => Ok(Value::Integer(-1)),
    }
}

fn slice(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let length = text::utf16_length(&bytes);
    let clamp = |raw: f64| -> usize {
        if raw.is_nan() {
            0
        } else if raw < 0.0 {
            (raw + length as f64).max(0.0) as usize
        } else {
            (raw as usize).min(length)
        }
    };
    let start = clamp(arg_binary(cx, vm, 0)?);
    let end = match cx.argument(vm, 1) {
        Value::Undefined => length,
        other => clamp(value::to_binary(cx, vm, other)?),
    };
    if start >= end {
        return Ok(vm.string_value(""));
    }
    let (start_byte, end_byte) = unit_range(&bytes, start, end);
    Ok(vm.string_value(&bytes[start_byte..end_byte]))
}

fn substring(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let length = text::utf16_length(&bytes);
    let clamp = |raw: f64| -> usize {
        if raw.is_nan() || raw < 0.0 {
            0
        } else {
            (raw as usize).min(length)
        }
    };
    let mut start = clamp(arg_binary(cx, vm, 0)?);
    let mut end = match cx.argument(vm, 1) {
        Value::Undefined => length,
        other => clamp(value::to_binary(cx, vm, other)?),
    };
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    let (start_byte, end_byte) = unit_range(&bytes, start, end);
    Ok(vm.string_value(&bytes[start_byte..end_byte]))
}

fn split(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let separator = cx.argument(vm, 0);
    let array = vm.new_array(0);
    let mark = vm.guard_mark();
    vm.guard_id(array);

    let outcome = (|| {
        let mut out = 0u32;
        let mut push = |vm: &mut Engine, out: &mut u32, piece: Value| {
            vm.add_element(array, *out, piece, PropFlags::empty());
            *out += 1;
        };

        match separator {
            Value::Undefined => {
                let whole = vm.string_value(&bytes);
                push(vm, &mut out, whole);
            }
            Value::Object(id) if matches!(vm.heap.object(id).kind, ObjectKind::Regexp(_)) => {
                // Regex separator: slices between matches, with capture
                // groups spliced in.
                let program = super::regexp::program_of(vm, id);
                let mut cursor = 0usize;
                let mut position = 0usize;
                while position <= bytes.len() {
                    let found = program.captures_from_pos(&bytes, position).ok().flatten();
                    let Some(captures) = found else {
                        break;
                    };
                    let whole = captures.get(0).expect("group 0 always present");
                    if whole.end() == whole.start() && whole.start() == cursor {
                        // Zero-width match; step one character onward.
                        position = next_char_boundary(&bytes, position);
                        continue;
                    }
                    let piece = vm.string_value(&bytes[cursor..whole.start()]);
                    push(vm, &mut out, piece);
                    for group in 1..captures.len() {
                        let piece = match captures.get(group) {
                            Some(m) => vm.string_value(m.as_str()),
                            None => Value::Undefined,
                        };
                        push(vm, &mut out, piece);
                    }
                    cursor = whole.end();
                    position = if whole.end() == whole.start() {
                        next_char_boundary(&bytes, whole.end())
                    } else {
                        whole.end()
                    };
                }
                let tail = vm.string_value(&bytes[cursor..]);
                push(vm, &mut out, tail);
            }
            other => {
                let needle = value::to_string(cx, vm, other)?;
                let needle = value::string_slice(vm, &needle).to_owned();
                if needle.is_empty() {
                    for c in bytes.chars() {
                        let piece = vm.string_value(&c.to_string());
                        push(vm, &mut out, piece);
                    }
                } else {
                    for piece in bytes.split(needle.as_str()) {
                        let piece = vm.string_value(piece);
                        push(vm, &mut out, piece);
                    }
                }
            }
        }
        Ok(Value::Object(array))
    })();
    vm.unguard_to(mark);
    outcome
}

fn next_char_boundary(bytes: &str, position: usize) -> usize {
    let mut next = position + 1;
    while next < bytes.len() && !bytes.is_char_boundary(next) {
        next += 1;
    }
    next
}

fn to_lower_case(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    Ok(vm.string_value(&bytes.to_lowercase()))
}

fn to_upper_case(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    Ok(vm.string_value(&bytes.to_uppercase()))
}

fn trim(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    Ok(vm.string_value(bytes.trim_matches(text::is_space)))
}

/// `replace`: first match only for string patterns, every match for
/// global regexes; `$n`, `$&`, `` $` ``, `$'`, and `$$` substitutions.
fn replace(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = this_string(cx, vm)?;
    let pattern = cx.argument(vm, 0);
    let replacement = arg_string(cx, vm, 1)?;

    match pattern {
        Value::Object(id) if matches!(vm.heap.object(id).kind, ObjectKind::Regexp(_)) => {
            let program = super::regexp::program_of(vm, id);
            let global = super::regexp::is_global(vm, id);
            let mut result = String::new();
            let mut cursor = 0usize;
            let mut position = 0usize;
            while position <= bytes.len() {
                let Some(captures) = program.captures_from_pos(&bytes, position).ok().flatten() else {
                    break;
                };
                let whole = captures.get(0).expect("group 0 always present");
                result.push_str(&bytes[cursor..whole.start()]);
                expand_replacement(&mut result, &replacement, &bytes, &captures);
                cursor = whole.end();
                position = if whole.end() == whole.start() {
                    next_char_boundary(&bytes, whole.end())
                } else {
                    whole.end()
                };
                if !global {
                    break;
                }
            }
            result.push_str(&bytes[cursor..]);
            Ok(vm.string_value(&result))
        }
        other => {
            let needle = value::to_string(cx, vm, other)?;
            let needle = value::string_slice(vm, &needle).to_owned();
            match bytes.find(&needle) {
                Some(found) => {
                    let mut result = String::with_capacity(bytes.len());
                    result.push_str(&bytes[..found]);
                    result.push_str(&replacement.replace("$&", &needle));
                    result.push_str(&bytes[found + needle.len()..]);
                    Ok(vm.string_value(&result))
                }
                None => Ok(vm.string_value(&bytes)),
            }
        }
    }
}

fn expand_replacement(out: &mut String, replacement: &str, subject: &str, captures: &fancy_regex::Captures<'_>) {
    let whole = captures.get(0).expect("group 0 always present");
    let mut iter = replacement.chars().peekable();
    while let Some(c) = iter.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match iter.peek() {
            Some('$') => {
                iter.next();
                out.push('$');
            }
            Some('&') => {
                iter.next();
                out.push_str(whole.as_str());
            }
            Some('`') => {
                iter.next();
                out.push_str(&subject[..whole.start()]);
            }
            Some('\'') => {
                iter.next();
                out.push_str(&subject[whole.end()..]);
            }
            Some(d) if d.is_ascii_digit() => {
                let mut group = d.to_digit(10).expect("digit") as usize;
                iter.next();
                if let Some(d2) = iter.peek().copied().filter(char::is_ascii_digit)
                    && captures.len() > group * 10 + d2.to_digit(10).expect("digit") as usize
                {
                    group = group * 10 + d2.to_digit(10).expect("digit") as usize;
                    iter.next();
                }
                match captures.get(group) {
                    Some(m) => out.push_str(m.as_str()),
                    None => {
                        out.push('$');
                        out.push_str(&group.to_string());
                    }
                }
            }
            _ => out.push('$'),
        }
    }
}
