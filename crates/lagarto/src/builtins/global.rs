//! Global-object values and functions: the numeric globals, `eval`,
//! number parsing, and the URI/escape codecs.

use super::{add_member, add_method, arg_string};
use crate::{
    chars::{self, ScanFlags},
    context::Context,
    engine::Engine,
    interp,
    parser::Parser,
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let read_only = PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED;
    add_member(vm, vm.global, "NaN", Value::Binary(f64::NAN), read_only);
    add_member(vm, vm.global, "Infinity", Value::Binary(f64::INFINITY), read_only);
    add_member(vm, vm.global, "undefined", Value::Undefined, read_only);

    add_method(vm, vm.global, "eval", eval, 1);
    add_method(vm, vm.global, "parseInt", parse_int, 2);
    add_method(vm, vm.global, "parseFloat", parse_float, 1);
    add_method(vm, vm.global, "isNaN", is_nan, 1);
    add_method(vm, vm.global, "isFinite", is_finite, 1);
    add_method(vm, vm.global, "decodeURI", decode_uri, 1);
    add_method(vm, vm.global, "decodeURIComponent", decode_uri_component, 1);
    add_method(vm, vm.global, "encodeURI", encode_uri, 1);
    add_method(vm, vm.global, "encodeURIComponent", encode_uri_component, 1);
    add_method(vm, vm.global, "escape", escape, 1);
    add_method(vm, vm.global, "unescape", unescape, 1);
}

/// The indirect form of `eval`: always global scope.
fn eval(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let argument = cx.argument(vm, 0);
    if !argument.is_string() {
        return Ok(argument);
    }
    let source = value::string_slice(vm, &argument).to_owned();
    let input_id = vm.inputs.add("(eval)", source);
    let parser = Parser::new(vm, input_id, vm.sloppy_mode);
    let program = parser.parse(vm, vm.global, false);
    vm.heap.retain(program);

    let previous = vm.take_result();
    let mark = vm.guard_mark();
    vm.guard(&previous);
    let outcome = interp::run_program(cx, vm, program, Value::Object(vm.global));
    vm.heap.release(program);
    let value = vm.take_result();
    vm.set_result(previous);
    vm.unguard_to(mark);
    outcome?;
    Ok(value)
}

fn parse_int(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    let radix = super::arg_integer(cx, vm, 1)?;
    if radix != 0 && !(2..=36).contains(&radix) {
        return Ok(Value::Binary(f64::NAN));
    }
    match chars::scan_integer(&bytes, radix as u32, ScanFlags::LAZY | ScanFlags::SLOPPY) {
        chars::ScanInt::Integer(i) => Ok(Value::Integer(i)),
        chars::ScanInt::Binary(b) => Ok(Value::Binary(b)),
    }
}

fn parse_float(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    Ok(Value::Binary(chars::scan_binary(
        bytes.trim_start_matches(crate::text::is_space),
        ScanFlags::LAZY,
    )))
}

fn is_nan(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = super::arg_binary(cx, vm, 0)?;
    Ok(Value::Bool(binary.is_nan()))
}

fn is_finite(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = super::arg_binary(cx, vm, 0)?;
    Ok(Value::Bool(binary.is_finite()))
}

/// Characters left intact by `encodeURI` beyond the unreserved set.
const URI_RESERVED: &[u8] = b";/?:@&=+$,#-_.!~*'()";
/// Characters left intact by `encodeURIComponent`.
const URI_COMPONENT_KEEP: &[u8] = b"-_.!~*'()";

fn encode_with(cx: &mut Context<'_>, vm: &mut Engine, keep: &[u8]) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    let mut out = String::new();
    for byte in bytes.bytes() {
        if byte.is_ascii_alphanumeric() || keep.contains(&byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    Ok(vm.string_value(&out))
}

fn encode_uri(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    encode_with(cx, vm, URI_RESERVED)
}

fn encode_uri_component(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    encode_with(cx, vm, URI_COMPONENT_KEEP)
}

fn decode_with(cx: &mut Context<'_>, vm: &mut Engine, keep_encoded: &[u8]) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let raw = bytes.as_bytes();
    let mut index = 0usize;
    while index < raw.len() {
        let byte = raw[index];
        if byte != b'%' {
            out.push(byte);
            index += 1;
            continue;
        }
        let (Some(&high), Some(&low)) = (raw.get(index + 1), raw.get(index + 2)) else {
            return Err(cx.uri_error(vm, "malformed URI escape".to_owned()));
        };
        if !high.is_ascii_hexdigit() || !low.is_ascii_hexdigit() {
            return Err(cx.uri_error(vm, "malformed URI escape".to_owned()));
        }
        let decoded = (hex_digit(high) << 4) | hex_digit(low);
        if keep_encoded.contains(&decoded) {
            out.extend_from_slice(&raw[index..index + 3]);
        } else {
            out.push(decoded);
        }
        index += 3;
    }
    match String::from_utf8(out) {
        Ok(decoded) => Ok(vm.string_value(&decoded)),
        Err(_) => Err(cx.uri_error(vm, "malformed UTF-8 in URI".to_owned())),
    }
}

fn hex_digit(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        _ => byte - b'A' + 10,
    }
}

fn decode_uri(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    decode_with(cx, vm, URI_RESERVED)
}

fn decode_uri_component(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    decode_with(cx, vm, &[])
}

fn escape(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    let mut out = String::new();
    for unit_index in 0..crate::text::utf16_length(&bytes) {
        let unit = crate::text::unit_at(&bytes, unit_index).expect("index in range");
        let c = char::from_u32(u32::from(unit));
        match c {
            Some(c)
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '*' | '_' | '+' | '-' | '.' | '/') =>
            {
                out.push(c);
            }
            _ if unit < 0x100 => out.push_str(&format!("%{unit:02X}")),
            _ => out.push_str(&format!("%u{unit:04X}")),
        }
    }
    Ok(vm.string_value(&out))
}

fn unescape(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    let raw = bytes.as_bytes();
    let mut append = chars::Append::begin();
    let mut index = 0usize;
    while index < raw.len() {
        if raw[index] == b'%' {
            if raw.get(index + 1) == Some(&b'u')
                && raw.len() >= index + 6
                && raw[index + 2..index + 6].iter().all(u8::is_ascii_hexdigit)
            {
                let unit =
                    u32::from_str_radix(std::str::from_utf8(&raw[index + 2..index + 6]).expect("hex"), 16)
                        .expect("hex digits");
                append.push_codepoint(unit);
                index += 6;
                continue;
            }
            if raw.len() >= index + 3 && raw[index + 1..index + 3].iter().all(u8::is_ascii_hexdigit) {
                let unit = u32::from_str_radix(std::str::from_utf8(&raw[index + 1..index + 3]).expect("hex"), 16)
                    .expect("hex digits");
                append.push_codepoint(unit);
                index += 3;
                continue;
            }
        }
        let source = std::str::from_utf8(&raw[index..]).expect("input is utf-8");
        let c = source.chars().next().expect("non-empty");
        append.push_char(c);
        index += c.len_utf8();
    }
    Ok(append.end(&mut vm.heap))
}
