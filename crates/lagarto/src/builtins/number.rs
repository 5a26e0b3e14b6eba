//! The `Number` constructor and `Number.prototype`.

use super::{add_member, add_method, setup_builtin_object};
use crate::{
    chars,
    context::Context,
    engine::Engine,
    object::ObjectKind,
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.number;
    let constructor = setup_builtin_object(vm, "Number", constructor, 1, prototype);

    let read_only = PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED;
    add_member(vm, constructor, "MAX_VALUE", Value::Binary(f64::MAX), read_only);
    add_member(vm, constructor, "MIN_VALUE", Value::Binary(f64::MIN_POSITIVE), read_only);
    add_member(vm, constructor, "NaN", Value::Binary(f64::NAN), read_only);
    add_member(vm, constructor, "POSITIVE_INFINITY", Value::Binary(f64::INFINITY), read_only);
    add_member(vm, constructor, "NEGATIVE_INFINITY", Value::Binary(f64::NEG_INFINITY), read_only);

    add_method(vm, prototype, "toString", to_string, 1);
    add_method(vm, prototype, "toFixed", to_fixed, 1);
    add_method(vm, prototype, "toExponential", to_exponential, 1);
    add_method(vm, prototype, "toPrecision", to_precision, 1);
    add_method(vm, prototype, "valueOf", value_of, 0);
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = if cx.argument_count(vm) == 0 {
        0.0
    } else {
        super::arg_binary(cx, vm, 0)?
    };
    if cx.construct {
        Ok(Value::Object(vm.new_number_object(binary)))
    } else {
        Ok(Value::Binary(binary))
    }
}

fn this_binary(cx: &mut Context<'_>, vm: &mut Engine) -> Run<f64> {
    match cx.this() {
        value if value.is_number() => Ok(value::primitive_to_binary(vm, &value)),
        Value::Object(id) => match vm.heap.object(id).kind {
            ObjectKind::Number(binary) => Ok(binary),
            _ => Err(cx.type_error(vm, "not a number".to_owned())),
        },
        _ => Err(cx.type_error(vm, "not a number".to_owned())),
    }
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = this_binary(cx, vm)?;
    let radix = match cx.argument(vm, 0) {
        Value::Undefined => 10,
        other => value::to_integer(cx, vm, other)?,
    };
    if !(2..=36).contains(&radix) {
        return Err(cx.range_error(vm, "radix must be an integer at least 2 and no greater than 36".to_owned()));
    }
    Ok(vm.string_value(&chars::binary_to_string(binary, radix as u32)))
}

fn fraction_digits(cx: &mut Context<'_>, vm: &mut Engine, limit: i32) -> Run<usize> {
    let digits = super::arg_integer(cx, vm, 0)?;
    if digits < 0 || digits > limit {
        return Err(cx.range_error(vm, "precision out of range".to_owned()));
    }
    Ok(digits as usize)
}

fn to_fixed(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = this_binary(cx, vm)?;
    let digits = fraction_digits(cx, vm, 20)?;
    if binary.is_nan() {
        return Ok(vm.string_value("NaN"));
    }
    Ok(vm.string_value(&format!("{binary:.digits$}")))
}

fn to_exponential(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = this_binary(cx, vm)?;
    let digits = match cx.argument(vm, 0) {
        Value::Undefined => 6,
        _ => fraction_digits(cx, vm, 20)?,
    };
    if binary.is_nan() {
        return Ok(vm.string_value("NaN"));
    }
    let formatted = format!("{binary:.digits$e}");
    // Rust prints `1.5e2`; the exponent needs its explicit sign.
    let normalized = match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
        _ => formatted,
    };
    Ok(vm.string_value(&normalized))
}

fn to_precision(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = this_binary(cx, vm)?;
    match cx.argument(vm, 0) {
        Value::Undefined => Ok(vm.string_value(&chars::binary_to_string(binary, 10))),
        _ => {
            let digits = fraction_digits(cx, vm, 21)?.max(1);
            if binary.is_nan() {
                return Ok(vm.string_value("NaN"));
            }
            let precision = digits.saturating_sub(integer_digits(binary)).min(20);
            let formatted = format!("{binary:.precision$}");
            Ok(vm.string_value(&formatted))
        }
    }
}

fn integer_digits(binary: f64) -> usize {
    let magnitude = binary.abs();
    if magnitude < 1.0 {
        1
    } else {
        (magnitude.log10().floor() as usize) + 1
    }
}

fn value_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let binary = this_binary(cx, vm)?;
    Ok(Value::Binary(binary))
}
