//! The `Math` namespace object.

use super::{add_member, add_method, arg_binary};
use crate::{
    context::Context,
    engine::Engine,
    heap::HeapData,
    object::{Obj, ObjectKind},
    value::{PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let math = vm
        .heap
        .allocate(HeapData::Object(Obj::with_kind(ObjectKind::Math, Some(vm.prototypes.object))));

    let read_only = PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED;
    add_member(vm, math, "E", Value::Binary(std::f64::consts::E), read_only);
    add_member(vm, math, "LN2", Value::Binary(std::f64::consts::LN_2), read_only);
    add_member(vm, math, "LN10", Value::Binary(std::f64::consts::LN_10), read_only);
    add_member(vm, math, "LOG2E", Value::Binary(std::f64::consts::LOG2_E), read_only);
    add_member(vm, math, "LOG10E", Value::Binary(std::f64::consts::LOG10_E), read_only);
    add_member(vm, math, "PI", Value::Binary(std::f64::consts::PI), read_only);
    add_member(vm, math, "SQRT1_2", Value::Binary(std::f64::consts::FRAC_1_SQRT_2), read_only);
    add_member(vm, math, "SQRT2", Value::Binary(std::f64::consts::SQRT_2), read_only);

    add_method(vm, math, "abs", abs, 1);
    add_method(vm, math, "acos", acos, 1);
    add_method(vm, math, "asin", asin, 1);
    add_method(vm, math, "atan", atan, 1);
    add_method(vm, math, "atan2", atan2, 2);
    add_method(vm, math, "ceil", ceil, 1);
    add_method(vm, math, "cos", cos, 1);
    add_method(vm, math, "exp", exp, 1);
    add_method(vm, math, "floor", floor, 1);
    add_method(vm, math, "log", log, 1);
    add_method(vm, math, "max", max, -2);
    add_method(vm, math, "min", min, -2);
    add_method(vm, math, "pow", pow, 2);
    add_method(vm, math, "random", random, 0);
    add_method(vm, math, "round", round, 1);
    add_method(vm, math, "sin", sin, 1);
    add_method(vm, math, "sqrt", sqrt, 1);
    add_method(vm, math, "tan", tan, 1);

    add_member(vm, vm.global, "Math", Value::Object(math), PropFlags::HIDDEN);
}

macro_rules! unary_math {
    ($name:ident, $apply:expr) => {
        fn $name(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
            let x = arg_binary(cx, vm, 0)?;
            let apply: fn(f64) -> f64 = $apply;
            Ok(Value::Binary(apply(x)))
        }
    };
}

unary_math!(abs, f64::abs);
unary_math!(acos, f64::acos);
unary_math!(asin, f64::asin);
unary_math!(atan, f64::atan);
unary_math!(ceil, f64::ceil);
unary_math!(cos, f64::cos);
unary_math!(exp, f64::exp);
unary_math!(floor, f64::floor);
unary_math!(log, f64::ln);
unary_math!(sin, f64::sin);
unary_math!(sqrt, f64::sqrt);
unary_math!(tan, f64::tan);

fn atan2(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let y = arg_binary(cx, vm, 0)?;
    let x = arg_binary(cx, vm, 1)?;
    Ok(Value::Binary(y.atan2(x)))
}

fn max(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let mut best = f64::NEG_INFINITY;
    for index in 0..cx.argument_count(vm) {
        let x = arg_binary(cx, vm, index)?;
        if x.is_nan() {
            return Ok(Value::Binary(f64::NAN));
        }
        best = best.max(x);
    }
    Ok(Value::Binary(best))
}

fn min(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let mut best = f64::INFINITY;
    for index in 0..cx.argument_count(vm) {
        let x = arg_binary(cx, vm, index)?;
        if x.is_nan() {
            return Ok(Value::Binary(f64::NAN));
        }
        best = best.min(x);
    }
    Ok(Value::Binary(best))
}

fn pow(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let base = arg_binary(cx, vm, 0)?;
    let exponent = arg_binary(cx, vm, 1)?;
    Ok(Value::Binary(base.powf(exponent)))
}

fn random(_cx: &mut Context<'_>, _vm: &mut Engine) -> Run<Value> {
    Ok(Value::Binary(rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..1.0)))
}

/// `round` follows ES5 half-up semantics (`-0.5` rounds to `-0`), which
/// differs from `f64::round`'s half-away-from-zero.
fn round(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let x = arg_binary(cx, vm, 0)?;
    Ok(Value::Binary((x + 0.5).floor()))
}
