//! The `Boolean` constructor and `Boolean.prototype`.

use super::{add_method, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    object::ObjectKind,
    text::Text,
    value::Value,
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.boolean;
    setup_builtin_object(vm, "Boolean", constructor, 1, prototype);

    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "valueOf", value_of, 0);
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let truth = cx.argument(vm, 0).is_true(vm);
    if cx.construct {
        Ok(Value::Object(vm.new_boolean_object(truth)))
    } else {
        Ok(Value::Bool(truth))
    }
}

fn this_truth(cx: &mut Context<'_>, vm: &mut Engine) -> Run<bool> {
    match cx.this() {
        Value::Bool(truth) => Ok(truth),
        Value::Object(id) => match vm.heap.object(id).kind {
            ObjectKind::Boolean(truth) => Ok(truth),
            _ => Err(cx.type_error(vm, "not a boolean".to_owned())),
        },
        _ => Err(cx.type_error(vm, "not a boolean".to_owned())),
    }
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let truth = this_truth(cx, vm)?;
    Ok(Value::Text(if truth { Text::TRUE } else { Text::FALSE }))
}

fn value_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let truth = this_truth(cx, vm)?;
    Ok(Value::Bool(truth))
}
