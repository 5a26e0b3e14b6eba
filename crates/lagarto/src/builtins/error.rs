//! The `Error` constructor family and their prototypes.

use super::{add_member, add_method, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    exception::ErrorKind,
    key::Key,
    object::ObjectKind,
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let kinds = [
        (ErrorKind::Error, "Error", error_constructor as crate::interp::NativeFn),
        (ErrorKind::RangeError, "RangeError", range_error_constructor),
        (ErrorKind::ReferenceError, "ReferenceError", reference_error_constructor),
        (ErrorKind::SyntaxError, "SyntaxError", syntax_error_constructor),
        (ErrorKind::TypeError, "TypeError", type_error_constructor),
        (ErrorKind::UriError, "URIError", uri_error_constructor),
        (ErrorKind::EvalError, "EvalError", eval_error_constructor),
    ];
    for (kind, name, native) in kinds {
        let prototype = vm.prototypes.error_proto(kind);
        setup_builtin_object(vm, name, native, 1, prototype);
        let name_value = vm.string_value(name);
        add_member(vm, prototype, "name", name_value, PropFlags::HIDDEN);
        let empty = vm.string_value("");
        add_member(vm, prototype, "message", empty, PropFlags::HIDDEN);
    }

    let error_proto = vm.prototypes.error;
    add_method(vm, error_proto, "toString", to_string, 0);
}

fn construct_error(cx: &mut Context<'_>, vm: &mut Engine, kind: ErrorKind) -> Run<Value> {
    let message = match cx.argument(vm, 0) {
        Value::Undefined => String::new(),
        other => {
            let s = value::to_string(cx, vm, other)?;
            value::string_slice(vm, &s).to_owned()
        }
    };
    Ok(vm.new_error_value(kind, message, cx.text))
}

fn error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::Error)
}

fn range_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::RangeError)
}

fn reference_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::ReferenceError)
}

fn syntax_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::SyntaxError)
}

fn type_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::TypeError)
}

fn uri_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::UriError)
}

fn eval_error_constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    construct_error(cx, vm, ErrorKind::EvalError)
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = cx.this_object(vm)?;

    let name = match &vm.heap.object(id).kind {
        ObjectKind::Error(data) => data.kind.to_string(),
        _ => {
            let name_key = vm.make_key("name");
            let name = vm.get_member(cx, id, name_key)?;
            match name {
                Value::Undefined => "Error".to_owned(),
                other => {
                    let s = value::to_string(cx, vm, other)?;
                    value::string_slice(vm, &s).to_owned()
                }
            }
        }
    };

    let message = vm.get_member(cx, id, Key::MESSAGE)?;
    let message = match message {
        Value::Undefined => String::new(),
        other => {
            let s = value::to_string(cx, vm, other)?;
            value::string_slice(vm, &s).to_owned()
        }
    };

    Ok(if message.is_empty() {
        vm.string_value(&name)
    } else {
        vm.string_value(&format!("{name}: {message}"))
    })
}
