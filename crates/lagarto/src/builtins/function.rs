//! The `Function` constructor and `Function.prototype`.

use super::{add_method, arg_string, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    interp,
    object::{FuncFlags, FunctionBody, ObjectKind},
    parser::Parser,
    value::{self, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.function;
    setup_builtin_object(vm, "Function", constructor, 1, prototype);

    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "apply", apply, 2);
    add_method(vm, prototype, "call", call, -1);
    add_method(vm, prototype, "bind", bind, -1);
}

/// `Function(p1, …, pn, body)`: assemble a function expression and compile
/// it against the global scope.
fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let count = cx.argument_count(vm);
    let mut source = String::from("(function(");
    for index in 0..count.saturating_sub(1) {
        if index > 0 {
            source.push(',');
        }
        source.push_str(&arg_string(cx, vm, index)?);
    }
    source.push_str("){");
    if count > 0 {
        source.push_str(&arg_string(cx, vm, count - 1)?);
    }
    source.push_str("})");

    let input_id = vm.inputs.add("(Function)", source);
    let parser = Parser::new(vm, input_id, vm.sloppy_mode);
    let program = parser.parse(vm, vm.global, false);
    vm.heap.retain(program);
    let outcome = interp::run_program(cx, vm, program, Value::Object(vm.global));
    vm.heap.release(program);
    let compiled = vm.take_result();
    outcome.map(|_| compiled)
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = cx.this_kind(vm, "function", |kind| matches!(kind, ObjectKind::Function(_)))?;
    let data = vm.heap.object(id).function_data().expect("checked above");
    match &data.body {
        FunctionBody::Native(_) => {
            let name = data.name.map_or_else(String::new, |key| vm.keys.text_of(key).to_owned());
            Ok(vm.string_value(&format!("function {name}() [native code]")))
        }
        FunctionBody::Template(_) => {
            let source = data.text.slice(&vm.inputs).to_owned();
            if source.is_empty() {
                Ok(vm.string_value("function () {}"))
            } else {
                Ok(vm.string_value(&source))
            }
        }
    }
}

fn apply(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let function = cx.this();
    let this_arg = cx.argument(vm, 0);
    let arguments = cx.argument(vm, 1);

    let args: Vec<Value> = match arguments {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(id) => {
            let obj = vm.heap.object(id);
            (0..obj.element_count.min(obj.elements.len() as u32))
                .map(|index| {
                    obj.elements[index as usize]
                        .as_ref()
                        .map_or(Value::Undefined, |property| property.value)
                })
                .collect()
        }
        _ => return Err(cx.type_error(vm, "arguments is not an object".to_owned())),
    };
    interp::call_function_value(cx, vm, function, this_arg, &args, false)
}

fn call(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let function = cx.this();
    let this_arg = cx.argument(vm, 0);
    let count = cx.argument_count(vm);
    let args: Vec<Value> = (1..count).map(|index| cx.argument(vm, index)).collect();
    interp::call_function_value(cx, vm, function, this_arg, &args, false)
}

/// `bind`: a copy of the target marked `use_bound_this`, carrying the
/// receiver and any leading arguments.
fn bind(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = cx.this_kind(vm, "function", |kind| matches!(kind, ObjectKind::Function(_)))?;
    let bound_this = cx.argument(vm, 0);
    let count = cx.argument_count(vm);
    let bound_arguments: Vec<Value> = (1..count).map(|index| cx.argument(vm, index)).collect();

    let mut obj = vm.heap.object(id).clone();
    obj.prototype = Some(id);
    let data = obj.function_data_mut().expect("checked above");
    data.flags |= FuncFlags::USE_BOUND_THIS;
    data.bound_this = Some(bound_this);
    data.bound_arguments = bound_arguments;
    data.pair = Some(id);
    data.parameter_count = data.parameter_count.saturating_sub((count.saturating_sub(1)) as u32);

    Ok(Value::Object(vm.heap.allocate(crate::heap::HeapData::Object(obj))))
}

/// `instanceof` support and `Function.prototype` itself rely on functions
/// exposing `length`; that member is installed at allocation time, so
/// there is nothing more to do here.
#[cfg(test)]
mod tests {
    #[test]
    fn bound_functions_prepend_arguments() {
        let mut vm = crate::Engine::new();
        let out = vm
            .eval_text(
                "bind.js",
                "function add(a, b) { return a + b; }\n\
                 var add2 = add.bind(null, 2);\n\
                 add2(3) + '';",
            )
            .unwrap();
        assert_eq!(out, "5");
    }

    #[test]
    fn call_and_apply_set_this() {
        let mut vm = crate::Engine::new();
        let out = vm
            .eval_text(
                "call.js",
                "function who() { return this.name; }\n\
                 who.call({name: 'a'}) + who.apply({name: 'b'}, []);",
            )
            .unwrap();
        assert_eq!(out, "ab");
    }
}
