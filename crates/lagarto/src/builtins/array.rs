//! The `Array` constructor and `Array.prototype`.
//!
//! Array instances have no own `length` member; the prototype carries an
//! accessor pair mapped onto the dense element count, so reads and writes
//! through the usual put path hit the resize rules (including the
//! sealed-trailing-element pushback).

use super::{add_accessor, add_method, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    heap::HeapId,
    key::Key,
    object::{ObjectKind, Property},
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.array;
    let constructor = setup_builtin_object(vm, "Array", constructor, -1, prototype);
    add_method(vm, constructor, "isArray", is_array, 1);

    add_accessor(vm, prototype, "length", length_get, Some(length_set));
    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "join", join, 1);
    add_method(vm, prototype, "pop", pop, 0);
    add_method(vm, prototype, "push", push, -1);
    add_method(vm, prototype, "reverse", reverse, 0);
    add_method(vm, prototype, "shift", shift, 0);
    add_method(vm, prototype, "unshift", unshift, -1);
    add_method(vm, prototype, "slice", slice, 2);
    add_method(vm, prototype, "concat", concat, -1);
    add_method(vm, prototype, "indexOf", index_of, -1);
    add_method(vm, prototype, "lastIndexOf", last_index_of, -1);
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let count = cx.argument_count(vm);
    if count == 1 {
        let first = cx.argument(vm, 0);
        if first.is_number() {
            let length = value::to_binary(cx, vm, first)?;
            if length < 0.0 || length.fract() != 0.0 || length > f64::from(u32::MAX) {
                return Err(cx.range_error(vm, "invalid array length".to_owned()));
            }
            return Ok(Value::Object(vm.new_array(length as u32)));
        }
    }
    let array = vm.new_array(count as u32);
    for index in 0..count {
        let value = cx.argument(vm, index);
        vm.heap.object_mut(array).elements[index] = Some(Property::new(value, Key::NONE, PropFlags::empty()));
    }
    Ok(Value::Object(array))
}

fn is_array(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let candidate = cx.argument(vm, 0);
    let is_array = candidate
        .object_id()
        .is_some_and(|id| matches!(vm.heap.object(id).kind, ObjectKind::Array));
    Ok(Value::Bool(is_array))
}

fn this_array(cx: &mut Context<'_>, vm: &mut Engine) -> Run<HeapId> {
    cx.this_object(vm)
}

fn element_count(vm: &Engine, id: HeapId) -> u32 {
    vm.heap.object(id).element_count
}

fn length_get(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let count = element_count(vm, id);
    Ok(i32::try_from(count).map_or(Value::Binary(f64::from(count)), Value::Integer))
}

fn length_set(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let requested = super::arg_binary(cx, vm, 0)?;
    if requested < 0.0 || requested.fract() != 0.0 || requested > f64::from(u32::MAX) {
        return Err(cx.range_error(vm, "invalid array length".to_owned()));
    }
    let keys = &vm.keys;
    vm.heap.object_mut(id).resize_elements(requested as u32, keys);
    Ok(Value::Undefined)
}

fn read_element(cx: &mut Context<'_>, vm: &mut Engine, id: HeapId, index: u32) -> Run<Value> {
    vm.get_element(cx, id, index)
}

fn join_with(cx: &mut Context<'_>, vm: &mut Engine, id: HeapId, separator: &str) -> Run<Value> {
    let count = element_count(vm, id);
    let mut out = String::new();
    for index in 0..count {
        if index > 0 {
            out.push_str(separator);
        }
        let element = read_element(cx, vm, id, index)?;
        if matches!(element, Value::Undefined | Value::Null) {
            continue;
        }
        let piece = value::to_string(cx, vm, element)?;
        out.push_str(value::string_slice(vm, &piece));
    }
    Ok(vm.string_value(&out))
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    join_with(cx, vm, id, ",")
}

fn join(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let separator = match cx.argument(vm, 0) {
        Value::Undefined => ",".to_owned(),
        other => {
            let s = value::to_string(cx, vm, other)?;
            value::string_slice(vm, &s).to_owned()
        }
    };
    join_with(cx, vm, id, &separator)
}

fn pop(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let count = element_count(vm, id);
    if count == 0 {
        return Ok(Value::Undefined);
    }
    let value = read_element(cx, vm, id, count - 1)?;
    let keys = &vm.keys;
    vm.heap.object_mut(id).resize_elements(count - 1, keys);
    Ok(value)
}

fn push(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let count = cx.argument_count(vm);
    for index in 0..count {
        let value = cx.argument(vm, index);
        let at = element_count(vm, id);
        vm.add_element(id, at, value, PropFlags::empty());
    }
    let new_count = element_count(vm, id);
    Ok(i32::try_from(new_count).map_or(Value::Binary(f64::from(new_count)), Value::Integer))
}

fn reverse(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    vm.heap.object_mut(id).elements.reverse();
    Ok(Value::Object(id))
}

fn shift(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let count = element_count(vm, id);
    if count == 0 {
        return Ok(Value::Undefined);
    }
    let value = read_element(cx, vm, id, 0)?;
    let obj = vm.heap.object_mut(id);
    obj.elements.remove(0);
    obj.element_count = count - 1;
    Ok(value)
}

fn unshift(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let count = cx.argument_count(vm);
    for index in (0..count).rev() {
        let value = cx.argument(vm, index);
        let obj = vm.heap.object_mut(id);
        obj.elements.insert(0, Some(Property::new(value, Key::NONE, PropFlags::empty())));
        obj.element_count += 1;
    }
    let new_count = element_count(vm, id);
    Ok(i32::try_from(new_count).map_or(Value::Binary(f64::from(new_count)), Value::Integer))
}

/// Clamps a relative index argument the way the slice family does.
fn relative_index(length: u32, raw: f64) -> u32 {
    if raw.is_nan() {
        return 0;
    }
    if raw < 0.0 {
        let from_end = f64::from(length) + raw;
        if from_end < 0.0 { 0 } else { from_end as u32 }
    } else if raw > f64::from(length) {
        length
    } else {
        raw as u32
    }
}

fn slice(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let length = element_count(vm, id);
    let start = relative_index(length, super::arg_binary(cx, vm, 0)?);
    let end = match cx.argument(vm, 1) {
        Value::Undefined => length,
        other => relative_index(length, value::to_binary(cx, vm, other)?),
    };

    let result = vm.new_array(0);
    let mark = vm.guard_mark();
    vm.guard_id(result);
    let mut out = 0u32;
    for index in start..end {
        let value = read_element(cx, vm, id, index)?;
        vm.add_element(result, out, value, PropFlags::empty());
        out += 1;
    }
    vm.unguard_to(mark);
    Ok(Value::Object(result))
}

fn concat(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let result = vm.new_array(0);
    let mark = vm.guard_mark();
    vm.guard_id(result);

    let mut out = 0u32;
    let mut append = |cx: &mut Context<'_>, vm: &mut Engine, out: &mut u32, value: Value| -> Run<()> {
        if let Some(source) = value.object_id().filter(|s| matches!(vm.heap.object(*s).kind, ObjectKind::Array)) {
            let count = element_count(vm, source);
            for index in 0..count {
                let element = read_element(cx, vm, source, index)?;
                vm.add_element(result, *out, element, PropFlags::empty());
                *out += 1;
            }
        } else {
            vm.add_element(result, *out, value, PropFlags::empty());
            *out += 1;
        }
        Ok(())
    };

    let outcome = (|| {
        append(cx, vm, &mut out, Value::Object(id))?;
        for index in 0..cx.argument_count(vm) {
            let value = cx.argument(vm, index);
            append(cx, vm, &mut out, value)?;
        }
        Ok(Value::Object(result))
    })();
    vm.unguard_to(mark);
    outcome
}

fn index_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let needle = cx.argument(vm, 0);
    let length = element_count(vm, id);
    let start = match cx.argument(vm, 1) {
        Value::Undefined => 0,
        other => relative_index(length, value::to_binary(cx, vm, other)?),
    };
    for index in start..length {
        let element = read_element(cx, vm, id, index)?;
        if value::same(vm, &element, &needle) {
            return Ok(Value::Integer(index as i32));
        }
    }
    Ok(Value::Integer(-1))
}

fn last_index_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_array(cx, vm)?;
    let needle = cx.argument(vm, 0);
    let length = element_count(vm, id);
    for index in (0..length).rev() {
        let element = read_element(cx, vm, id, index)?;
        if value::same(vm, &element, &needle) {
            return Ok(Value::Integer(index as i32));
        }
    }
    Ok(Value::Integer(-1))
}
