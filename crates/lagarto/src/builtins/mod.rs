//! Builtin library installation.
//!
//! Each submodule owns one builtin surface and exposes a `setup` that
//! installs its constructor, prototype and methods through the shared
//! registration helpers below. Setup order matters only in that `Object`
//! and `Function` come first, since everything else hangs off their
//! prototypes (which the engine pre-allocated as bare objects).

pub(crate) mod array;
pub(crate) mod boolean;
pub(crate) mod date;
pub(crate) mod error;
pub(crate) mod function;
pub(crate) mod global;
pub(crate) mod json;
pub(crate) mod math;
pub(crate) mod number;
pub(crate) mod object;
pub(crate) mod regexp;
pub(crate) mod string;

use crate::{
    context::Context,
    engine::Engine,
    heap::HeapId,
    interp::NativeFn,
    key::Key,
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    object::setup(vm);
    function::setup(vm);
    array::setup(vm);
    string::setup(vm);
    boolean::setup(vm);
    number::setup(vm);
    error::setup(vm);
    math::setup(vm);
    date::setup(vm);
    regexp::setup(vm);
    json::setup(vm);
    global::setup(vm);
}

/// Installs a native method as a hidden property.
pub(crate) fn add_method(vm: &mut Engine, target: HeapId, name: &str, native: NativeFn, parameter_count: i32) {
    let function = vm.new_native_function(native, parameter_count, Some(name));
    let key = vm.make_key(name);
    vm.heap
        .object_mut(target)
        .add_member(key, Value::Object(function), PropFlags::HIDDEN);
}

pub(crate) fn add_member(vm: &mut Engine, target: HeapId, name: &str, value: Value, flags: PropFlags) {
    let key = vm.make_key(name);
    vm.heap.object_mut(target).add_member(key, value, flags);
}

/// Wires a constructor/prototype pair: the constructor gains a sealed
/// `prototype`, the prototype a hidden `constructor`, and the constructor
/// lands on the global object under `name`.
pub(crate) fn setup_builtin_object(
    vm: &mut Engine,
    name: &str,
    native: NativeFn,
    parameter_count: i32,
    prototype: HeapId,
) -> HeapId {
    let constructor = vm.new_native_function(native, parameter_count, Some(name));
    vm.heap.object_mut(constructor).add_member(
        Key::PROTOTYPE,
        Value::Object(prototype),
        PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED,
    );
    vm.heap
        .object_mut(prototype)
        .add_member(Key::CONSTRUCTOR, Value::Object(constructor), PropFlags::HIDDEN);
    let key = vm.make_key(name);
    vm.heap
        .object_mut(vm.global)
        .add_member(key, Value::Object(constructor), PropFlags::HIDDEN);
    constructor
}

/// Installs a native getter/setter pair as one accessor property.
pub(crate) fn add_accessor(
    vm: &mut Engine,
    target: HeapId,
    name: &str,
    getter: NativeFn,
    setter: Option<NativeFn>,
) {
    let getter_id = vm.new_native_function(getter, 0, Some(name));
    if let Some(setter) = setter {
        let setter_id = vm.new_native_function(setter, 1, Some(name));
        if let Some(data) = vm.heap.object_mut(getter_id).function_data_mut() {
            data.pair = Some(setter_id);
        }
        if let Some(data) = vm.heap.object_mut(setter_id).function_data_mut() {
            data.pair = Some(getter_id);
        }
    }
    let key = vm.make_key(name);
    vm.heap.object_mut(target).add_member(
        key,
        Value::Object(getter_id),
        PropFlags::GETTER | PropFlags::HIDDEN | PropFlags::SEALED,
    );
}

// --- argument plumbing shared by the method bodies -------------------------

pub(crate) fn arg_string(cx: &mut Context<'_>, vm: &mut Engine, index: usize) -> Run<String> {
    let value = cx.argument(vm, index);
    let string = value::to_string(cx, vm, value)?;
    Ok(value::string_slice(vm, &string).to_owned())
}

pub(crate) fn arg_binary(cx: &mut Context<'_>, vm: &mut Engine, index: usize) -> Run<f64> {
    let value = cx.argument(vm, index);
    value::to_binary(cx, vm, value)
}

pub(crate) fn arg_integer(cx: &mut Context<'_>, vm: &mut Engine, index: usize) -> Run<i32> {
    let value = cx.argument(vm, index);
    value::to_integer(cx, vm, value)
}

/// The receiver as string bytes, for the String prototype methods (which
/// accept any coercible receiver).
pub(crate) fn this_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<String> {
    let this = cx.this();
    if let Some(id) = this.object_id()
        && let crate::object::ObjectKind::String(bytes) = &vm.heap.object(id).kind
    {
        return Ok(bytes.to_string());
    }
    let string = value::to_string(cx, vm, this)?;
    Ok(value::string_slice(vm, &string).to_owned())
}
