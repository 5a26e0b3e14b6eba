//! The `Object` constructor, its statics, and `Object.prototype`.

use super::{add_method, arg_string, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    heap::{HeapData, HeapId},
    key::Key,
    object::{member_ref, read_slot, Obj, ObjFlags, Property, PropertyKey, Slot},
    value::{self, Place, PropFlags, SlotRef, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.object;
    setup_builtin_object(vm, "Object", constructor, 1, prototype);

    let constructor_id = {
        let obj = vm.heap.object(prototype);
        let slot = obj.get_slot(Key::CONSTRUCTOR);
        obj.leaf(slot).and_then(|p| p.value.object_id()).expect("constructor just linked")
    };
    add_method(vm, constructor_id, "getPrototypeOf", get_prototype_of, 1);
    add_method(vm, constructor_id, "getOwnPropertyDescriptor", get_own_property_descriptor, 2);
    add_method(vm, constructor_id, "getOwnPropertyNames", get_own_property_names, 1);
    add_method(vm, constructor_id, "create", object_create, 2);
    add_method(vm, constructor_id, "defineProperty", define_property, 3);
    add_method(vm, constructor_id, "defineProperties", define_properties, 2);
    add_method(vm, constructor_id, "seal", seal, 1);
    add_method(vm, constructor_id, "freeze", freeze, 1);
    add_method(vm, constructor_id, "preventExtensions", prevent_extensions, 1);
    add_method(vm, constructor_id, "isSealed", is_sealed, 1);
    add_method(vm, constructor_id, "isFrozen", is_frozen, 1);
    add_method(vm, constructor_id, "isExtensible", is_extensible, 1);
    add_method(vm, constructor_id, "keys", keys, 1);

    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "toLocaleString", to_string, 0);
    add_method(vm, prototype, "valueOf", value_of, 0);
    add_method(vm, prototype, "hasOwnProperty", has_own_property, 1);
    add_method(vm, prototype, "isPrototypeOf", is_prototype_of, 1);
    add_method(vm, prototype, "propertyIsEnumerable", property_is_enumerable, 1);
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let value = cx.argument(vm, 0);
    match value {
        Value::Undefined | Value::Null => Ok(Value::Object(vm.new_object())),
        other => value::to_object(cx, vm, other),
    }
}

fn checked_object(cx: &mut Context<'_>, vm: &mut Engine, value: Value) -> Run<HeapId> {
    value
        .object_id()
        .ok_or_else(|| cx.type_error(vm, "not an object".to_owned()))
}

fn get_prototype_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    Ok(vm.heap.object(id).prototype.map_or(Value::Undefined, Value::Object))
}

/// Locates an own property (element or member) of `id`.
fn own_slot(vm: &mut Engine, id: HeapId, property: &Value) -> Option<SlotRef> {
    match vm.classify_property(property) {
        PropertyKey::Element(index) => {
            crate::object::element_ref(&vm.heap, &vm.keys, id, index, PropFlags::AS_OWN)
        }
        PropertyKey::Member(key) => member_ref(&vm.heap, id, key, PropFlags::AS_OWN),
    }
}

fn get_own_property_descriptor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let property = cx.argument(vm, 1);
    let property = value::to_primitive(cx, vm, property, value::Hint::String)?;

    let Some(slot_ref) = own_slot(vm, id, &property) else {
        return Ok(Value::Undefined);
    };
    let found = read_slot(&vm.heap, slot_ref);

    let descriptor = vm.new_object();
    let enumerable = !found.flags.contains(PropFlags::HIDDEN);
    let configurable = !found.flags.contains(PropFlags::SEALED);
    if found.flags.intersects(PropFlags::ACCESSOR) {
        let function = found.value.object_id();
        let pair = function.and_then(|f| vm.heap.object(f).function_data().and_then(|d| d.pair));
        let (getter, setter) = if found.flags.contains(PropFlags::GETTER) {
            (function, pair)
        } else {
            (pair, function)
        };
        let obj = vm.heap.object_mut(descriptor);
        obj.add_member(Key::GET, getter.map_or(Value::Undefined, Value::Object), PropFlags::empty());
        obj.add_member(Key::SET, setter.map_or(Value::Undefined, Value::Object), PropFlags::empty());
    } else {
        let obj = vm.heap.object_mut(descriptor);
        obj.add_member(Key::VALUE, found.value, PropFlags::empty());
        obj.add_member(
            Key::WRITABLE,
            Value::Bool(!found.flags.contains(PropFlags::READONLY)),
            PropFlags::empty(),
        );
    }
    let obj = vm.heap.object_mut(descriptor);
    obj.add_member(Key::ENUMERABLE, Value::Bool(enumerable), PropFlags::empty());
    obj.add_member(Key::CONFIGURABLE, Value::Bool(configurable), PropFlags::empty());
    Ok(Value::Object(descriptor))
}

fn get_own_property_names(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let array = vm.new_array(0);

    let mut names: Vec<String> = Vec::new();
    {
        let obj = vm.heap.object(id);
        for (index, element) in obj.elements.iter().enumerate() {
            if element.is_some() {
                names.push(index.to_string());
            }
        }
        for (_, property) in obj.leaves() {
            names.push(vm.keys.text_of(property.key).to_owned());
        }
    }
    for (index, name) in names.into_iter().enumerate() {
        let value = vm.string_value(&name);
        vm.add_element(array, index as u32, value, PropFlags::empty());
    }
    Ok(Value::Object(array))
}

fn object_create(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let proto = cx.argument(vm, 0);
    let prototype = match proto {
        Value::Null => None,
        Value::Object(id) => Some(id),
        _ => return Err(cx.type_error(vm, "not an object or null".to_owned())),
    };
    let id = vm.heap.allocate(HeapData::Object(Obj::new(prototype)));
    let props = cx.argument(vm, 1);
    if !matches!(props, Value::Undefined) {
        define_properties_on(cx, vm, id, props)?;
    }
    Ok(Value::Object(id))
}

/// Reads a property descriptor object into a slot-ready property.
fn descriptor_to_property(
    cx: &mut Context<'_>,
    vm: &mut Engine,
    descriptor: HeapId,
) -> Run<(Value, PropFlags, Option<HeapId>)> {
    let getter = vm.get_member(cx, descriptor, Key::GET)?;
    let setter = vm.get_member(cx, descriptor, Key::SET)?;
    let enumerable = vm.get_member(cx, descriptor, Key::ENUMERABLE)?;
    let configurable = vm.get_member(cx, descriptor, Key::CONFIGURABLE)?;

    let mut flags = PropFlags::empty();
    if !enumerable.is_true(vm) {
        flags |= PropFlags::HIDDEN;
    }
    if !configurable.is_true(vm) {
        flags |= PropFlags::SEALED;
    }

    let is_function = |vm: &Engine, v: &Value| {
        v.object_id().is_some_and(|id| vm.heap.object(id).function_data().is_some())
    };

    if !matches!(getter, Value::Undefined) || !matches!(setter, Value::Undefined) {
        if !matches!(getter, Value::Undefined) && is_function(vm, &getter) {
            let getter_id = getter.object_id().expect("checked function");
            let setter_id = setter.object_id().filter(|_| is_function(vm, &setter));
            if let Some(setter_id) = setter_id {
                if let Some(data) = vm.heap.object_mut(getter_id).function_data_mut() {
                    data.pair = Some(setter_id);
                }
                if let Some(data) = vm.heap.object_mut(setter_id).function_data_mut() {
                    data.pair = Some(getter_id);
                }
            }
            return Ok((Value::Object(getter_id), flags | PropFlags::GETTER, setter_id));
        }
        if is_function(vm, &setter) {
            let setter_id = setter.object_id().expect("checked function");
            return Ok((Value::Object(setter_id), flags | PropFlags::SETTER, None));
        }
        return Err(cx.type_error(vm, "getter or setter is not a function".to_owned()));
    }

    let value = vm.get_member(cx, descriptor, Key::VALUE)?;
    let writable = vm.get_member(cx, descriptor, Key::WRITABLE)?;
    if !writable.is_true(vm) {
        flags |= PropFlags::READONLY;
    }
    Ok((value, flags, None))
}

fn define_property(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let property = cx.argument(vm, 1);
    let property = value::to_primitive(cx, vm, property, value::Hint::String)?;
    let descriptor = cx.argument(vm, 2);
    let descriptor = checked_object(cx, vm, descriptor)?;

    let (value, flags, _) = descriptor_to_property(cx, vm, descriptor)?;

    if let Some(existing_ref) = own_slot(vm, id, &property) {
        let existing = read_slot(&vm.heap, existing_ref);
        if existing.flags.contains(PropFlags::SEALED) {
            // Redefining a non-configurable property is allowed only when
            // nothing observable changes.
            let same_shape = existing.flags == flags
                && (existing.flags.intersects(PropFlags::ACCESSOR) || value::same(vm, &existing.value, &value));
            if !same_shape {
                return Err(cx.type_error(vm, "property is non-configurable".to_owned()));
            }
        }
        match existing_ref.place {
            Place::Slot(slot) => {
                if let Some(Slot::Leaf(property_slot)) =
                    vm.heap.object_mut(existing_ref.owner).slots.get_mut(slot as usize)
                {
                    *property_slot = Property::new(value, existing.key, flags);
                }
            }
            Place::Element(index) => {
                vm.heap.object_mut(existing_ref.owner).elements[index as usize] =
                    Some(Property::new(value, Key::NONE, flags));
            }
        }
        return Ok(Value::Object(id));
    }

    if vm.heap.object(id).flags.contains(ObjFlags::SEALED) {
        return Err(cx.type_error(vm, "object is not extensible".to_owned()));
    }
    vm.add_property(id, property, value, flags);
    Ok(Value::Object(id))
}

fn define_properties_on(cx: &mut Context<'_>, vm: &mut Engine, id: HeapId, props: Value) -> Run<()> {
    let props = checked_object(cx, vm, props)?;
    let entries: Vec<(Key, Value)> = vm
        .heap
        .object(props)
        .leaves()
        .filter(|(_, property)| !property.flags.contains(PropFlags::HIDDEN))
        .map(|(_, property)| (property.key, property.value))
        .collect();
    for (key, descriptor) in entries {
        let descriptor = checked_object(cx, vm, descriptor)?;
        let (value, flags, _) = descriptor_to_property(cx, vm, descriptor)?;
        vm.heap.object_mut(id).add_member(key, value, flags);
    }
    Ok(())
}

fn define_properties(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let props = cx.argument(vm, 1);
    define_properties_on(cx, vm, id, props)?;
    Ok(Value::Object(id))
}

fn each_own_slot(vm: &mut Engine, id: HeapId, apply: fn(&mut Property)) {
    let obj = vm.heap.object_mut(id);
    for element in obj.elements.iter_mut().flatten() {
        apply(element);
    }
    for slot in &mut obj.slots[2..] {
        if let Slot::Leaf(property) = slot {
            apply(property);
        }
    }
}

fn seal(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    vm.heap.object_mut(id).flags |= ObjFlags::SEALED;
    each_own_slot(vm, id, |property| property.flags |= PropFlags::SEALED);
    Ok(Value::Object(id))
}

fn freeze(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    vm.heap.object_mut(id).flags |= ObjFlags::SEALED;
    each_own_slot(vm, id, |property| property.flags |= PropFlags::FROZEN);
    Ok(Value::Object(id))
}

fn prevent_extensions(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    vm.heap.object_mut(id).flags |= ObjFlags::SEALED;
    Ok(Value::Object(id))
}

fn all_slots_have(vm: &Engine, id: HeapId, mask: PropFlags) -> bool {
    let obj = vm.heap.object(id);
    obj.elements
        .iter()
        .flatten()
        .all(|property| property.flags.contains(mask))
        && obj.leaves().all(|(_, property)| property.flags.contains(mask))
}

fn is_sealed(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let sealed = vm.heap.object(id).flags.contains(ObjFlags::SEALED) && all_slots_have(vm, id, PropFlags::SEALED);
    Ok(Value::Bool(sealed))
}

fn is_frozen(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let frozen = vm.heap.object(id).flags.contains(ObjFlags::SEALED) && all_slots_have(vm, id, PropFlags::FROZEN);
    Ok(Value::Bool(frozen))
}

fn is_extensible(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    Ok(Value::Bool(!vm.heap.object(id).flags.contains(ObjFlags::SEALED)))
}

fn keys(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let target = cx.argument(vm, 0);
    let id = checked_object(cx, vm, target)?;
    let array = vm.new_array(0);

    let mut names: Vec<String> = Vec::new();
    {
        let obj = vm.heap.object(id);
        for (index, element) in obj.elements.iter().enumerate() {
            if matches!(element, Some(property) if !property.flags.contains(PropFlags::HIDDEN)) {
                names.push(index.to_string());
            }
        }
        for (_, property) in obj.leaves() {
            if !property.flags.contains(PropFlags::HIDDEN) {
                names.push(vm.keys.text_of(property.key).to_owned());
            }
        }
    }
    for (index, name) in names.into_iter().enumerate() {
        let value = vm.string_value(&name);
        vm.add_element(array, index as u32, value, PropFlags::empty());
    }
    Ok(Value::Object(array))
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let class = match cx.this() {
        Value::Null => "Null".to_owned(),
        Value::Undefined => "Undefined".to_owned(),
        value if value.is_string() => "String".to_owned(),
        value if value.is_number() => "Number".to_owned(),
        Value::Bool(_) => "Boolean".to_owned(),
        Value::Object(id) => vm.heap.object(id).kind.class_name().to_owned(),
        _ => "Object".to_owned(),
    };
    Ok(vm.string_value(&format!("[object {class}]")))
}

fn value_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let this = cx.this();
    value::to_object(cx, vm, this)
}

fn has_own_property(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let this = cx.this();
    let this = value::to_object(cx, vm, this)?;
    let id = this.object_id().expect("to_object yields an object");
    let property = cx.argument(vm, 0);
    let property = value::to_primitive(cx, vm, property, value::Hint::String)?;
    Ok(Value::Bool(own_slot(vm, id, &property).is_some()))
}

fn is_prototype_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let candidate = cx.argument(vm, 0);
    let Some(this_id) = cx.this().object_id() else {
        return Ok(Value::Bool(false));
    };
    let mut current = candidate.object_id().and_then(|id| vm.heap.object(id).prototype);
    while let Some(id) = current {
        if id == this_id {
            return Ok(Value::Bool(true));
        }
        current = vm.heap.object(id).prototype;
    }
    Ok(Value::Bool(false))
}

fn property_is_enumerable(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let this = cx.this();
    let this = value::to_object(cx, vm, this)?;
    let id = this.object_id().expect("to_object yields an object");
    let name = arg_string(cx, vm, 0)?;
    let property = vm.string_value(&name);
    let enumerable = own_slot(vm, id, &property)
        .map(|slot_ref| !read_slot(&vm.heap, slot_ref).flags.contains(PropFlags::HIDDEN));
    Ok(Value::Bool(enumerable.unwrap_or(false)))
}
