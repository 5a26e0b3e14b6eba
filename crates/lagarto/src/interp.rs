//! The op interpreter.
//!
//! Dispatch is a match over the opcode at the context's cursor. Expression
//! ops consume their children by advancing the cursor through [`Context::
//! next`]; statement ops are driven iteratively by [`Context::run_chain_at`]
//! so straight-line statement count does not grow the Rust stack. Thrown
//! values travel as `Err(Thrown)` up to the nearest `try` op, which
//! restores the environment chain before running catch/finally — the
//! non-local-exit model this engine uses instead of jump buffers.

use smallvec::SmallVec;

use crate::{
    chars,
    context::Context,
    engine::Engine,
    heap::{HeapData, HeapId},
    key::Key,
    object::{self, member_ref, read_slot, FuncFlags, FunctionBody, Obj, ObjFlags, ObjectKind, Property},
    op::{Accessor, OpCode, OpList},
    text::Text,
    value::{self, Compare, Hint, Place, PropFlags, SlotRef, Value},
    Run,
};

/// A value in flight between a `throw` and the `try` that catches it.
/// Hosts construct these through the [`Context`] error helpers.
#[derive(Debug)]
pub struct Thrown {
    pub(crate) value: Value,
    /// Source span for uncaught-error reporting.
    pub(crate) text: Text,
}

/// The native function ABI: read arguments through the context, return a
/// value or throw through the enclosing try frame.
pub type NativeFn = fn(&mut Context<'_>, &mut Engine) -> Result<Value, Thrown>;

/// Outcome of one loop-body run with respect to the breaker counter.
enum LoopStep {
    Normal,
    Break,
    Propagate,
}

impl<'a> Context<'a> {
    fn op_value(&self) -> Value {
        self.ops[self.index].value
    }

    fn op_int(&self) -> i32 {
        self.ops[self.index].int_value()
    }

    fn op_key(&self) -> Key {
        self.ops[self.index].key_value()
    }

    fn op_text(&self, offset: usize) -> Text {
        self.ops[self.index + offset].text
    }

    /// Advances to and evaluates the next op (the current op's next
    /// child, in prefix threading).
    pub(crate) fn next(&mut self, vm: &mut Engine) -> Run<Value> {
        self.index += 1;
        self.exec(vm)
    }

    /// Runs a statement chain starting at `start` until a terminator
    /// (`noop`, `popEnvironment`) or a live breaker stops it.
    fn run_chain_at(&mut self, vm: &mut Engine, start: usize) -> Run<Value> {
        self.index = start;
        let mut value = Value::Undefined;
        loop {
            let code = self.ops[self.index].code;
            value = self.exec(vm)?;
            if self.breaker != 0 {
                return Ok(value);
            }
            if matches!(code, OpCode::Noop | OpCode::PopEnvironment) {
                return Ok(value);
            }
            self.index += 1;
        }
    }

    fn exec(&mut self, vm: &mut Engine) -> Run<Value> {
        let op = &self.ops[self.index];
        match op.code {
            OpCode::Noop => Ok(Value::Undefined),
            OpCode::Value => Ok(self.op_value()),
            OpCode::Text => Ok(Value::Text(self.ops[self.index].text)),
            OpCode::GetThis => Ok(self.this_value),
            OpCode::Next => Ok(Value::Undefined),
            OpCode::NextIf => Ok(Value::Undefined),
            OpCode::Debugger => {
                vm.debug_trap = true;
                Ok(Value::Undefined)
            }
            OpCode::Exchange => {
                let value = self.op_value();
                self.next(vm)?;
                Ok(value)
            }

            OpCode::Regexp => self.op_regexp(vm),
            OpCode::Function(_) => self.op_function(vm),
            OpCode::Object => self.op_object_literal(vm),
            OpCode::Array => self.op_array_literal(vm),

            OpCode::CreateLocalRef => self.op_create_local_ref(vm),
            OpCode::GetLocalRefOrNull => {
                let key = self.op_key();
                let text = self.ops[self.index].text;
                Ok(match self.local_ref(vm, key, text, false)? {
                    Some(slot_ref) => Value::Reference(slot_ref),
                    None => Value::Undefined,
                })
            }
            OpCode::GetLocalRef => {
                let key = self.op_key();
                let text = self.ops[self.index].text;
                let slot_ref = self.local_ref(vm, key, text, true)?.expect("required lookup");
                Ok(Value::Reference(slot_ref))
            }
            OpCode::GetLocal => {
                let key = self.op_key();
                let text = self.ops[self.index].text;
                let slot_ref = self.local_ref(vm, key, text, true)?.expect("required lookup");
                Ok(read_slot(&vm.heap, slot_ref).value)
            }
            OpCode::SetLocal => self.op_set_local(vm),
            OpCode::DeleteLocal => self.op_delete_local(vm),

            OpCode::GetLocalSlot => {
                let slot = self.op_int() as u16;
                Ok(env_slot(vm, self.environment, slot))
            }
            OpCode::GetLocalSlotRef => {
                let slot = self.op_int() as u16;
                Ok(Value::Reference(SlotRef { owner: self.environment, place: Place::Slot(slot) }))
            }
            OpCode::SetLocalSlot => {
                let slot = self.op_int() as u16;
                let value = self.next(vm)?;
                let slot_ref = SlotRef { owner: self.environment, place: Place::Slot(slot) };
                self.write_local(vm, slot_ref, value)
            }
            OpCode::DeleteLocalSlot | OpCode::DeleteParentSlot => Ok(Value::Bool(false)),
            OpCode::GetParentSlot => {
                let slot_ref = self.parent_slot_ref(vm);
                Ok(read_slot(&vm.heap, slot_ref).value)
            }
            OpCode::GetParentSlotRef => Ok(Value::Reference(self.parent_slot_ref(vm))),
            OpCode::SetParentSlot => {
                let slot_ref = self.parent_slot_ref(vm);
                let value = self.next(vm)?;
                self.write_local(vm, slot_ref, value)
            }

            OpCode::GetMember => {
                let key = self.op_key();
                let id = self.prepare_object(vm)?;
                vm.get_member(self, id, key)
            }
            OpCode::GetMemberRef => self.op_get_member_ref(vm),
            OpCode::SetMember => {
                let text = self.ops[self.index].text;
                let key = self.op_key();
                let id = self.prepare_object(vm)?;
                let mark = vm.guard_mark();
                vm.guard_id(id);
                let value = self.next(vm)?;
                self.text = text;
                let result = vm.put_member(self, id, key, value);
                vm.unguard_to(mark);
                result?;
                Ok(value)
            }
            OpCode::DeleteMember => {
                let text = self.ops[self.index].text;
                let key = self.op_key();
                let id = self.prepare_object(vm)?;
                let deleted = vm.heap.object_mut(id).delete_member(key);
                if !deleted && self.strict {
                    self.text = text;
                    let name = vm.keys.text_of(key).to_owned();
                    return Err(self.type_error(vm, format!("'{name}' is non-configurable")));
                }
                Ok(Value::Bool(deleted))
            }
            OpCode::CallMember => self.op_call_member(vm),

            OpCode::GetProperty => {
                let (id, property) = self.prepare_object_property(vm)?;
                vm.get_property(self, id, property)
            }
            OpCode::GetPropertyRef => self.op_get_property_ref(vm),
            OpCode::SetProperty => {
                let text = self.ops[self.index].text;
                let (id, property) = self.prepare_object_property(vm)?;
                let mark = vm.guard_mark();
                vm.guard_id(id);
                vm.guard(&property);
                let value = self.next(vm)?;
                self.text = text;
                let result = vm.put_property(self, id, property, value);
                vm.unguard_to(mark);
                result?;
                Ok(value)
            }
            OpCode::DeleteProperty => {
                let text = self.ops[self.index].text;
                let (id, property) = self.prepare_object_property(vm)?;
                let deleted = vm.delete_property(id, property);
                if !deleted && self.strict {
                    self.text = text;
                    let shown = value_snippet(vm, &property);
                    return Err(self.type_error(vm, format!("'{shown}' is non-configurable")));
                }
                Ok(Value::Bool(deleted))
            }
            OpCode::CallProperty => self.op_call_property(vm),

            OpCode::PushEnvironment => {
                let value = self.op_value();
                let scope = Obj::new(Some(self.ref_object.unwrap_or(self.environment)));
                let scope = vm.heap.allocate(HeapData::Object(scope));
                if self.ref_object.is_some() {
                    self.ref_object = Some(scope);
                } else {
                    self.environment = scope;
                }
                Ok(value)
            }
            OpCode::PopEnvironment => {
                self.pop_environment(vm);
                Ok(Value::Undefined)
            }

            OpCode::TypeOf => {
                let target = self.next(vm)?;
                let resolved = match target {
                    Value::Reference(slot_ref) => read_slot(&vm.heap, slot_ref).value,
                    other => other,
                };
                Ok(Value::Text(value::type_of(vm, &resolved)))
            }

            OpCode::Equal => self.op_equality(vm, false, false),
            OpCode::NotEqual => self.op_equality(vm, false, true),
            OpCode::Identical => self.op_equality(vm, true, false),
            OpCode::NotIdentical => self.op_equality(vm, true, true),
            OpCode::Less => self.op_compare(vm, Compare::Less),
            OpCode::LessOrEqual => self.op_compare(vm, Compare::LessOrEqual),
            OpCode::More => self.op_compare(vm, Compare::More),
            OpCode::MoreOrEqual => self.op_compare(vm, Compare::MoreOrEqual),
            OpCode::InstanceOf => self.op_instance_of(vm),
            OpCode::In => self.op_in(vm),

            OpCode::Add => {
                let a = self.next(vm)?;
                let mark = vm.guard_mark();
                vm.guard(&a);
                let b = self.next(vm)?;
                vm.guard(&b);
                let result = value::add(self, vm, a, b);
                vm.unguard_to(mark);
                result
            }
            OpCode::Minus => {
                let a = self.next(vm)?;
                let mark = vm.guard_mark();
                vm.guard(&a);
                let b = self.next(vm)?;
                vm.guard(&b);
                let result = value::subtract(self, vm, a, b);
                vm.unguard_to(mark);
                result
            }
            OpCode::Multiply => self.op_arithmetic(vm, |a, b| a * b),
            OpCode::Divide => self.op_arithmetic(vm, |a, b| a / b),
            OpCode::Modulo => self.op_arithmetic(vm, |a, b| a % b),
            OpCode::LeftShift => self.op_bitwise(vm, |a, b| a.wrapping_shl(b as u32 & 31)),
            OpCode::RightShift => self.op_bitwise(vm, |a, b| a.wrapping_shr(b as u32 & 31)),
            OpCode::UnsignedRightShift => {
                let (a, b) = self.integer_operands(vm)?;
                let shifted = (a as u32).wrapping_shr(b as u32 & 31);
                Ok(i32::try_from(shifted).map_or(Value::Binary(f64::from(shifted)), Value::Integer))
            }
            OpCode::BitwiseAnd => self.op_bitwise(vm, |a, b| a & b),
            OpCode::BitwiseXor => self.op_bitwise(vm, |a, b| a ^ b),
            OpCode::BitwiseOr => self.op_bitwise(vm, |a, b| a | b),

            OpCode::LogicalAnd => {
                let count = self.op_int();
                let a = self.next(vm)?;
                if a.is_true(vm) {
                    self.next(vm)
                } else {
                    self.index += count as usize;
                    Ok(a)
                }
            }
            OpCode::LogicalOr => {
                let count = self.op_int();
                let a = self.next(vm)?;
                if a.is_true(vm) {
                    self.index += count as usize;
                    Ok(a)
                } else {
                    self.next(vm)
                }
            }

            OpCode::Positive => {
                let v = self.next(vm)?;
                let binary = value::to_binary(self, vm, v)?;
                Ok(Value::Binary(binary))
            }
            OpCode::Negative => {
                let v = self.next(vm)?;
                let binary = value::to_binary(self, vm, v)?;
                Ok(Value::Binary(-binary))
            }
            OpCode::Invert => {
                let v = self.next(vm)?;
                let integer = value::to_integer(self, vm, v)?;
                Ok(Value::Integer(!integer))
            }
            OpCode::LogicalNot => {
                let v = self.next(vm)?;
                Ok(Value::Bool(!v.is_true(vm)))
            }

            OpCode::IncrementRef => self.op_crement(vm, 1.0, false),
            OpCode::DecrementRef => self.op_crement(vm, -1.0, false),
            OpCode::PostIncrementRef => self.op_crement(vm, 1.0, true),
            OpCode::PostDecrementRef => self.op_crement(vm, -1.0, true),

            OpCode::AddAssignRef => self.op_compound_assign(vm, CompoundOp::Add),
            OpCode::MinusAssignRef => self.op_compound_assign(vm, CompoundOp::Subtract),
            OpCode::MultiplyAssignRef => self.op_compound_assign(vm, CompoundOp::Multiply),
            OpCode::DivideAssignRef => self.op_compound_assign(vm, CompoundOp::Divide),
            OpCode::ModuloAssignRef => self.op_compound_assign(vm, CompoundOp::Modulo),
            OpCode::LeftShiftAssignRef => self.op_compound_assign(vm, CompoundOp::LeftShift),
            OpCode::RightShiftAssignRef => self.op_compound_assign(vm, CompoundOp::RightShift),
            OpCode::UnsignedRightShiftAssignRef => self.op_compound_assign(vm, CompoundOp::UnsignedRightShift),
            OpCode::BitAndAssignRef => self.op_compound_assign(vm, CompoundOp::BitAnd),
            OpCode::BitXorAssignRef => self.op_compound_assign(vm, CompoundOp::BitXor),
            OpCode::BitOrAssignRef => self.op_compound_assign(vm, CompoundOp::BitOr),

            OpCode::Call => self.op_call(vm),
            OpCode::Construct => self.op_construct(vm),
            OpCode::Eval => self.op_eval(vm),

            OpCode::Jump => {
                let offset = self.op_int();
                self.index = add_offset(self.index, offset);
                Ok(Value::Undefined)
            }
            OpCode::JumpIf => {
                let offset = self.op_int();
                let v = self.next(vm)?;
                if v.is_true(vm) {
                    self.index = add_offset(self.index, offset);
                }
                Ok(Value::Undefined)
            }
            OpCode::BranchIfNot => {
                let offset = self.op_int();
                let v = self.next(vm)?;
                if !v.is_true(vm) {
                    self.index = add_offset(self.index, offset);
                }
                Ok(Value::Undefined)
            }
            OpCode::JumpIfNot => self.op_conditional(vm),

            OpCode::Result => {
                let v = self.next(vm)?;
                self.breaker = -1;
                Ok(v)
            }
            OpCode::ResultVoid => {
                self.breaker = -1;
                Ok(Value::Undefined)
            }
            OpCode::Breaker => {
                self.breaker = self.op_int();
                Ok(Value::Undefined)
            }

            OpCode::Expression => {
                let v = self.next(vm)?;
                vm.set_result(v);
                Ok(Value::Undefined)
            }
            OpCode::AutoreleaseExpression => {
                let v = self.next(vm)?;
                vm.set_result(v);
                self.safepoint(vm);
                Ok(Value::Undefined)
            }
            OpCode::AutoreleaseDiscard => {
                self.next(vm)?;
                self.safepoint(vm);
                Ok(Value::Undefined)
            }
            OpCode::Discard => {
                self.next(vm)?;
                Ok(Value::Undefined)
            }
            OpCode::DiscardN => {
                let count = self.op_int();
                for _ in 0..count {
                    self.next(vm)?;
                }
                Ok(Value::Undefined)
            }

            OpCode::Try => self.op_try(vm),
            OpCode::Throw => {
                self.text = self.op_text(1);
                let value = self.next(vm)?;
                Err(Thrown { value, text: self.text })
            }
            OpCode::With => self.op_with(vm),
            OpCode::SwitchOp => self.op_switch(vm),

            OpCode::Iterate => self.op_iterate(vm),
            OpCode::IterateLessRef => self.op_iterate_integer(vm, Compare::Less),
            OpCode::IterateLessOrEqualRef => self.op_iterate_integer(vm, Compare::LessOrEqual),
            OpCode::IterateMoreRef => self.op_iterate_integer(vm, Compare::More),
            OpCode::IterateMoreOrEqualRef => self.op_iterate_integer(vm, Compare::MoreOrEqual),
            OpCode::IterateInRef => self.op_iterate_in(vm),
        }
    }

    // --- local access -----------------------------------------------------

    /// Scope lookup: the environment chain first, then the active `with`
    /// fallback chain in sloppy code.
    fn local_ref(&mut self, vm: &mut Engine, key: Key, text: Text, required: bool) -> Run<Option<SlotRef>> {
        let mut found = member_ref(&vm.heap, self.environment, key, PropFlags::empty());
        if !self.strict {
            self.inside_env_object = self.ref_object.is_some();
            if found.is_none()
                && let Some(fallback) = self.ref_object
            {
                self.inside_env_object = false;
                found = member_ref(&vm.heap, fallback, key, PropFlags::empty());
            }
        }
        if found.is_none() && required {
            self.text = text;
            let name = vm.keys.text_of(key).to_owned();
            return Err(self.reference_error(vm, format!("'{name}' is not defined")));
        }
        Ok(found)
    }

    fn op_create_local_ref(&mut self, vm: &mut Engine) -> Run<Value> {
        let key = self.op_key();
        let text = self.ops[self.index].text;
        let found = self.local_ref(vm, key, text, self.strict)?;
        let slot_ref = match found {
            Some(slot_ref) => slot_ref,
            None => {
                let slot = vm.heap.object_mut(vm.global).add_member(key, Value::Undefined, PropFlags::empty());
                SlotRef { owner: vm.global, place: Place::Slot(slot) }
            }
        };
        Ok(Value::Reference(slot_ref))
    }

    fn op_set_local(&mut self, vm: &mut Engine) -> Run<Value> {
        let text = self.ops[self.index].text;
        let key = self.op_key();
        let value = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&value);
        let found = self.local_ref(vm, key, text, self.strict);
        vm.unguard_to(mark);
        let slot_ref = match found? {
            Some(slot_ref) => slot_ref,
            None => {
                let slot = vm.heap.object_mut(vm.global).add_member(key, Value::Undefined, PropFlags::empty());
                SlotRef { owner: vm.global, place: Place::Slot(slot) }
            }
        };
        self.write_local(vm, slot_ref, value)
    }

    fn write_local(&mut self, vm: &mut Engine, slot_ref: SlotRef, value: Value) -> Run<Value> {
        let property = read_slot(&vm.heap, slot_ref);
        if property.flags.contains(PropFlags::READONLY) {
            if self.strict {
                let name = vm.keys.text_of(property.key).to_owned();
                return Err(self.type_error(vm, format!("'{name}' is read-only")));
            }
            return Ok(value);
        }
        object::write_slot(&mut vm.heap, slot_ref, Property::new(value, property.key, property.flags));
        Ok(value)
    }

    fn op_delete_local(&mut self, vm: &mut Engine) -> Run<Value> {
        let key = self.op_key();
        let text = self.ops[self.index].text;
        let Some(slot_ref) = self.local_ref(vm, key, text, false)? else {
            return Ok(Value::Bool(true));
        };
        let property = read_slot(&vm.heap, slot_ref);
        if property.flags.contains(PropFlags::SEALED) {
            return Ok(Value::Bool(false));
        }
        vm.heap.object_mut(slot_ref.owner).delete_member(key);
        Ok(Value::Bool(true))
    }

    fn parent_slot_ref(&self, vm: &Engine) -> SlotRef {
        let packed = self.op_int();
        let slot = (packed & 0xffff) as u16;
        let mut count = packed >> 16;
        let mut object = self.environment;
        while count > 0 {
            object = vm.heap.object(object).prototype.expect("parent scope exists");
            count -= 1;
        }
        SlotRef { owner: object, place: Place::Slot(slot) }
    }

    fn pop_environment(&mut self, vm: &Engine) {
        if let Some(scope) = self.ref_object {
            self.ref_object = vm.heap.object(scope).prototype;
        } else {
            self.environment = vm.heap.object(self.environment).prototype.expect("scope chain has a parent");
        }
    }

    // --- member access ----------------------------------------------------

    /// Evaluates the object child and boxes primitives, per member-access
    /// semantics.
    fn prepare_object(&mut self, vm: &mut Engine) -> Run<HeapId> {
        let text = self.op_text(1);
        let value = self.next(vm)?;
        let object = if value.is_primitive() {
            self.text = text;
            value::to_object(self, vm, value)?
        } else {
            value
        };
        Ok(object.object_id().expect("to_object yields an object"))
    }

    /// Evaluates object and subscript children; object subscripts coerce
    /// to primitives with string preference.
    fn prepare_object_property(&mut self, vm: &mut Engine) -> Run<(HeapId, Value)> {
        let id = self.prepare_object(vm)?;
        let text = self.op_text(1);
        let mark = vm.guard_mark();
        vm.guard_id(id);
        let property = self.next(vm)?;
        let property = if property.is_object() {
            self.text = text;
            let coerced = value::to_primitive(self, vm, property, Hint::String);
            vm.unguard_to(mark);
            coerced?
        } else {
            vm.unguard_to(mark);
            property
        };
        Ok((id, property))
    }

    fn op_get_member_ref(&mut self, vm: &mut Engine) -> Run<Value> {
        let text = self.ops[self.index].text;
        let key = self.op_key();
        let id = self.prepare_object(vm)?;
        self.ref_object = Some(id);
        let slot_ref = match member_ref(&vm.heap, id, key, PropFlags::AS_OWN) {
            Some(slot_ref) => slot_ref,
            None => {
                if vm.heap.object(id).flags.contains(ObjFlags::SEALED) {
                    self.text = text;
                    return Err(self.type_error(vm, "object is not extensible".to_owned()));
                }
                let slot = vm.heap.object_mut(id).add_member(key, Value::Undefined, PropFlags::empty());
                SlotRef { owner: id, place: Place::Slot(slot) }
            }
        };
        Ok(Value::Reference(slot_ref))
    }

    fn op_get_property_ref(&mut self, vm: &mut Engine) -> Run<Value> {
        let text = self.op_text(1);
        let (id, property) = self.prepare_object_property(vm)?;
        self.ref_object = Some(id);

        let existing = match vm.classify_property(&property) {
            object::PropertyKey::Element(index) => {
                object::element_ref(&vm.heap, &vm.keys, id, index, PropFlags::AS_OWN)
            }
            object::PropertyKey::Member(key) => member_ref(&vm.heap, id, key, PropFlags::AS_OWN),
        };
        let slot_ref = match existing {
            Some(slot_ref) => slot_ref,
            None => {
                if vm.heap.object(id).flags.contains(ObjFlags::SEALED) {
                    self.text = text;
                    return Err(self.type_error(vm, "object is not extensible".to_owned()));
                }
                vm.add_property(id, property, Value::Undefined, PropFlags::empty());
                match vm.classify_property(&property) {
                    object::PropertyKey::Element(index) => {
                        object::element_ref(&vm.heap, &vm.keys, id, index, PropFlags::AS_OWN)
                            .expect("freshly added element")
                    }
                    object::PropertyKey::Member(key) => {
                        member_ref(&vm.heap, id, key, PropFlags::AS_OWN).expect("freshly added member")
                    }
                }
            }
        };
        Ok(Value::Reference(slot_ref))
    }

    // --- operators --------------------------------------------------------

    fn op_equality(&mut self, vm: &mut Engine, strict: bool, negate: bool) -> Run<Value> {
        let a = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&a);
        let b = self.next(vm)?;
        vm.guard(&b);
        let result = if strict {
            Ok(value::same(vm, &a, &b))
        } else {
            value::equals(self, vm, a, b)
        };
        vm.unguard_to(mark);
        Ok(Value::Bool(result? != negate))
    }

    fn op_compare(&mut self, vm: &mut Engine, op: Compare) -> Run<Value> {
        let a = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&a);
        let b = self.next(vm)?;
        vm.guard(&b);
        let result = value::compare(self, vm, op, a, b);
        vm.unguard_to(mark);
        Ok(Value::Bool(result?))
    }

    fn op_arithmetic(&mut self, vm: &mut Engine, op: fn(f64, f64) -> f64) -> Run<Value> {
        let a = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&a);
        let b = self.next(vm)?;
        vm.guard(&b);
        let result = (|| {
            let na = value::to_binary(self, vm, a)?;
            let nb = value::to_binary(self, vm, b)?;
            Ok(Value::Binary(op(na, nb)))
        })();
        vm.unguard_to(mark);
        result
    }

    fn integer_operands(&mut self, vm: &mut Engine) -> Run<(i32, i32)> {
        let a = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&a);
        let b = self.next(vm)?;
        vm.guard(&b);
        let result = (|| {
            let ia = value::to_integer(self, vm, a)?;
            let ib = value::to_integer(self, vm, b)?;
            Ok((ia, ib))
        })();
        vm.unguard_to(mark);
        result
    }

    fn op_bitwise(&mut self, vm: &mut Engine, op: fn(i32, i32) -> i32) -> Run<Value> {
        let (a, b) = self.integer_operands(vm)?;
        Ok(Value::Integer(op(a, b)))
    }

    fn op_instance_of(&mut self, vm: &mut Engine) -> Run<Value> {
        let a = self.next(vm)?;
        let text = self.op_text(1);
        let mark = vm.guard_mark();
        vm.guard(&a);
        let b = self.next(vm)?;
        vm.unguard_to(mark);

        let Some(constructor) = b.object_id().filter(|id| vm.heap.object(*id).function_data().is_some()) else {
            self.text = text;
            return Err(self.type_error(vm, "not a function".to_owned()));
        };
        let prototype = vm.get_member(self, constructor, Key::PROTOTYPE)?;
        let Some(prototype) = prototype.object_id() else {
            self.text = text;
            return Err(self.type_error(vm, "prototype is not an object".to_owned()));
        };

        let mut current = a.object_id();
        while let Some(id) = current {
            let parent = vm.heap.object(id).prototype;
            if parent == Some(prototype) {
                return Ok(Value::Bool(true));
            }
            current = parent;
        }
        Ok(Value::Bool(false))
    }

    fn op_in(&mut self, vm: &mut Engine) -> Run<Value> {
        let property = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&property);
        let target = self.next(vm)?;
        vm.unguard_to(mark);

        let Some(id) = target.object_id() else {
            return Err(self.type_error(vm, "invalid 'in' operand".to_owned()));
        };
        let found = match vm.classify_property(&property) {
            object::PropertyKey::Element(index) => {
                object::element_ref(&vm.heap, &vm.keys, id, index, PropFlags::empty()).is_some()
            }
            object::PropertyKey::Member(key) => member_ref(&vm.heap, id, key, PropFlags::empty()).is_some(),
        };
        Ok(Value::Bool(found))
    }

    fn op_crement(&mut self, vm: &mut Engine, step: f64, post: bool) -> Run<Value> {
        let target = self.next(vm)?;
        let Value::Reference(slot_ref) = target else {
            panic!("crement ops take a reference child")
        };
        let old = vm.get_value(self, slot_ref.owner, Some(slot_ref))?;
        let old = value::to_binary(self, vm, old)?;
        vm.put_value(self, slot_ref.owner, slot_ref, Value::Binary(old + step))?;
        Ok(Value::Binary(if post { old } else { old + step }))
    }

    fn op_compound_assign(&mut self, vm: &mut Engine, op: CompoundOp) -> Run<Value> {
        let target = self.next(vm)?;
        let Value::Reference(slot_ref) = target else {
            panic!("compound assignment takes a reference child")
        };
        let b = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&b);
        let result = (|| {
            let a = vm.get_value(self, slot_ref.owner, Some(slot_ref))?;
            vm.guard(&a);
            let value = match op {
                CompoundOp::Add => value::add(self, vm, a, b)?,
                CompoundOp::Subtract => value::subtract(self, vm, a, b)?,
                CompoundOp::Multiply | CompoundOp::Divide | CompoundOp::Modulo => {
                    let na = value::to_binary(self, vm, a)?;
                    let nb = value::to_binary(self, vm, b)?;
                    Value::Binary(match op {
                        CompoundOp::Multiply => na * nb,
                        CompoundOp::Divide => na / nb,
                        _ => na % nb,
                    })
                }
                CompoundOp::UnsignedRightShift => {
                    let ia = value::to_integer(self, vm, a)?;
                    let ib = value::to_integer(self, vm, b)?;
                    let shifted = (ia as u32).wrapping_shr(ib as u32 & 31);
                    i32::try_from(shifted).map_or(Value::Binary(f64::from(shifted)), Value::Integer)
                }
                _ => {
                    let ia = value::to_integer(self, vm, a)?;
                    let ib = value::to_integer(self, vm, b)?;
                    Value::Integer(match op {
                        CompoundOp::LeftShift => ia.wrapping_shl(ib as u32 & 31),
                        CompoundOp::RightShift => ia.wrapping_shr(ib as u32 & 31),
                        CompoundOp::BitAnd => ia & ib,
                        CompoundOp::BitXor => ia ^ ib,
                        _ => ia | ib,
                    })
                }
            };
            vm.guard(&value);
            vm.put_value(self, slot_ref.owner, slot_ref, value)?;
            Ok(value)
        })();
        vm.unguard_to(mark);
        result
    }

    /// Expression conditional: `[JumpIfNot(n)][cond][true…][Jump(m)][false…]`.
    /// Consumes the whole form and leaves the cursor at its last op.
    fn op_conditional(&mut self, vm: &mut Engine) -> Run<Value> {
        let offset = self.op_int() as usize;
        let condition = self.next(vm)?;
        if condition.is_true(vm) {
            let value = self.next(vm)?;
            // Skip the else-branch via the trailing jump's operand.
            self.index += 1;
            let skip = self.op_int() as usize;
            self.index += skip;
            Ok(value)
        } else {
            // Relative to the cursor after the condition, per the
            // threaded-jump convention.
            self.index += offset;
            self.next(vm)
        }
    }

    // --- literals ---------------------------------------------------------

    fn op_regexp(&mut self, vm: &mut Engine) -> Run<Value> {
        let text = self.ops[self.index].text;
        let source = text.slice(&vm.inputs).to_owned();
        match crate::builtins::regexp::create_from_literal(vm, &source) {
            Ok(id) => Ok(Value::Object(id)),
            Err(message) => {
                self.text = text;
                Err(self.syntax_error(vm, message))
            }
        }
    }

    /// Closure creation: copy the compiled function, re-prototype its
    /// environment onto the current scope, and give it a fresh
    /// `.prototype` object.
    fn op_function(&mut self, vm: &mut Engine) -> Run<Value> {
        let template_id = self.op_value().object_id().expect("function op holds the template");

        let mut obj = vm.heap.object(template_id).clone();
        obj.prototype = Some(template_id);

        let data = obj.function_data_mut().expect("template is a function");
        let mut environment = vm.heap.object(data.environment).clone();
        environment.prototype = Some(self.environment);
        data.environment = vm.heap.allocate(HeapData::Object(environment));
        if let Some(scope) = self.ref_object {
            data.ref_object = Some(scope);
        }

        let function = vm.heap.allocate(HeapData::Object(obj));
        let mark = vm.guard_mark();
        vm.guard_id(function);

        let mut prototype = Obj::new(Some(vm.prototypes.object));
        prototype.add_member(Key::CONSTRUCTOR, Value::Object(function), PropFlags::HIDDEN);
        let prototype = vm.heap.allocate(HeapData::Object(prototype));
        vm.heap
            .object_mut(function)
            .add_member(Key::PROTOTYPE, Value::Object(prototype), PropFlags::SEALED);
        vm.unguard_to(mark);

        Ok(Value::Object(function))
    }

    fn op_object_literal(&mut self, vm: &mut Engine) -> Run<Value> {
        let count = self.op_int();
        let id = vm.new_object();
        let mark = vm.guard_mark();
        vm.guard_id(id);

        let result = (|| {
            for _ in 0..count {
                let property = self.next(vm)?;
                let accessor = match self.ops[self.index + 1].code {
                    OpCode::Function(accessor) => accessor,
                    _ => Accessor::None,
                };
                let value = self.next(vm)?;
                match (property, accessor) {
                    (Value::Key(key), Accessor::None) => {
                        vm.heap.object_mut(id).add_member(key, value, PropFlags::empty());
                    }
                    (Value::Key(key), accessor) => {
                        let function = value.object_id().expect("accessors are functions");
                        vm.define_accessor(id, key, function, accessor == Accessor::Getter);
                    }
                    (Value::Integer(index), _) => {
                        vm.add_element(id, index as u32, value, PropFlags::empty());
                    }
                    _ => unreachable!("object literal keys are keys or indices"),
                }
            }
            Ok(Value::Object(id))
        })();
        vm.unguard_to(mark);
        result
    }

    fn op_array_literal(&mut self, vm: &mut Engine) -> Run<Value> {
        let length = self.op_int() as u32;
        let id = vm.new_array(length);
        let mark = vm.guard_mark();
        vm.guard_id(id);
        let result = (|| {
            for index in 0..length {
                let value = self.next(vm)?;
                vm.heap.object_mut(id).elements[index as usize] =
                    Some(Property::new(value, Key::NONE, PropFlags::empty()));
            }
            Ok(Value::Object(id))
        })();
        vm.unguard_to(mark);
        result
    }

    // --- calls ------------------------------------------------------------

    fn evaluate_arguments(&mut self, vm: &mut Engine, count: i32) -> Run<SmallVec<[Value; 8]>> {
        let mut args = SmallVec::new();
        for _ in 0..count {
            let value = self.next(vm)?;
            vm.guard(&value);
            args.push(value);
        }
        Ok(args)
    }

    fn op_call(&mut self, vm: &mut Engine) -> Run<Value> {
        let text_call = self.ops[self.index].text;
        let count = self.op_int();
        let text = self.op_text(1);
        self.inside_env_object = false;
        let callee = self.next(vm)?;

        let this = if self.inside_env_object {
            self.ref_object.map_or(Value::Undefined, Value::Object)
        } else {
            Value::Undefined
        };

        let mark = vm.guard_mark();
        vm.guard(&callee);
        let args = self.evaluate_arguments(vm, count)?;
        self.text = text;
        self.text_call = Some(text_call);
        let result = call_function_value(self, vm, callee, this, &args, false);
        vm.unguard_to(mark);
        result
    }

    fn op_call_member(&mut self, vm: &mut Engine) -> Run<Value> {
        let text_call = self.ops[self.index].text;
        let count = self.op_int();
        // The getMember op that follows supplies the key and its span;
        // its children (the receiver) are consumed from here.
        self.index += 1;
        let text = self.ops[self.index].text;
        let key = self.op_key();
        let id = self.prepare_object(vm)?;

        let mark = vm.guard_mark();
        vm.guard_id(id);
        let result = (|| {
            self.text = text;
            let callee = vm.get_member(self, id, key)?;
            vm.guard(&callee);
            let args = self.evaluate_arguments(vm, count)?;
            self.text = text;
            self.text_call = Some(text_call);
            call_function_value(self, vm, callee, Value::Object(id), &args, false)
        })();
        vm.unguard_to(mark);
        result
    }

    fn op_call_property(&mut self, vm: &mut Engine) -> Run<Value> {
        let text_call = self.ops[self.index].text;
        let count = self.op_int();
        self.index += 1;
        let text = self.ops[self.index].text;
        let (id, property) = self.prepare_object_property(vm)?;

        let mark = vm.guard_mark();
        vm.guard_id(id);
        vm.guard(&property);
        let result = (|| {
            self.text = text;
            let callee = vm.get_property(self, id, property)?;
            vm.guard(&callee);
            let args = self.evaluate_arguments(vm, count)?;
            self.text = text;
            self.text_call = Some(text_call);
            call_function_value(self, vm, callee, Value::Object(id), &args, false)
        })();
        vm.unguard_to(mark);
        result
    }

    fn op_construct(&mut self, vm: &mut Engine) -> Run<Value> {
        let text_call = self.ops[self.index].text;
        let count = self.op_int();
        let text = self.op_text(1);
        let callee = self.next(vm)?;

        let mark = vm.guard_mark();
        vm.guard(&callee);
        let result = (|| {
            let args = self.evaluate_arguments(vm, count)?;
            self.text = text;
            self.text_call = Some(text_call);

            let Some(function) = callee.object_id().filter(|id| vm.heap.object(*id).function_data().is_some())
            else {
                let shown = text.slice(&vm.inputs).to_owned();
                return Err(self.type_error(vm, format!("'{shown}' is not a constructor")));
            };

            let prototype = vm.get_member(self, function, Key::PROTOTYPE)?;
            let prototype = prototype.object_id().unwrap_or(vm.prototypes.object);
            let this = vm.heap.allocate(HeapData::Object(Obj::new(Some(prototype))));
            vm.guard_id(this);

            let result = call_function(self, vm, function, Value::Object(this), &args, true)?;
            Ok(if result.is_object() { result } else { Value::Object(this) })
        })();
        vm.unguard_to(mark);
        result
    }

    /// `eval` in the direct form: reparse the argument in the caller's
    /// scope and run it against the caller's `this`.
    fn op_eval(&mut self, vm: &mut Engine) -> Run<Value> {
        let count = self.op_int();
        if count == 0 {
            return Ok(Value::Undefined);
        }
        let first = self.next(vm)?;
        for _ in 1..count {
            self.next(vm)?;
        }
        if !first.is_string() {
            return Ok(first);
        }

        let source = value::string_slice(vm, &first).to_owned();
        let input_id = vm.inputs.add("(eval)", source);
        let parser = crate::parser::Parser::new(vm, input_id, vm.sloppy_mode);
        let program = parser.parse(vm, self.environment, self.strict);
        vm.heap.retain(program);

        let previous = vm.take_result();
        let mark = vm.guard_mark();
        vm.guard(&previous);
        let outcome = run_program(self, vm, program, self.this_value);
        let value = vm.take_result();
        vm.set_result(previous);
        vm.unguard_to(mark);
        vm.heap.release(program);
        outcome?;
        Ok(value)
    }

    // --- structured control ----------------------------------------------

    fn op_try(&mut self, vm: &mut Engine) -> Run<Value> {
        let base = self.index;
        let count = self.op_int() as usize;
        let end = base + count;
        let catch_jump = end + 1;

        let saved_environment = self.environment;
        let saved_ref_object = self.ref_object;
        let mark = vm.guard_mark();

        let mut rethrow: Option<Thrown> = None;
        let mut value = Value::Undefined;

        match self.run_chain_at(vm, base + 1) {
            Ok(v) => value = v,
            Err(thrown) => {
                self.environment = saved_environment;
                self.ref_object = saved_ref_object;
                self.breaker = 0;
                vm.guard(&thrown.value);

                if self.ops[catch_jump + 1].code == OpCode::PushEnvironment {
                    // Bind the caught value in a one-slot scope and run
                    // the catch clause.
                    self.index = catch_jump + 1;
                    let key = self.exec(vm)?;
                    let Value::Key(key) = key else {
                        unreachable!("pushEnvironment carries the catch binding")
                    };
                    let scope = self.ref_object.unwrap_or(self.environment);
                    vm.heap.object_mut(scope).add_member(key, thrown.value, PropFlags::SEALED);

                    match self.run_chain_at(vm, catch_jump + 2) {
                        Ok(v) => {
                            value = v;
                            if self.breaker != 0 {
                                self.pop_environment(vm);
                            }
                        }
                        Err(inner) => {
                            self.pop_environment(vm);
                            vm.guard(&inner.value);
                            rethrow = Some(inner);
                        }
                    }
                } else {
                    rethrow = Some(thrown);
                }
            }
        }

        self.environment = saved_environment;
        self.ref_object = saved_ref_object;
        let saved_breaker = self.breaker;
        self.breaker = 0;
        vm.guard(&value);

        // The catch-bypass jump points past the catch clause at the
        // finally block (or the closing noop).
        self.index = catch_jump;
        let skip = self.op_int() as usize;
        let finally_result = self.run_chain_at(vm, catch_jump + skip + 1);
        vm.unguard_to(mark);
        let finally_value = finally_result?;

        if self.breaker != 0 {
            return Ok(finally_value);
        }
        if let Some(thrown) = rethrow {
            return Err(thrown);
        }
        if saved_breaker != 0 {
            self.breaker = saved_breaker;
        }
        Ok(value)
    }

    fn op_with(&mut self, vm: &mut Engine) -> Run<Value> {
        let base = self.index;
        let count = self.op_int() as usize;
        let end = base + count;

        let saved_environment = self.environment;
        let saved_ref_object = self.ref_object;

        let subject = self.next(vm)?;
        let object = value::to_object(self, vm, subject)?;
        let object = object.object_id().expect("to_object yields an object");

        if self.ref_object.is_none() {
            self.ref_object = Some(self.environment);
        }
        self.environment = object;

        let body_start = self.index + 1;
        let result = self.run_chain_at(vm, body_start);

        self.environment = saved_environment;
        self.ref_object = saved_ref_object;

        let value = result?;
        self.index = end;
        Ok(value)
    }

    fn op_switch(&mut self, vm: &mut Engine) -> Run<Value> {
        let base = self.index;
        let conditions = self.op_int() as usize;
        let cond_end = base + conditions;

        let subject = self.next(vm)?;
        let mark = vm.guard_mark();
        vm.guard(&subject);

        let mut matched: Option<usize> = None;
        while self.index < cond_end {
            let case_value = self.next(vm)?;
            self.index += 1;
            let offset = self.op_int() as usize;
            if value::same(vm, &subject, &case_value) {
                matched = Some(offset);
                break;
            }
        }
        vm.unguard_to(mark);

        let default_marker = cond_end + 1;
        let default_offset = self.ops[default_marker].int_value() as usize;
        let body_count = self.ops[default_marker + 1].int_value() as usize;
        let body_base = default_marker + 2;
        let end = body_base + body_count - 1;

        let target = matched.unwrap_or(default_offset);
        let value = self.run_chain_at(vm, body_base + target)?;

        if self.breaker > 0 {
            self.breaker -= 1;
            if self.breaker > 0 {
                return Ok(value);
            }
        } else if self.breaker < 0 {
            return Ok(value);
        }
        self.index = end;
        Ok(Value::Undefined)
    }

    fn loop_step(&mut self) -> LoopStep {
        if self.breaker == 0 {
            return LoopStep::Normal;
        }
        if self.breaker < 0 {
            return LoopStep::Propagate;
        }
        self.breaker -= 1;
        if self.breaker == 0 {
            return LoopStep::Normal;
        }
        self.breaker -= 1;
        if self.breaker == 0 {
            LoopStep::Break
        } else {
            LoopStep::Propagate
        }
    }

    /// Generic loop:
    /// `[Iterate(±n_cond)][cond][Value(n_step)][step…][Value(n_body)][body…]`.
    fn op_iterate(&mut self, vm: &mut Engine) -> Run<Value> {
        let base = self.index;
        let raw = self.op_int();
        let body_first = raw < 0;
        let n_cond = raw.unsigned_abs() as usize;
        let step_marker = base + 1 + n_cond;
        let n_step = self.ops[step_marker].int_value() as usize;
        let body_marker = step_marker + 1 + n_step;
        let n_body = self.ops[body_marker].int_value() as usize;
        let end = body_marker + n_body;

        let mut first = true;
        loop {
            if !(body_first && first) && n_cond > 0 {
                self.index = base;
                let condition = self.next(vm)?;
                if !condition.is_true(vm) {
                    break;
                }
            }
            first = false;

            let value = self.run_chain_at(vm, body_marker + 1)?;
            match self.loop_step() {
                LoopStep::Normal => {}
                LoopStep::Break => break,
                LoopStep::Propagate => return Ok(value),
            }

            if n_step > 0 {
                self.run_chain_at(vm, step_marker + 1)?;
            }
            self.safepoint(vm);
        }

        self.index = end;
        Ok(Value::Undefined)
    }

    /// Counting loop specialisation:
    /// `[IterateXxxRef][counter ref op][limit op][Value(n_body)][body…]`.
    /// The counter reference and the limit are single side-effect-free ops
    /// re-evaluated each round, so body writes to either are observed.
    /// Comparison and stepping stay on integers while both sides are
    /// integers and the step cannot overflow.
    fn op_iterate_integer(&mut self, vm: &mut Engine, compare: Compare) -> Run<Value> {
        let base = self.index;
        let counter_op = base + 1;
        let limit_op = base + 2;
        let body_marker = base + 3;
        let n_body = self.ops[body_marker].int_value() as usize;
        let end = body_marker + n_body;

        let upward = matches!(compare, Compare::Less | Compare::LessOrEqual);

        loop {
            self.index = counter_op - 1;
            let target = self.next(vm)?;
            let Value::Reference(counter) = target else {
                panic!("integer loops take a counter reference")
            };
            self.index = limit_op - 1;
            let limit = self.next(vm)?;

            let current = read_slot(&vm.heap, counter).value;
            let proceed = match (&current, &limit) {
                (Value::Integer(a), Value::Integer(b)) => match compare {
                    Compare::Less => a < b,
                    Compare::LessOrEqual => a <= b,
                    Compare::More => a > b,
                    Compare::MoreOrEqual => a >= b,
                },
                _ => {
                    let a = value::to_binary(self, vm, current)?;
                    let b = value::to_binary(self, vm, limit)?;
                    match compare {
                        Compare::Less => a < b,
                        Compare::LessOrEqual => a <= b,
                        Compare::More => a > b,
                        Compare::MoreOrEqual => a >= b,
                    }
                }
            };
            if !proceed {
                break;
            }

            let value = self.run_chain_at(vm, body_marker + 1)?;
            match self.loop_step() {
                LoopStep::Normal => {}
                LoopStep::Break => break,
                LoopStep::Propagate => return Ok(value),
            }

            let current = read_slot(&vm.heap, counter).value;
            let next = match current {
                Value::Integer(i) if upward && i < i32::MAX => Value::Integer(i + 1),
                Value::Integer(i) if !upward && i > i32::MIN => Value::Integer(i - 1),
                other => {
                    let step = if upward { 1.0 } else { -1.0 };
                    Value::Binary(value::to_binary(self, vm, other)? + step)
                }
            };
            vm.replace_ref(counter, next);
            self.safepoint(vm);
        }

        self.index = end;
        Ok(Value::Undefined)
    }

    fn op_iterate_in(&mut self, vm: &mut Engine) -> Run<Value> {
        let target_ref = self.next(vm)?;
        let Value::Reference(binding) = target_ref else {
            panic!("for-in takes a binding reference")
        };
        let target = self.next(vm)?;

        self.index += 1;
        let body_marker = self.index;
        let n_body = self.ops[body_marker].int_value() as usize;
        let end = body_marker + n_body;

        if let Value::Object(id) = target {
            let keys = enumerate_for_in(vm, id);
            let mark = vm.guard_mark();
            for key in &keys {
                vm.guard(key);
            }
            let result = (|| {
                for key in keys {
                    vm.replace_ref(binding, key);
                    let value = self.run_chain_at(vm, body_marker + 1)?;
                    match self.loop_step() {
                        LoopStep::Normal => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate => return Ok(Some(value)),
                    }
                    self.safepoint(vm);
                }
                Ok(None)
            })();
            vm.unguard_to(mark);
            if let Some(value) = result? {
                return Ok(value);
            }
        }

        self.index = end;
        Ok(Value::Undefined)
    }

    fn safepoint(&mut self, vm: &mut Engine) {
        if vm.heap.should_collect() {
            let roots = gather_roots(self, vm);
            vm.heap.collect_garbage(&roots);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CompoundOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    BitAnd,
    BitXor,
    BitOr,
}

fn add_offset(index: usize, offset: i32) -> usize {
    (index as i64 + i64::from(offset)) as usize
}

fn env_slot(vm: &Engine, environment: HeapId, slot: u16) -> Value {
    vm.heap
        .object(environment)
        .leaf(slot)
        .map_or(Value::Undefined, |property| property.value)
}

fn value_snippet(vm: &Engine, value: &Value) -> String {
    if value.is_string() {
        value::string_slice(vm, value).to_owned()
    } else {
        format!("{value:?}")
    }
}

/// `for-in` key order: own-then-prototype enumerable elements (numeric
/// order) first, then members in slot order, each level filtered to the
/// slots still visible from the target.
fn enumerate_for_in(vm: &mut Engine, target: HeapId) -> Vec<Value> {
    let mut keys = Vec::new();

    let mut current = Some(target);
    while let Some(id) = current {
        let count = vm.heap.object(id).elements.len();
        for index in 0..count {
            let visible = {
                let obj = vm.heap.object(id);
                matches!(&obj.elements[index], Some(property) if !property.flags.contains(PropFlags::HIDDEN))
            };
            if !visible {
                continue;
            }
            if id != target {
                let resolved = object::element_ref(&vm.heap, &vm.keys, target, index as u32, PropFlags::empty());
                if resolved != Some(SlotRef { owner: id, place: Place::Element(index as u32) }) {
                    continue;
                }
            }
            let spelling = index.to_string();
            keys.push(chars::string_value(&mut vm.heap, spelling));
        }
        current = vm.heap.object(id).prototype;
    }

    let mut current = Some(target);
    while let Some(id) = current {
        let leaves: Vec<(u16, Key, bool)> = vm
            .heap
            .object(id)
            .leaves()
            .map(|(slot, property)| (slot, property.key, property.flags.contains(PropFlags::HIDDEN)))
            .collect();
        for (slot, key, hidden) in leaves {
            if hidden {
                continue;
            }
            if id != target {
                let resolved = member_ref(&vm.heap, target, key, PropFlags::empty());
                if resolved != Some(SlotRef { owner: id, place: Place::Slot(slot) }) {
                    continue;
                }
            }
            keys.push(Value::Key(key));
        }
        current = vm.heap.object(id).prototype;
    }

    keys
}

/// Collects the GC root set visible from an activation: the engine-level
/// roots plus every frame's environment, receiver, scope object, and
/// arguments object.
pub(crate) fn gather_roots(cx: &Context<'_>, vm: &Engine) -> Vec<HeapId> {
    let mut roots = vm.engine_roots();
    let mut frame: Option<&Context<'_>> = Some(cx);
    while let Some(current) = frame {
        roots.push(current.environment);
        if let Some(id) = crate::heap::value_child_id(&current.this_value) {
            roots.push(id);
        }
        roots.extend(current.ref_object);
        roots.extend(current.arguments);
        frame = current.parent;
    }
    roots
}

/// Calls any value, raising a TypeError for non-functions.
pub(crate) fn call_function_value(
    cx: &mut Context<'_>,
    vm: &mut Engine,
    callee: Value,
    this: Value,
    args: &[Value],
    construct: bool,
) -> Run<Value> {
    let function = callee
        .object_id()
        .filter(|id| vm.heap.object(*id).function_data().is_some());
    let Some(function) = function else {
        let shown = cx.text.slice(&vm.inputs).to_owned();
        return Err(cx.type_error(vm, format!("'{shown}' is not a function")));
    };
    call_function(cx, vm, function, this, args, construct)
}

/// The call sequence: depth check, bound-this redirection, environment
/// instantiation with positional parameter slots, arguments-object
/// materialisation, then the body (native or compiled).
pub(crate) fn call_function(
    cx: &mut Context<'_>,
    vm: &mut Engine,
    function: HeapId,
    this: Value,
    args: &[Value],
    construct: bool,
) -> Run<Value> {
    if cx.depth >= vm.max_call_depth {
        return Err(cx.range_error(vm, "maximum depth exceeded".to_owned()));
    }

    let data = vm
        .heap
        .object(function)
        .function_data()
        .expect("callee checked by caller")
        .clone();

    let mut this = this;
    let mut bound_storage: Vec<Value>;
    let mut args = args;
    if data.flags.contains(FuncFlags::USE_BOUND_THIS) {
        if !construct {
            this = data.bound_this.unwrap_or(Value::Undefined);
        }
        if !data.bound_arguments.is_empty() {
            bound_storage = data.bound_arguments.clone();
            bound_storage.extend_from_slice(args);
            args = &bound_storage;
        }
    }

    let strict = data.flags.contains(FuncFlags::STRICT);
    if !strict && matches!(this, Value::Undefined | Value::Null) && !construct {
        this = Value::Object(vm.global);
    }

    match &data.body {
        FunctionBody::Native(native) => {
            let arguments = new_arguments_object(vm, args, function, strict);
            let mut child = Context::new(&[], data.environment, this);
            child.parent = Some(cx);
            child.arguments = Some(arguments);
            child.depth = cx.depth + 1;
            child.construct = construct;
            child.strict = strict;
            child.text = cx.text;
            child.text_call = cx.text_call;
            native(&mut child, vm)
        }
        FunctionBody::Template(template) => {
            let template = template.clone();

            // Instantiate the environment: packed slot 2 is `arguments`,
            // parameters fill slots 3… positionally.
            let mut environment = vm.heap.object(data.environment).clone();
            let parameter_count = data.parameter_count as usize;
            for (offset, value) in args.iter().take(parameter_count).enumerate() {
                if let Some(property) = environment.leaf_mut((3 + offset) as u16) {
                    property.value = *value;
                }
            }
            let arguments = if data.flags.contains(FuncFlags::NEED_ARGUMENTS) {
                let arguments = new_arguments_object(vm, args, function, strict);
                if let Some(property) = environment.leaf_mut(2) {
                    property.value = Value::Object(arguments);
                }
                Some(arguments)
            } else {
                None
            };
            let environment = vm.heap.allocate(HeapData::Object(environment));

            let mut child = Context::new(&template.oplist.ops, environment, this);
            child.parent = Some(cx);
            child.arguments = arguments;
            child.ref_object = data.ref_object;
            child.depth = cx.depth + 1;
            child.construct = construct;
            child.strict = strict;
            child.run_chain_at(vm, 0)
        }
    }
}

/// Runs a compiled program (top level or eval) in its own environment.
pub(crate) fn run_program(cx: &mut Context<'_>, vm: &mut Engine, program: HeapId, this: Value) -> Run<Value> {
    let data = vm
        .heap
        .object(program)
        .function_data()
        .expect("programs are functions")
        .clone();
    let FunctionBody::Template(template) = &data.body else {
        unreachable!("programs are compiled")
    };
    let template = template.clone();

    let mut child = Context::new(&template.oplist.ops, data.environment, this);
    child.parent = Some(cx);
    child.depth = cx.depth + 1;
    child.strict = template.flags.contains(FuncFlags::STRICT);
    child.run_chain_at(vm, 0)
}

fn new_arguments_object(vm: &mut Engine, args: &[Value], callee: HeapId, strict: bool) -> HeapId {
    let mut obj = Obj::with_kind(ObjectKind::Arguments, Some(vm.prototypes.arguments));
    obj.elements = args
        .iter()
        .map(|value| Some(Property::new(*value, Key::NONE, PropFlags::empty())))
        .collect();
    obj.element_count = args.len() as u32;
    obj.add_member(
        Key::LENGTH,
        Value::Integer(args.len() as i32),
        PropFlags::HIDDEN,
    );
    if strict {
        let thrower = vm.prototypes.callee_thrower;
        obj.add_member(Key::CALLEE, Value::Object(thrower), PropFlags::HIDDEN | PropFlags::ACCESSOR | PropFlags::SEALED);
    } else {
        obj.add_member(Key::CALLEE, Value::Object(callee), PropFlags::HIDDEN);
    }
    vm.heap.allocate(HeapData::Object(obj))
}

/// Evaluates a constant subtree at parse time. The throwaway context runs
/// against the global environment; operands are literals, so nothing here
/// can observe script state.
pub(crate) fn fold_constant(vm: &mut Engine, oplist: &OpList) -> Run<Value> {
    let mut cx = Context::new(&oplist.ops, vm.global, Value::Undefined);
    cx.exec(vm)
}

/// Installs a getter or setter half, linking the pair when the other half
/// is already present.
impl Engine {
    pub(crate) fn define_accessor(&mut self, object: HeapId, key: Key, function: HeapId, is_getter: bool) {
        let flag = if is_getter { PropFlags::GETTER } else { PropFlags::SETTER };
        let existing = {
            let obj = self.heap.object(object);
            let slot = obj.get_slot(key);
            obj.leaf(slot)
                .filter(|property| property.flags.intersects(PropFlags::ACCESSOR))
                .map(|property| (property.value, property.flags))
        };
        if let Some((Value::Object(other), flags)) = existing
            && !flags.contains(flag)
        {
            if let Some(data) = self.heap.object_mut(function).function_data_mut() {
                data.pair = Some(other);
            }
            if let Some(data) = self.heap.object_mut(other).function_data_mut() {
                data.pair = Some(function);
            }
        }
        self.heap.object_mut(object).add_member(key, Value::Object(function), flag);
    }
}
