//! The threaded intermediate representation.
//!
//! An [`Op`] is one record of the compiled form: an opcode, an inline
//! operand value, and the source span it came from. An [`OpList`] is the
//! contiguous program of a function body or script. Operators with
//! children are prefix-threaded: the children's ops follow the parent and
//! are consumed through the interpreter's shared dispatch, so skip counts
//! stored in operand slots are enough to jump over unevaluated
//! sub-expressions (short-circuiting, switch dispatch).

use std::rc::Rc;

use strum::Display;

use crate::{
    engine::Engine,
    heap::HeapId,
    key::Key,
    object::{FuncFlags, FunctionBody, ObjectKind},
    text::Text,
    value::Value,
};

/// Accessor role of a function literal in an object initialiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accessor {
    None,
    Getter,
    Setter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum OpCode {
    Noop,
    Value,
    Text,
    Regexp,
    Function(Accessor),
    Object,
    Array,
    GetThis,

    CreateLocalRef,
    GetLocalRefOrNull,
    GetLocalRef,
    GetLocal,
    SetLocal,
    DeleteLocal,

    GetLocalSlotRef,
    GetLocalSlot,
    SetLocalSlot,
    DeleteLocalSlot,
    GetParentSlotRef,
    GetParentSlot,
    SetParentSlot,
    DeleteParentSlot,

    GetMemberRef,
    GetMember,
    SetMember,
    CallMember,
    DeleteMember,

    GetPropertyRef,
    GetProperty,
    SetProperty,
    CallProperty,
    DeleteProperty,

    PushEnvironment,
    PopEnvironment,
    Exchange,
    TypeOf,

    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessOrEqual,
    More,
    MoreOrEqual,
    InstanceOf,
    In,
    Add,
    Minus,
    Multiply,
    Divide,
    Modulo,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    BitwiseAnd,
    BitwiseXor,
    BitwiseOr,
    LogicalAnd,
    LogicalOr,

    Positive,
    Negative,
    Invert,
    LogicalNot,

    IncrementRef,
    DecrementRef,
    PostIncrementRef,
    PostDecrementRef,
    AddAssignRef,
    MinusAssignRef,
    MultiplyAssignRef,
    DivideAssignRef,
    ModuloAssignRef,
    LeftShiftAssignRef,
    RightShiftAssignRef,
    UnsignedRightShiftAssignRef,
    BitAndAssignRef,
    BitXorAssignRef,
    BitOrAssignRef,

    Construct,
    Call,
    Eval,

    Debugger,
    Try,
    Throw,
    With,
    Next,
    NextIf,
    Expression,
    AutoreleaseExpression,
    AutoreleaseDiscard,
    Discard,
    DiscardN,
    Jump,
    JumpIf,
    JumpIfNot,
    BranchIfNot,
    Result,
    ResultVoid,
    SwitchOp,
    Breaker,
    Iterate,
    IterateLessRef,
    IterateLessOrEqualRef,
    IterateMoreRef,
    IterateMoreOrEqualRef,
    IterateInRef,
}

#[derive(Debug, Clone)]
pub(crate) struct Op {
    pub code: OpCode,
    pub value: Value,
    pub text: Text,
}

impl Op {
    pub(crate) fn new(code: OpCode, value: Value, text: Text) -> Self {
        Self { code, value, text }
    }

    pub(crate) fn int_value(&self) -> i32 {
        match self.value {
            Value::Integer(i) => i,
            _ => panic!("op {:?} expected an integer operand", self.code),
        }
    }

    pub(crate) fn key_value(&self) -> Key {
        match self.value {
            Value::Key(key) => key,
            _ => panic!("op {:?} expected a key operand", self.code),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OpList {
    pub ops: Vec<Op>,
}

impl OpList {
    pub(crate) fn single(op: Op) -> Self {
        Self { ops: vec![op] }
    }

    pub(crate) fn create(code: OpCode, value: Value, text: Text) -> Self {
        Self::single(Op::new(code, value, text))
    }

    pub(crate) fn count(&self) -> i32 {
        self.ops.len() as i32
    }

    pub(crate) fn unshift(mut self, op: Op) -> Self {
        self.ops.insert(0, op);
        self
    }

    pub(crate) fn append(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub(crate) fn append_noop(self) -> Self {
        self.append(Op::new(OpCode::Noop, Value::Undefined, Text::none()))
    }

    pub(crate) fn join(mut self, mut other: Self) -> Self {
        self.ops.append(&mut other.ops);
        self
    }

    /// The span covered by the list: first op's text through the last's.
    pub(crate) fn text(&self) -> Text {
        match (self.ops.first(), self.ops.last()) {
            (Some(first), Some(last)) => Text::join(first.text, last.text),
            _ => Text::none(),
        }
    }
}

/// Joins two optional lists, treating absence as emptiness.
pub(crate) fn join_opt(a: Option<OpList>, b: Option<OpList>) -> Option<OpList> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.join(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// The compiled, immutable body of a script function.
#[derive(Debug)]
pub(crate) struct FunctionTemplate {
    pub oplist: OpList,
    pub name: Option<Key>,
    pub parameter_count: u32,
    pub flags: FuncFlags,
    pub text: Text,
}

impl FunctionTemplate {
    /// GC traversal over operand values (literals, nested templates).
    pub(crate) fn collect_child_ids(&self, work: &mut Vec<HeapId>) {
        for op in &self.oplist.ops {
            if let Some(id) = crate::heap::value_child_id(&op.value) {
                work.push(id);
            }
        }
    }
}

// --- environment slot resolution -------------------------------------------

/// A planned rewrite of one op into its slot-addressed form.
struct Patch {
    index: usize,
    code: OpCode,
    value: Value,
}

/// Rewrites dynamic local accesses into slot-addressed forms wherever the
/// key resolves to a packed function-environment slot, then recurses into
/// nested function templates.
///
/// Constraints honoured here:
/// - the global environment is never slot-addressed (its layout changes as
///   later inputs add globals), so resolution stops short of `global`;
/// - `catch`/`with` scopes shift runtime depth, tracked across
///   `PushEnvironment`/`PopEnvironment` pairs;
/// - ops inside `with` regions stay fully dynamic (the scope object may
///   shadow anything), and functions created there keep only their own
///   locals slot-addressed.
pub(crate) fn optimize_with_environment(vm: &mut Engine, function_id: HeapId, global: HeapId) {
    optimize_inner(vm, function_id, global, true);
}

fn optimize_inner(vm: &mut Engine, function_id: HeapId, global: HeapId, outer_ok: bool) {
    let Some(data) = vm.heap.object(function_id).function_data() else {
        return;
    };
    let FunctionBody::Template(template) = &data.body else {
        return;
    };
    let environment = data.environment;
    let template = Rc::clone(template);

    let mut patches: Vec<Patch> = Vec::new();
    let mut nested: Vec<(HeapId, bool)> = Vec::new();
    let mut env_depth: u32 = 0;
    let mut with_until: usize = 0;

    for (index, op) in template.oplist.ops.iter().enumerate() {
        match op.code {
            OpCode::PushEnvironment => env_depth += 1,
            OpCode::PopEnvironment => env_depth = env_depth.saturating_sub(1),
            OpCode::With => {
                let end = index + 1 + op.int_value() as usize;
                with_until = with_until.max(end);
            }
            OpCode::Function(_) => {
                // Functions created inside `with` or `catch` scopes keep
                // their outer references dynamic: the runtime chain has
                // links this pass cannot see.
                if let Some(id) = op.value.object_id() {
                    nested.push((id, outer_ok && index >= with_until && env_depth == 0));
                }
            }
            OpCode::GetLocal | OpCode::GetLocalRef | OpCode::SetLocal | OpCode::DeleteLocal => {
                if index < with_until {
                    continue;
                }
                let key = op.key_value();
                let Some((depth, slot)) = resolve_slot(vm, environment, global, key) else {
                    continue;
                };
                let depth = depth + env_depth;
                if depth > 0 && !outer_ok {
                    continue;
                }
                let (code, value) = if depth == 0 {
                    let code = match op.code {
                        OpCode::GetLocal => OpCode::GetLocalSlot,
                        OpCode::GetLocalRef => OpCode::GetLocalSlotRef,
                        OpCode::SetLocal => OpCode::SetLocalSlot,
                        OpCode::DeleteLocal => OpCode::DeleteLocalSlot,
                        _ => unreachable!(),
                    };
                    (code, Value::Integer(i32::from(slot)))
                } else {
                    let code = match op.code {
                        OpCode::GetLocal => OpCode::GetParentSlot,
                        OpCode::GetLocalRef => OpCode::GetParentSlotRef,
                        OpCode::SetLocal => OpCode::SetParentSlot,
                        OpCode::DeleteLocal => OpCode::DeleteParentSlot,
                        _ => unreachable!(),
                    };
                    (code, Value::Integer(((depth as i32) << 16) | i32::from(slot)))
                };
                patches.push(Patch { index, code, value });
            }
            _ => {}
        }
    }

    if !patches.is_empty() {
        let Some(data) = vm.heap.object_mut(function_id).function_data_mut() else {
            return;
        };
        let FunctionBody::Template(template) = &mut data.body else {
            return;
        };
        let template = Rc::get_mut(template).expect("templates are unshared until execution");
        for patch in patches {
            let op = &mut template.oplist.ops[patch.index];
            op.code = patch.code;
            op.value = patch.value;
        }
    }

    for (id, child_outer_ok) in nested {
        optimize_inner(vm, id, global, child_outer_ok);
    }
}

/// Finds the packed slot of `key` along the parse-time scope chain,
/// stopping before the global environment. Depth 0 is the function's own
/// environment.
fn resolve_slot(vm: &Engine, environment: HeapId, global: HeapId, key: Key) -> Option<(u32, u16)> {
    let mut depth = 0u32;
    let mut current = environment;
    loop {
        if current == global {
            return None;
        }
        let obj = vm.heap.object(current);
        let slot = obj.get_slot(key);
        if slot != 0 && obj.leaf(slot).is_some() {
            return Some((depth, slot));
        }
        // Only true environments chain here; anything else ends lookup.
        if !matches!(obj.kind, ObjectKind::Plain | ObjectKind::Function(_)) {
            return None;
        }
        current = obj.prototype?;
        depth += 1;
    }
}
