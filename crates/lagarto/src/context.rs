//! Per-activation state.
//!
//! A [`Context`] is created for every function call (and for the program
//! itself) and passed to every op handler. It carries the op cursor, the
//! receiver, the environment chain head, the parent activation (used for
//! call-depth limits and as the GC root chain), and the `breaker` integer
//! that models structured unwinds: positive values count break/continue
//! scope boundaries still to cross, `-1` is a return in flight.

use crate::{
    engine::Engine,
    exception::ErrorKind,
    heap::HeapId,
    interp::Thrown,
    object::ObjectKind,
    op::Op,
    text::Text,
    value::Value,
};

pub struct Context<'a> {
    pub(crate) ops: &'a [Op],
    pub(crate) index: usize,
    pub(crate) this_value: Value,
    pub(crate) environment: HeapId,
    /// Innermost `with` scope object, when one is active.
    pub(crate) ref_object: Option<HeapId>,
    pub(crate) parent: Option<&'a Context<'a>>,
    /// Materialised arguments object (native frames always have one).
    pub(crate) arguments: Option<HeapId>,
    pub(crate) breaker: i32,
    pub(crate) depth: u16,
    pub(crate) construct: bool,
    pub(crate) strict: bool,
    /// Set when the last local lookup resolved through the `with` object.
    pub(crate) inside_env_object: bool,
    /// Source span blamed by the next error.
    pub(crate) text: Text,
    pub(crate) text_call: Option<Text>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(ops: &'a [Op], environment: HeapId, this_value: Value) -> Self {
        Self {
            ops,
            index: 0,
            this_value,
            environment,
            ref_object: None,
            parent: None,
            arguments: None,
            breaker: 0,
            depth: 0,
            construct: false,
            strict: false,
            inside_env_object: false,
            text: Text::none(),
            text_call: None,
        }
    }

    pub(crate) fn strict(&self) -> bool {
        self.strict
    }

    /// The receiver of the current call.
    pub fn this(&self) -> Value {
        self.this_value
    }

    /// Number of actual arguments to the current call.
    pub fn argument_count(&self, vm: &Engine) -> usize {
        self.arguments
            .map_or(0, |id| vm.heap.object(id).element_count as usize)
    }

    /// The `index`-th actual argument, or undefined.
    pub fn argument(&self, vm: &Engine, index: usize) -> Value {
        let Some(id) = self.arguments else {
            return Value::Undefined;
        };
        vm.heap
            .object(id)
            .elements
            .get(index)
            .and_then(|slot| slot.as_ref().map(|property| property.value))
            .unwrap_or(Value::Undefined)
    }

    /// Requires `this` to be an object and returns its pool id.
    pub(crate) fn this_object(&mut self, vm: &mut Engine) -> Result<HeapId, Thrown> {
        match self.this_value {
            Value::Object(id) => Ok(id),
            _ => Err(self.type_error(vm, "not an object".to_owned())),
        }
    }

    /// Requires `this` to be an object of the kind accepted by `check`.
    pub(crate) fn this_kind(
        &mut self,
        vm: &mut Engine,
        expected: &str,
        check: fn(&ObjectKind) -> bool,
    ) -> Result<HeapId, Thrown> {
        if let Value::Object(id) = self.this_value
            && check(&vm.heap.object(id).kind)
        {
            return Ok(id);
        }
        Err(self.type_error(vm, format!("not a {expected}")))
    }

    // --- error constructors ----------------------------------------------

    /// Builds an error of the given kind positioned at the activation's
    /// current source span; returning it as `Err` throws through the
    /// enclosing try frame.
    pub fn error(&mut self, vm: &mut Engine, kind: ErrorKind, message: String) -> Thrown {
        let value = vm.new_error_value(kind, message, self.text);
        Thrown { value, text: self.text }
    }

    pub fn type_error(&mut self, vm: &mut Engine, message: String) -> Thrown {
        self.error(vm, ErrorKind::TypeError, message)
    }

    pub fn range_error(&mut self, vm: &mut Engine, message: String) -> Thrown {
        self.error(vm, ErrorKind::RangeError, message)
    }

    pub fn reference_error(&mut self, vm: &mut Engine, message: String) -> Thrown {
        self.error(vm, ErrorKind::ReferenceError, message)
    }

    pub fn syntax_error(&mut self, vm: &mut Engine, message: String) -> Thrown {
        self.error(vm, ErrorKind::SyntaxError, message)
    }

    pub fn uri_error(&mut self, vm: &mut Engine, message: String) -> Thrown {
        self.error(vm, ErrorKind::UriError, message)
    }
}
