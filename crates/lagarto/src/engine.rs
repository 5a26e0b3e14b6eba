//! The script context: one embeddable engine instance.
//!
//! Owns the key table, the pool, the registered inputs, the global object
//! and the builtin prototype registry. Everything that was process-global
//! in this engine's ancestry is scoped here, and the engine is neither
//! `Send` nor `Sync`, so the single-thread execution contract holds at the
//! type level.

use crate::{
    chars,
    context::Context,
    exception::{CodeLoc, ErrorKind, Exception},
    heap::{Heap, HeapData, HeapId},
    input::Inputs,
    interp::{self, NativeFn},
    io::{EnvWriter, StderrEnv},
    key::{Key, KeyTable},
    object::{ErrorData, FuncFlags, FunctionBody, FunctionData, Obj, ObjectKind, RegexpData},
    parser::Parser,
    text::Text,
    value::{self, PropFlags, SlotRef, Value},
};

bitflags::bitflags! {
    /// Flags accepted by [`Engine::eval_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EvalFlags: u8 {
        /// Permit legacy laxities (Unicode identifier escapes and the
        /// like) while lexing this input.
        const SLOPPY_MODE = 0x01;
        /// Coerce the completion value to a primitive.
        const PRIMITIVE_RESULT = 0x02;
        /// Coerce the completion value to a string (implies primitive).
        const STRING_RESULT = 0x04;
    }
}

/// Exit status of [`Engine::eval_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    UncaughtError,
}

/// Pool ids of the builtin prototypes and the handful of singleton
/// functions the runtime reaches for directly.
pub(crate) struct Prototypes {
    pub object: HeapId,
    pub function: HeapId,
    pub array: HeapId,
    pub arguments: HeapId,
    pub string: HeapId,
    pub boolean: HeapId,
    pub number: HeapId,
    pub date: HeapId,
    pub regexp: HeapId,
    pub error: HeapId,
    pub range_error: HeapId,
    pub reference_error: HeapId,
    pub syntax_error: HeapId,
    pub type_error: HeapId,
    pub uri_error: HeapId,
    pub eval_error: HeapId,
    /// Accessor installed for `arguments.callee` in strict frames.
    pub callee_thrower: HeapId,
}

impl Prototypes {
    pub(crate) fn error_proto(&self, kind: ErrorKind) -> HeapId {
        match kind {
            ErrorKind::Error => self.error,
            ErrorKind::RangeError => self.range_error,
            ErrorKind::ReferenceError => self.reference_error,
            ErrorKind::SyntaxError => self.syntax_error,
            ErrorKind::TypeError => self.type_error,
            ErrorKind::UriError => self.uri_error,
            ErrorKind::EvalError => self.eval_error,
        }
    }

    fn all(&self) -> [HeapId; 17] {
        [
            self.object,
            self.function,
            self.array,
            self.arguments,
            self.string,
            self.boolean,
            self.number,
            self.date,
            self.regexp,
            self.error,
            self.range_error,
            self.reference_error,
            self.syntax_error,
            self.type_error,
            self.uri_error,
            self.eval_error,
            self.callee_thrower,
        ]
    }
}

pub struct Engine {
    pub(crate) heap: Heap,
    pub(crate) keys: KeyTable,
    pub(crate) inputs: Inputs,
    pub(crate) global: HeapId,
    pub(crate) prototypes: Prototypes,
    pub(crate) result: Value,
    pub(crate) max_call_depth: u16,
    pub(crate) print_last_throw: bool,
    pub(crate) sloppy_mode: bool,
    pub(crate) debug_trap: bool,
    pub(crate) env_writer: Box<dyn EnvWriter>,
    /// Roots for values held in Rust locals across script re-entry.
    temp_guards: Vec<HeapId>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut heap = Heap::new();

        let object = heap.allocate(HeapData::Object(Obj::new(None)));
        let global = heap.allocate(HeapData::Object(Obj::with_kind(ObjectKind::Global, Some(object))));

        let mut native_proto = |heap: &mut Heap, native: NativeFn, kind_proto: HeapId| {
            let data = FunctionData {
                body: FunctionBody::Native(native),
                environment: global,
                ref_object: None,
                pair: None,
                bound_this: None,
                bound_arguments: Vec::new(),
                flags: FuncFlags::empty(),
                parameter_count: 0,
                name: None,
                text: Text::NATIVE_CODE,
            };
            heap.allocate(HeapData::Object(Obj::with_kind(
                ObjectKind::Function(Box::new(data)),
                Some(kind_proto),
            )))
        };

        let function = native_proto(&mut heap, native_identity, object);
        let callee_thrower = native_proto(&mut heap, native_callee_thrower, function);

        let mut proto = |heap: &mut Heap, kind: ObjectKind, parent: HeapId| {
            heap.allocate(HeapData::Object(Obj::with_kind(kind, Some(parent))))
        };

        let array = proto(&mut heap, ObjectKind::Array, object);
        let arguments = proto(&mut heap, ObjectKind::Arguments, object);
        let string = proto(&mut heap, ObjectKind::String(Box::from("")), object);
        let boolean = proto(&mut heap, ObjectKind::Boolean(false), object);
        let number = proto(&mut heap, ObjectKind::Number(0.0), object);
        let date = proto(&mut heap, ObjectKind::Date(f64::NAN), object);
        let empty_regex = fancy_regex::Regex::new("").expect("empty pattern compiles");
        let regexp = proto(
            &mut heap,
            ObjectKind::Regexp(RegexpData {
                program: std::rc::Rc::new(empty_regex),
                source: Box::from(""),
                global: false,
                ignore_case: false,
                multiline: false,
            }),
            object,
        );
        let error_kind = |kind| ObjectKind::Error(ErrorData { kind, text: Text::none() });
        let error = proto(&mut heap, error_kind(ErrorKind::Error), object);
        let range_error = proto(&mut heap, error_kind(ErrorKind::RangeError), error);
        let reference_error = proto(&mut heap, error_kind(ErrorKind::ReferenceError), error);
        let syntax_error = proto(&mut heap, error_kind(ErrorKind::SyntaxError), error);
        let type_error = proto(&mut heap, error_kind(ErrorKind::TypeError), error);
        let uri_error = proto(&mut heap, error_kind(ErrorKind::UriError), error);
        let eval_error = proto(&mut heap, error_kind(ErrorKind::EvalError), error);

        let mut engine = Self {
            heap,
            keys: KeyTable::new(),
            inputs: Inputs::default(),
            global,
            prototypes: Prototypes {
                object,
                function,
                array,
                arguments,
                string,
                boolean,
                number,
                date,
                regexp,
                error,
                range_error,
                reference_error,
                syntax_error,
                type_error,
                uri_error,
                eval_error,
                callee_thrower,
            },
            result: Value::Undefined,
            max_call_depth: 512,
            print_last_throw: true,
            sloppy_mode: false,
            debug_trap: false,
            env_writer: Box::new(StderrEnv),
            temp_guards: Vec::new(),
        };
        crate::builtins::setup(&mut engine);
        engine
    }

    // --- host configuration ----------------------------------------------

    pub fn set_env_writer(&mut self, writer: Box<dyn EnvWriter>) {
        self.env_writer = writer;
    }

    /// Whether uncaught exceptions print with source context.
    pub fn set_print_last_throw(&mut self, print: bool) {
        self.print_last_throw = print;
    }

    pub fn set_sloppy_mode(&mut self, sloppy: bool) {
        self.sloppy_mode = sloppy;
    }

    pub fn set_max_call_depth(&mut self, depth: u16) {
        self.max_call_depth = depth;
    }

    /// Whether a `debugger` statement ran since the engine was created.
    pub fn debug_trap(&self) -> bool {
        self.debug_trap
    }

    /// Installs a value on the global object.
    pub fn add_value(&mut self, name: &str, value: Value) {
        let key = self.make_key(name);
        self.heap.object_mut(self.global).add_member(key, value, PropFlags::empty());
    }

    /// Installs a native function on the global object. A negative
    /// `parameter_count` declares a variadic with `|n|` as its `length`.
    pub fn add_function(&mut self, name: &str, native: NativeFn, parameter_count: i32) {
        let function = self.new_native_function(native, parameter_count, Some(name));
        let key = self.make_key(name);
        self.heap
            .object_mut(self.global)
            .add_member(key, Value::Object(function), PropFlags::HIDDEN);
    }

    /// Wraps a host string as a script value.
    pub fn string_value(&mut self, bytes: &str) -> Value {
        chars::string_value(&mut self.heap, bytes.to_owned())
    }

    // --- evaluation -------------------------------------------------------

    /// Parses and runs one input, returning its completion value as a
    /// string, or the uncaught exception.
    pub fn eval_text(&mut self, name: &str, source: &str) -> Result<String, Exception> {
        match self.eval_flags(name, source, EvalFlags::STRING_RESULT) {
            (ExitCode::Success, _) => {
                let result = self.take_result();
                Ok(if result.is_string() {
                    value::string_slice(self, &result).to_owned()
                } else {
                    String::new()
                })
            }
            (ExitCode::UncaughtError, Some(exception)) => Err(exception),
            (ExitCode::UncaughtError, None) => unreachable!("failures carry an exception"),
        }
    }

    /// Parses and runs one input. Returns the exit code (0 success, 1
    /// uncaught exception) plus the exception when one escaped.
    pub fn eval_flags(&mut self, name: &str, source: &str, flags: EvalFlags) -> (ExitCode, Option<Exception>) {
        let input_id = self.inputs.add(name, source.to_owned());
        let sloppy = self.sloppy_mode || flags.contains(EvalFlags::SLOPPY_MODE);
        let parser = Parser::new(self, input_id, sloppy);
        let program = parser.parse(self, self.global, false);
        self.heap.retain(program);

        self.set_result(Value::Undefined);
        let mut root = Context::new(&[], self.global, Value::Object(self.global));
        let outcome = interp::run_program(&mut root, self, program, Value::Object(self.global));
        self.heap.release(program);

        match outcome {
            Ok(_) => {
                if flags.intersects(EvalFlags::STRING_RESULT | EvalFlags::PRIMITIVE_RESULT) {
                    let result = self.take_result();
                    let mut root = Context::new(&[], self.global, Value::Object(self.global));
                    let coerced = if flags.contains(EvalFlags::STRING_RESULT) {
                        value::to_string(&mut root, self, result)
                    } else {
                        value::to_primitive(&mut root, self, result, value::Hint::Auto)
                    };
                    match coerced {
                        Ok(value) => self.set_result(value),
                        Err(thrown) => return self.uncaught(thrown),
                    }
                }
                (ExitCode::Success, None)
            }
            Err(thrown) => self.uncaught(thrown),
        }
    }

    fn uncaught(&mut self, thrown: crate::Thrown) -> (ExitCode, Option<Exception>) {
        let exception = self.exception_from(&thrown);
        if self.print_last_throw {
            let mut report = exception.to_string();
            let text = self.error_text(&thrown.value).unwrap_or(thrown.text);
            if let Some(context) = self.inputs.render_context(&text) {
                report.push('\n');
                report.push_str(&context);
            }
            self.env_writer.write_diag(&report);
        }
        (ExitCode::UncaughtError, Some(exception))
    }

    fn error_text(&self, value: &Value) -> Option<Text> {
        let id = value.object_id()?;
        match &self.heap.object(id).kind {
            ObjectKind::Error(data) => Some(data.text),
            _ => None,
        }
    }

    /// Builds the host-facing exception for an uncaught value without
    /// running script (object `toString` is not consulted).
    fn exception_from(&mut self, thrown: &crate::Thrown) -> Exception {
        let (kind, message, text) = match thrown.value.object_id().map(|id| &self.heap.object(id).kind) {
            Some(ObjectKind::Error(data)) => {
                let kind = data.kind;
                let text = data.text;
                let id = thrown.value.object_id().expect("checked above");
                let message = crate::object::member_ref(&self.heap, id, Key::MESSAGE, PropFlags::empty())
                    .map(|slot| crate::object::read_slot(&self.heap, slot).value)
                    .filter(|v| v.is_string())
                    .map_or_else(String::new, |v| value::string_slice(self, &v).to_owned());
                (kind, message, text)
            }
            Some(kind) => (ErrorKind::Error, format!("[object {}]", kind.class_name()), thrown.text),
            None => {
                let message = if thrown.value.is_string() {
                    value::string_slice(self, &thrown.value).to_owned()
                } else {
                    let mut append = chars::Append::begin();
                    append.push_value(&self.heap, &thrown.value);
                    append.into_string()
                };
                (ErrorKind::Error, message, thrown.text)
            }
        };
        let location: Option<CodeLoc> = self.inputs.location(&text);
        Exception { kind, message, location }
    }

    /// Unmark-all, re-mark from the global, the prototype registry, every
    /// input's attached values and the engine registers, then collect.
    pub fn garbage_collect(&mut self) {
        let roots = self.engine_roots();
        self.heap.collect_garbage(&roots);
    }

    // --- runtime plumbing -------------------------------------------------

    pub(crate) fn engine_roots(&self) -> Vec<HeapId> {
        let mut roots = vec![self.global];
        roots.extend(self.prototypes.all());
        for input in self.inputs.iter() {
            for value in &input.attached {
                if let Some(id) = crate::heap::value_child_id(value) {
                    roots.push(id);
                }
            }
        }
        if let Some(id) = crate::heap::value_child_id(&self.result) {
            roots.push(id);
        }
        roots.extend_from_slice(&self.temp_guards);
        roots
    }

    pub(crate) fn set_result(&mut self, value: Value) {
        let previous = self.result;
        self.heap.release_value(&previous);
        self.heap.retain_value(&value);
        self.result = value;
    }

    pub(crate) fn take_result(&mut self) -> Value {
        let value = self.result;
        self.heap.release_value(&value);
        self.result = Value::Undefined;
        value
    }

    pub(crate) fn guard_mark(&self) -> usize {
        self.temp_guards.len()
    }

    pub(crate) fn guard(&mut self, value: &Value) {
        if let Some(id) = crate::heap::value_child_id(value) {
            self.temp_guards.push(id);
        }
    }

    pub(crate) fn guard_id(&mut self, id: HeapId) {
        self.temp_guards.push(id);
    }

    pub(crate) fn unguard_to(&mut self, mark: usize) {
        self.temp_guards.truncate(mark);
    }

    /// Overwrites the value behind a reference, keeping the slot's key
    /// and attributes.
    pub(crate) fn replace_ref(&mut self, slot_ref: SlotRef, value: Value) {
        let old = crate::object::read_slot(&self.heap, slot_ref);
        crate::object::write_slot(
            &mut self.heap,
            slot_ref,
            crate::object::Property::new(value, old.key, old.flags),
        );
    }

    // --- allocation helpers ----------------------------------------------

    pub(crate) fn new_object(&mut self) -> HeapId {
        self.heap
            .allocate(HeapData::Object(Obj::new(Some(self.prototypes.object))))
    }

    pub(crate) fn new_array(&mut self, length: u32) -> HeapId {
        let mut obj = Obj::with_kind(ObjectKind::Array, Some(self.prototypes.array));
        obj.elements = vec![None; length as usize];
        obj.element_count = length;
        self.heap.allocate(HeapData::Object(obj))
    }

    pub(crate) fn new_string_object(&mut self, bytes: String) -> HeapId {
        let mut obj = Obj::with_kind(ObjectKind::String(bytes.into_boxed_str()), Some(self.prototypes.string));
        let length = match &obj.kind {
            ObjectKind::String(s) => crate::text::utf16_length(s),
            _ => 0,
        };
        obj.add_member(
            Key::LENGTH,
            Value::Integer(length as i32),
            PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED,
        );
        self.heap.allocate(HeapData::Object(obj))
    }

    pub(crate) fn new_number_object(&mut self, binary: f64) -> HeapId {
        self.heap.allocate(HeapData::Object(Obj::with_kind(
            ObjectKind::Number(binary),
            Some(self.prototypes.number),
        )))
    }

    pub(crate) fn new_boolean_object(&mut self, truth: bool) -> HeapId {
        self.heap.allocate(HeapData::Object(Obj::with_kind(
            ObjectKind::Boolean(truth),
            Some(self.prototypes.boolean),
        )))
    }

    pub(crate) fn new_error_value(&mut self, kind: ErrorKind, message: String, text: Text) -> Value {
        let proto = self.prototypes.error_proto(kind);
        let mut obj = Obj::with_kind(ObjectKind::Error(ErrorData { kind, text }), Some(proto));
        let message_value = chars::string_value(&mut self.heap, message);
        obj.add_member(Key::MESSAGE, message_value, PropFlags::HIDDEN);
        Value::Object(self.heap.allocate(HeapData::Object(obj)))
    }

    pub(crate) fn new_native_function(&mut self, native: NativeFn, parameter_count: i32, name: Option<&str>) -> HeapId {
        let name_key = name.map(|n| self.make_key(n));
        let data = FunctionData {
            body: FunctionBody::Native(native),
            environment: self.global,
            ref_object: None,
            pair: None,
            bound_this: None,
            bound_arguments: Vec::new(),
            flags: FuncFlags::empty(),
            parameter_count: parameter_count.unsigned_abs(),
            name: name_key,
            text: Text::NATIVE_CODE,
        };
        let mut obj = Obj::with_kind(ObjectKind::Function(Box::new(data)), Some(self.prototypes.function));
        obj.add_member(
            Key::LENGTH,
            Value::Integer(parameter_count.abs()),
            PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED,
        );
        if let Some(key) = name_key {
            obj.add_member(Key::NAME, Value::Key(key), PropFlags::HIDDEN);
        }
        self.heap.allocate(HeapData::Object(obj))
    }
}

/// Body of the Function prototype: callable, returns undefined.
fn native_identity(_cx: &mut Context<'_>, _vm: &mut Engine) -> Result<Value, crate::Thrown> {
    Ok(Value::Undefined)
}

/// `arguments.callee` poison pill for strict frames.
fn native_callee_thrower(cx: &mut Context<'_>, vm: &mut Engine) -> Result<Value, crate::Thrown> {
    Err(cx.type_error(vm, "'callee' cannot be accessed in this context".to_owned()))
}
