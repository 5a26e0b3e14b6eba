#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing follows ES5 ToInt32/ToUint32")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional on the bit-op paths")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors ES5 integer conversion")]
#![expect(clippy::float_cmp, reason = "ES5 strict equality requires exact float comparison")]
#![expect(clippy::unnecessary_wraps, reason = "op and native dispatch signatures are uniform")]
#![expect(clippy::struct_excessive_bools, reason = "state mirrors engine flag fields")]
#![expect(clippy::too_many_arguments, reason = "call paths thread engine state explicitly")]

mod builtins;
mod chars;
mod context;
mod engine;
mod exception;
mod heap;
mod input;
mod interp;
mod io;
mod key;
mod lexer;
mod object;
mod op;
mod parser;
mod text;
mod value;

pub use crate::{
    context::Context,
    engine::{Engine, EvalFlags, ExitCode},
    exception::{CodeLoc, ErrorKind, Exception},
    interp::{NativeFn, Thrown},
    io::{CollectEnv, EnvWriter, StderrEnv},
    value::Value,
};

/// Result type threaded through every op native and coercion.
pub(crate) type Run<T> = Result<T, Thrown>;
