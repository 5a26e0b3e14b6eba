//! Host-facing error values.

use strum::{Display, IntoStaticStr};

/// The ES5 error constructor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    Error,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    #[strum(serialize = "URIError")]
    UriError,
    EvalError,
}

/// A source position resolved against a registered input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    /// Input name as registered with the engine.
    pub input: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based byte column within the line.
    pub column: u32,
}

/// An uncaught script error as surfaced to the host.
///
/// Script code can throw arbitrary values; non-error throws surface with
/// [`ErrorKind::Error`] and the thrown value's string form as the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<CodeLoc>,
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}:{}: {}: {}", loc.input, loc.line, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Exception {}
