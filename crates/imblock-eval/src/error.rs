//! Error types for the interpreter.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A primitive was called with the wrong number or kind of arguments.
    #[error("Invalid call to {primitive}(): {message}")]
    Misuse { primitive: &'static str, message: String },

    #[error("No asynchronous primitive is awaiting a result")]
    NotSuspended,
}

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    pub fn misuse(primitive: &'static str, message: impl Into<String>) -> Self {
        Error::Misuse {
            primitive,
            message: message.into(),
        }
    }
}
