//! Interpreter for compiled block programs.
//!
//! Compiled text is parsed into an arena-indexed AST and executed one
//! evaluation unit at a time. Synchronous primitives (`print`, `prompt`,
//! `mark`) go through a [`Host`]; device primitives and timed waits suspend
//! the interpreter and are handed back to the caller as an [`AsyncCall`],
//! to be completed later with [`Interpreter::resolve`].

pub mod ast;
mod error;
mod eval;
mod interpreter;
mod parser;
pub mod primitive;
mod runtime;
mod value;

pub use ast::Program;
pub use error::Error;
pub use interpreter::{Host, Interpreter, Step};
pub use parser::parse;
pub use primitive::{AsyncCall, Axis, Builtin, DeviceCall, FocusKind, MoveMode, KEYWORDS};
pub use runtime::Runtime;
pub use value::Value;

/// Result type for interpreter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether `name` is a keyword or primitive name that user code may not bind.
pub fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(&name) || Builtin::from_name(name).is_some()
}
