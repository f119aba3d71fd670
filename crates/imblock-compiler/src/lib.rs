//! imblock compiler
//!
//! Turns a visual block program into instrumented script text for the
//! `imblock-eval` interpreter. Every generated statement block is preceded by
//! a `mark("<block id>");` call so a driver can highlight and pause on it.

pub mod block;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod names;
pub mod xml;

pub use block::{Block, BlockProgram, Field, ValueInput, Variable};
pub use codegen::{CodeGenerator, CompiledProgram};
pub use driver::{CompileOptions, CompileOutput, Compiler};
pub use error::{CompileError, Result};

/// Compile a block program to instrumented text.
pub fn compile(program: &BlockProgram) -> Result<CompiledProgram> {
    CodeGenerator::new().generate(program)
}
