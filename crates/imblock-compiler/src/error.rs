//! Error types for the block compiler

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid block XML: {0}")]
    Xml(String),

    #[error("Unknown block type '{kind}' (block {id})")]
    UnknownBlock { id: String, kind: String },

    #[error("Block {id} ({kind}) cannot be used {context}")]
    Misplaced {
        id: String,
        kind: String,
        context: &'static str,
    },

    #[error("Unsupported block option in {id}: {message}")]
    Unsupported { id: String, message: String },

    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),
}

impl CompileError {
    pub fn xml(message: impl std::fmt::Display) -> Self {
        CompileError::Xml(message.to_string())
    }

    pub fn unsupported(id: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            id: id.into(),
            message: message.into(),
        }
    }
}
