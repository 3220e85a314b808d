use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValType;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Guest-requested process termination with an integer status.
///
/// Status 0 never surfaces from a function call: the call path turns it into success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest exited with status {code}")]
pub struct ExitError {
    pub code: i32,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to load wasmtime library {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Missing symbol in wasmtime library: {0}")]
    MissingSymbol(&'static str),

    #[error("Failed to create {0}")]
    CreationFailed(&'static str),

    #[error("Call failed: {0}")]
    CallFailed(String),

    #[error("Call failed (trap): {0}")]
    Trapped(String),

    #[error(transparent)]
    Exit(#[from] ExitError),

    #[error("Expected {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Failed to compile module: {0}")]
    Compile(String),

    #[error("Failed to instantiate: {0}")]
    Instantiate(String),

    #[error("Failed to define {module}::{name}: {reason}")]
    Link {
        module: String,
        name: String,
        reason: String,
    },

    #[error("Export {0:?} not found")]
    ExportNotFound(String),

    #[error("Export {name:?} is not a {expected}")]
    ExportKind { name: String, expected: &'static str },

    #[error("Memory access out of bounds: offset {offset} + {len} exceeds {size} bytes")]
    MemoryOutOfBounds { offset: usize, len: usize, size: usize },

    #[error("Global is immutable or rejected the value: {0}")]
    GlobalSet(String),

    #[error("Table operation failed: {0}")]
    Table(String),

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("Unsupported value type for this operation: {0}")]
    UnsupportedValType(ValType),

    #[error("Cannot release {0}: it is still referenced")]
    StillReferenced(&'static str),

    #[error("Invalid name {0:?}: contains a NUL byte")]
    InvalidName(String),

    #[error("Failed to configure WASI: {0}")]
    Wasi(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
