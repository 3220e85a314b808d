//! Bindings to a wasmtime C API shared library loaded at runtime.
//!
//! Values cross the boundary as `u64` carriers (see [`value`]); host functions
//! are dispatched through a per-store callback registry.

pub mod engine;
pub mod error;
pub(crate) mod ffi;
pub mod value;

#[cfg(test)]
mod testing;

pub use engine::*;
pub use error::{ExitError, RuntimeError, RuntimeResult};
pub use ffi::loader::{LibraryLease, LibraryLoader};
pub use ffi::types::{ExternItem, TaggedValue};
pub use value::ValType;
