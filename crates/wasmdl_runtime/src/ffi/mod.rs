//! Raw access to the dynamically loaded wasmtime C API.

pub(crate) mod bindings;
pub mod loader;
pub(crate) mod types;

use std::ffi::{c_int, CString};
use std::path::Path;
use std::sync::Arc;

use bindings::Bindings;
use loader::{LibraryLease, LibraryLoader};
use types::{wasm_byte_vec_t, wasm_trap_t, wasmtime_context_t, wasmtime_error_t};

use crate::engine::call::CallBufferPool;
use crate::error::{ExitError, RuntimeError, RuntimeResult};

/// A loaded library together with its resolved entry points.
///
/// The lease keeps the library mapped for as long as any handle created from
/// these bindings is alive.
pub(crate) struct Native {
    pub(crate) api: Bindings,
    pub(crate) pool: CallBufferPool,
    _lease: Option<LibraryLease>,
}

impl Native {
    pub(crate) fn load(path: &Path) -> RuntimeResult<Arc<Native>> {
        let lease = LibraryLease::acquire(LibraryLoader::shared(), path)?;
        let api = unsafe { Bindings::resolve(lease.library())? };
        tracing::debug!(
            "resolved {} wasmtime symbols from {}",
            Bindings::SYMBOLS.len(),
            path.display()
        );
        Ok(Arc::new(Native {
            api,
            pool: CallBufferPool::default(),
            _lease: Some(lease),
        }))
    }

    #[cfg(test)]
    pub(crate) fn with_bindings(api: Bindings) -> Arc<Native> {
        Arc::new(Native {
            api,
            pool: CallBufferPool::default(),
            _lease: None,
        })
    }

    /// Consumes a native error. The exit status is checked before the message.
    ///
    /// # Safety
    /// `error` must be a live, non-null error handle; it is deleted here.
    pub(crate) unsafe fn take_error(&self, error: *mut wasmtime_error_t) -> NativeError {
        let mut status: c_int = 0;
        let result = if unsafe { (self.api.wasmtime_error_exit_status)(error, &mut status) } {
            NativeError::Exit(status)
        } else {
            let mut message = wasm_byte_vec_t::empty();
            unsafe { (self.api.wasmtime_error_message)(error, &mut message) };
            NativeError::Message(unsafe { self.take_message(&mut message) })
        };
        unsafe { (self.api.wasmtime_error_delete)(error) };
        result
    }

    /// Converts a possibly-null error into a `Result`, with exits kept structured.
    ///
    /// # Safety
    /// `error` must be null or a live error handle.
    pub(crate) unsafe fn check(
        &self,
        error: *mut wasmtime_error_t,
        wrap: impl FnOnce(String) -> RuntimeError,
    ) -> RuntimeResult<()> {
        if error.is_null() {
            return Ok(());
        }
        Err(unsafe { self.take_error(error) }.into_runtime_error(wrap))
    }

    /// Consumes a trap and returns its message.
    ///
    /// # Safety
    /// `trap` must be a live, non-null trap handle; it is deleted here.
    pub(crate) unsafe fn take_trap(&self, trap: *mut wasm_trap_t) -> String {
        let mut message = wasm_byte_vec_t::empty();
        unsafe { (self.api.wasm_trap_message)(trap, &mut message) };
        let text = unsafe { self.take_message(&mut message) };
        unsafe { (self.api.wasm_trap_delete)(trap) };
        text
    }

    /// A trap carrying `message`, owned by the caller (usually handed back to the engine).
    pub(crate) fn new_trap(&self, message: &str) -> *mut wasm_trap_t {
        unsafe { (self.api.wasmtime_trap_new)(message.as_ptr().cast(), message.len()) }
    }

    unsafe fn take_message(&self, message: &mut wasm_byte_vec_t) -> String {
        let text = message_text(unsafe { message.as_slice() });
        if !message.data.is_null() {
            unsafe { (self.api.wasm_byte_vec_delete)(message) };
        }
        text
    }
}

/// Message bytes are surfaced verbatim. `wasm_trap_message` appends one NUL
/// terminator to its output; only that single byte is dropped.
pub(crate) fn message_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\0").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) fn c_string(value: &str) -> RuntimeResult<CString> {
    CString::new(value).map_err(|_| RuntimeError::InvalidName(value.to_string()))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum NativeError {
    Exit(i32),
    Message(String),
}

impl NativeError {
    pub(crate) fn into_runtime_error(self, wrap: impl FnOnce(String) -> RuntimeError) -> RuntimeError {
        match self {
            NativeError::Exit(code) => ExitError { code }.into(),
            NativeError::Message(message) => wrap(message),
        }
    }
}

/// Store context pointer that may be kept inside shared registries.
///
/// The pointer is only dereferenced by the engine on the thread driving the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContextPtr(pub(crate) *mut wasmtime_context_t);

unsafe impl Send for ContextPtr {}
unsafe impl Sync for ContextPtr {}
