use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasm_byte_vec_t, wasmtime_module_t};

use super::store::Engine;

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// A compiled module.
pub struct Module {
    engine: Arc<Engine>,
    raw: *mut wasmtime_module_t,
}

// wasmtime_module_t is immutable after compilation and safe to share.
unsafe impl Send for Module {}
unsafe impl Sync for Module {}

impl Module {
    /// Compiles a binary module, or a text module after converting it with `wat2wasm`.
    pub fn new(engine: &Arc<Engine>, bytes: &[u8]) -> RuntimeResult<Self> {
        if bytes.starts_with(WASM_MAGIC) {
            return Self::from_binary(engine, bytes);
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RuntimeError::Compile("input is neither a wasm binary nor UTF-8 text".to_string()))?;
        let wasm = wat2wasm(engine, text)?;
        Self::from_binary(engine, &wasm)
    }

    pub fn from_binary(engine: &Arc<Engine>, wasm: &[u8]) -> RuntimeResult<Self> {
        let native = engine.native();
        let mut raw = std::ptr::null_mut();
        let error = unsafe { (native.api.wasmtime_module_new)(engine.raw(), wasm.as_ptr(), wasm.len(), &mut raw) };
        unsafe { native.check(error, RuntimeError::Compile) }?;
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("module"));
        }
        tracing::debug!("compiled module ({} bytes)", wasm.len());
        Ok(Self {
            engine: engine.clone(),
            raw,
        })
    }

    pub(crate) fn raw(&self) -> *const wasmtime_module_t {
        self.raw
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Export introspection is not exposed by the C API build this runtime binds to.
    pub fn exports(&self) -> RuntimeResult<Vec<String>> {
        Err(RuntimeError::Unsupported("module export introspection"))
    }

    pub fn custom_sections(&self, _name: &str) -> RuntimeResult<Vec<Vec<u8>>> {
        Err(RuntimeError::Unsupported("custom sections"))
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_null()
    }

    pub fn release(&mut self) {
        if self.raw.is_null() {
            return;
        }
        unsafe { (self.engine.native().api.wasmtime_module_delete)(self.raw) };
        self.raw = std::ptr::null_mut();
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        self.release();
    }
}

fn wat2wasm(engine: &Engine, text: &str) -> RuntimeResult<Vec<u8>> {
    let native = engine.native();
    let mut out = wasm_byte_vec_t::empty();
    let error = unsafe { (native.api.wasmtime_wat2wasm)(text.as_ptr().cast(), text.len(), &mut out) };
    unsafe { native.check(error, RuntimeError::Compile) }?;
    let wasm = unsafe { out.as_slice() }.to_vec();
    unsafe { (native.api.wasm_byte_vec_delete)(&mut out) };
    Ok(wasm)
}
