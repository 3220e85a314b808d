use std::path::Path;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasm_engine_t, wasmtime_context_t, wasmtime_store_t};
use crate::ffi::Native;

use super::callback::CallbackRegistry;

/// A native engine. Owns the loaded library through its bindings.
pub struct Engine {
    native: Arc<Native>,
    raw: *mut wasm_engine_t,
}

// wasm_engine_t is safe to share across threads.
unsafe impl Send for Engine {}
unsafe impl Sync for Engine {}

impl Engine {
    /// Loads the library at `path` and creates an engine with the default configuration.
    pub fn load(path: &Path) -> RuntimeResult<Arc<Engine>> {
        let native = Native::load(path)?;
        Ok(Arc::new(Self::with_native(native)?))
    }

    pub(crate) fn with_native(native: Arc<Native>) -> RuntimeResult<Self> {
        let raw = unsafe { (native.api.wasm_engine_new)() };
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("engine"));
        }
        tracing::debug!("created engine");
        Ok(Self { native, raw })
    }

    pub(crate) fn native(&self) -> &Arc<Native> {
        &self.native
    }

    pub(crate) fn raw(&self) -> *mut wasm_engine_t {
        self.raw
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_null()
    }

    /// Deletes the native engine. Later calls do nothing.
    pub fn release(&mut self) {
        if self.raw.is_null() {
            return;
        }
        unsafe { (self.native.api.wasm_engine_delete)(self.raw) };
        self.raw = std::ptr::null_mut();
        tracing::debug!("released engine");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.release();
    }
}

/// A store: the unit of isolation every instance and host function lives in.
///
/// Raw pointers keep this type `!Send` and `!Sync`, matching the engine's
/// single-threaded store rule.
pub struct Store {
    engine: Arc<Engine>,
    raw: *mut wasmtime_store_t,
    context: *mut wasmtime_context_t,
    registry: CallbackRegistry,
}

impl Store {
    pub fn new(engine: &Arc<Engine>) -> RuntimeResult<Self> {
        let native = engine.native();
        let raw = unsafe { (native.api.wasmtime_store_new)(engine.raw(), std::ptr::null_mut(), None) };
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("store"));
        }
        let context = unsafe { (native.api.wasmtime_store_context)(raw) };
        if context.is_null() {
            unsafe { (native.api.wasmtime_store_delete)(raw) };
            return Err(RuntimeError::CreationFailed("store context"));
        }
        tracing::debug!("created store");
        Ok(Self {
            engine: engine.clone(),
            raw,
            context,
            registry: CallbackRegistry::default(),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub(crate) fn native(&self) -> &Arc<Native> {
        self.engine.native()
    }

    pub(crate) fn context(&self) -> *mut wasmtime_context_t {
        self.context
    }

    /// Host functions currently registered in this store.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_null()
    }

    /// Deletes the native store, then drops any host function registrations the
    /// engine's finalizers did not already evict. Later calls do nothing.
    pub fn release(&mut self) {
        if self.raw.is_null() {
            return;
        }
        unsafe { (self.native().api.wasmtime_store_delete)(self.raw) };
        self.raw = std::ptr::null_mut();
        self.context = std::ptr::null_mut();
        self.registry.clear();
        tracing::debug!("released store");
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.release();
    }
}
