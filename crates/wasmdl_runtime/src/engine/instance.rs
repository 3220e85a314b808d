use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasm_trap_t, wasmtime_error_t, wasmtime_instance_t, ExternItem};

use super::call::Function;
use super::callback::HostTrapWatch;
use super::externals::{Global, Memory, Table};
use super::module::Module;
use super::store::Store;

/// An instantiated module. Instances are owned by their store and have no
/// destructor of their own; this handle keeps the store and module alive.
pub struct Instance {
    store: Arc<Store>,
    raw: wasmtime_instance_t,
    _module: Arc<Module>,
}

impl Instance {
    /// Instantiates `module` with imports given in declaration order.
    pub fn new(store: &Arc<Store>, module: &Arc<Module>, imports: &[ExternItem]) -> RuntimeResult<Self> {
        let native = store.native();
        let mut raw = wasmtime_instance_t {
            store_id: 0,
            private: 0,
        };
        let watch = HostTrapWatch::start();
        let mut trap = std::ptr::null_mut();
        // `imports` stays borrowed until the native call returns.
        let error = unsafe {
            (native.api.wasmtime_instance_new)(
                store.context(),
                module.raw(),
                imports.as_ptr(),
                imports.len(),
                &mut raw,
                &mut trap,
            )
        };
        Self::finish(store, module, raw, error, trap, watch.raised())
    }

    /// Maps the outcome of a native instantiation. `host_trapped` marks an error
    /// that started as a trap raised by a host function (usually from a start function).
    pub(crate) fn finish(
        store: &Arc<Store>,
        module: &Arc<Module>,
        raw: wasmtime_instance_t,
        error: *mut wasmtime_error_t,
        trap: *mut wasm_trap_t,
        host_trapped: bool,
    ) -> RuntimeResult<Self> {
        let native = store.native();
        if !error.is_null() {
            if !trap.is_null() {
                unsafe { native.take_trap(trap) };
            }
            let wrap = if host_trapped {
                RuntimeError::Trapped
            } else {
                RuntimeError::Instantiate
            };
            return Err(unsafe { native.take_error(error) }.into_runtime_error(wrap));
        }
        if !trap.is_null() {
            return Err(RuntimeError::Trapped(unsafe { native.take_trap(trap) }));
        }
        tracing::debug!("instantiated module");
        Ok(Self {
            store: store.clone(),
            raw,
            _module: module.clone(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Looks up an export by name.
    pub fn export(&self, name: &str) -> RuntimeResult<ExternItem> {
        let native = self.store.native();
        let mut item = ExternItem::zeroed();
        let found = unsafe {
            (native.api.wasmtime_instance_export_get)(
                self.store.context(),
                &self.raw,
                name.as_ptr().cast(),
                name.len(),
                &mut item,
            )
        };
        if !found {
            return Err(RuntimeError::ExportNotFound(name.to_string()));
        }
        Ok(item)
    }

    fn kind_error(name: &str, expected: &'static str) -> RuntimeError {
        RuntimeError::ExportKind {
            name: name.to_string(),
            expected,
        }
    }

    pub fn exported_function(&self, name: &str) -> RuntimeResult<Function> {
        let raw = self
            .export(name)?
            .as_func()
            .ok_or_else(|| Self::kind_error(name, "function"))?;
        Function::new(self.store.clone(), raw, name)
    }

    pub fn exported_memory(&self, name: &str) -> RuntimeResult<Memory<'_>> {
        let raw = self
            .export(name)?
            .as_memory()
            .ok_or_else(|| Self::kind_error(name, "memory"))?;
        Ok(Memory::new(self.store.native(), self.store.context(), raw))
    }

    pub fn exported_global(&self, name: &str) -> RuntimeResult<Global<'_>> {
        let raw = self
            .export(name)?
            .as_global()
            .ok_or_else(|| Self::kind_error(name, "global"))?;
        Ok(Global::new(self.store.native(), self.store.context(), raw))
    }

    pub fn exported_table(&self, name: &str) -> RuntimeResult<Table<'_>> {
        let raw = self
            .export(name)?
            .as_table()
            .ok_or_else(|| Self::kind_error(name, "table"))?;
        Ok(Table::new(self.store.native(), self.store.context(), raw))
    }

    /// Calls the exported function `name`.
    pub fn call(&self, name: &str, params: &[u64]) -> RuntimeResult<Vec<u64>> {
        self.exported_function(name)?.call(params)
    }
}
