use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasmtime_instance_t, wasmtime_linker_t, ExternItem};
use crate::value::ValType;

use super::callback::{new_host_func, HostFunc, HostTrapWatch};
use super::instance::Instance;
use super::module::Module;
use super::store::{Engine, Store};

/// Resolves imports by module and field name.
pub struct Linker {
    engine: Arc<Engine>,
    raw: *mut wasmtime_linker_t,
}

impl Linker {
    pub fn new(engine: &Arc<Engine>) -> RuntimeResult<Self> {
        let raw = unsafe { (engine.native().api.wasmtime_linker_new)(engine.raw()) };
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("linker"));
        }
        Ok(Self {
            engine: engine.clone(),
            raw,
        })
    }

    /// Defines the `wasi_snapshot_preview1` imports. The store still needs a WASI configuration.
    pub fn define_wasi(&self) -> RuntimeResult<()> {
        let native = self.engine.native();
        let error = unsafe { (native.api.wasmtime_linker_define_wasi)(self.raw) };
        unsafe { native.check(error, RuntimeError::Wasi) }
    }

    pub fn define(&self, store: &Store, module: &str, name: &str, item: &ExternItem) -> RuntimeResult<()> {
        let native = self.engine.native();
        let error = unsafe {
            (native.api.wasmtime_linker_define)(
                self.raw,
                store.context(),
                module.as_ptr().cast(),
                module.len(),
                name.as_ptr().cast(),
                name.len(),
                item,
            )
        };
        unsafe {
            native.check(error, |reason| RuntimeError::Link {
                module: module.to_string(),
                name: name.to_string(),
                reason,
            })
        }
    }

    /// Registers `func` in `store` and defines it as `module::name`. Returns the callback id.
    pub fn define_func(
        &self,
        store: &Store,
        module: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
        func: HostFunc,
    ) -> RuntimeResult<u64> {
        let (id, raw) = new_host_func(store, params, results, func)?;
        self.define(store, module, name, &ExternItem::from_func(raw))?;
        tracing::debug!("defined host function {module}::{name} (id {id})");
        Ok(id)
    }

    pub fn instantiate(&self, store: &Arc<Store>, module: &Arc<Module>) -> RuntimeResult<Instance> {
        let native = self.engine.native();
        let mut raw = wasmtime_instance_t {
            store_id: 0,
            private: 0,
        };
        let watch = HostTrapWatch::start();
        let mut trap = std::ptr::null_mut();
        let error = unsafe {
            (native.api.wasmtime_linker_instantiate)(self.raw, store.context(), module.raw(), &mut raw, &mut trap)
        };
        Instance::finish(store, module, raw, error, trap, watch.raised())
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_null()
    }

    pub fn release(&mut self) {
        if self.raw.is_null() {
            return;
        }
        unsafe { (self.engine.native().api.wasmtime_linker_delete)(self.raw) };
        self.raw = std::ptr::null_mut();
    }
}

impl Drop for Linker {
    fn drop(&mut self) {
        self.release();
    }
}

struct HostFuncDef {
    name: String,
    params: Vec<ValType>,
    results: Vec<ValType>,
    func: HostFunc,
}

/// Collects host functions under one import module name, then defines them all.
pub struct HostModuleBuilder<'a> {
    linker: &'a Linker,
    store: &'a Store,
    name: String,
    funcs: Vec<HostFuncDef>,
}

impl<'a> HostModuleBuilder<'a> {
    pub fn new(linker: &'a Linker, store: &'a Store, name: impl Into<String>) -> Self {
        Self {
            linker,
            store,
            name: name.into(),
            funcs: vec![],
        }
    }

    pub fn func(mut self, name: impl Into<String>, params: &[ValType], results: &[ValType], func: HostFunc) -> Self {
        self.funcs.push(HostFuncDef {
            name: name.into(),
            params: params.to_vec(),
            results: results.to_vec(),
            func,
        });
        self
    }

    pub fn instantiate(self) -> RuntimeResult<HostModule> {
        let mut functions = Vec::with_capacity(self.funcs.len());
        for def in self.funcs {
            let id = self
                .linker
                .define_func(self.store, &self.name, &def.name, &def.params, &def.results, def.func)?;
            functions.push((def.name, id));
        }
        Ok(HostModule {
            name: self.name,
            functions,
        })
    }
}

/// Host functions defined under one module name.
#[derive(Debug, Clone)]
pub struct HostModule {
    name: String,
    functions: Vec<(String, u64)>,
}

impl HostModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callback id of each function, in definition order.
    pub fn functions(&self) -> &[(String, u64)] {
        &self.functions
    }
}
