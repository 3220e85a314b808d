//! Host functions callable from WebAssembly.
//!
//! The engine only threads an opaque `env` pointer through to the callback, so
//! every host function is registered under a numeric id in its store's
//! [`CallbackRegistry`] and a single [`trampoline`] dispatches on that id.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{
    wasm_functype_t, wasm_trap_t, wasm_valtype_t, wasm_valtype_vec_t, wasmtime_caller_t,
    wasmtime_context_t, wasmtime_func_t, wasmtime_val_t, ExternItem, TaggedValue,
};
use crate::ffi::{ContextPtr, Native};
use crate::value::ValType;

use super::externals::{Global, Memory, Table};
use super::store::Store;

type StackFn = dyn Fn(&mut [u64]) + Send + Sync;
type CallerFn = dyn Fn(&CallerModule<'_>, &mut [u64]) -> anyhow::Result<()> + Send + Sync;
type ListFn = dyn Fn(&[u64]) -> anyhow::Result<Vec<u64>> + Send + Sync;

/// Implementation of a host function.
pub enum HostFunc {
    /// Reads parameters from and writes results into one carrier array.
    /// Parameters occupy `[0, params)`, results start at index `params`.
    Stack(Box<StackFn>),
    /// Like `Stack`, with access to the calling module's exports.
    Caller(Box<CallerFn>),
    /// Takes the parameters and returns the results.
    List(Box<ListFn>),
}

impl HostFunc {
    pub fn stack(f: impl Fn(&mut [u64]) + Send + Sync + 'static) -> Self {
        Self::Stack(Box::new(f))
    }

    pub fn with_caller(
        f: impl Fn(&CallerModule<'_>, &mut [u64]) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Caller(Box::new(f))
    }

    pub fn list(f: impl Fn(&[u64]) -> anyhow::Result<Vec<u64>> + Send + Sync + 'static) -> Self {
        Self::List(Box::new(f))
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Stack(_) => "Stack",
            Self::Caller(_) => "Caller",
            Self::List(_) => "List",
        };
        write!(f, "HostFunc::{shape}")
    }
}

pub(crate) struct Registration {
    pub(crate) params: Vec<ValType>,
    pub(crate) results: Vec<ValType>,
    pub(crate) func: HostFunc,
    pub(crate) context: ContextPtr,
}

impl Registration {
    fn invoke(&self, caller: &CallerModule<'_>, mut carriers: Vec<u64>) -> anyhow::Result<Vec<u64>> {
        let nparams = self.params.len();
        match &self.func {
            HostFunc::Stack(f) => {
                carriers.resize(nparams + self.results.len(), 0);
                f(&mut carriers);
                Ok(carriers.split_off(nparams))
            }
            HostFunc::Caller(f) => {
                carriers.resize(nparams + self.results.len(), 0);
                f(caller, &mut carriers)?;
                Ok(carriers.split_off(nparams))
            }
            HostFunc::List(f) => f(&carriers),
        }
    }
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    entries: RwLock<HashMap<u64, Arc<Registration>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn get(&self, id: u64) -> Option<Arc<Registration>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn remove(&self, id: u64) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Host functions registered in one store, keyed by id. Ids are never reused.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: Arc<RegistryInner>,
}

impl CallbackRegistry {
    pub(crate) fn register(&self, registration: Registration) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(registration));
        id
    }

    pub(crate) fn get(&self, id: u64) -> Option<Arc<Registration>> {
        self.inner.get(id)
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.inner.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn env(&self, native: Arc<Native>, id: u64) -> *mut c_void {
        Box::into_raw(Box::new(CallbackEnv {
            registry: self.inner.clone(),
            native,
            id,
        }))
        .cast()
    }
}

/// Handed to the engine as the callback environment.
pub(crate) struct CallbackEnv {
    registry: Arc<RegistryInner>,
    native: Arc<Native>,
    id: u64,
}

/// Runs when the engine drops the function object that owns `env`.
pub(crate) unsafe extern "C" fn finalize_env(env: *mut c_void) {
    if env.is_null() {
        return;
    }
    let env = unsafe { Box::from_raw(env.cast::<CallbackEnv>()) };
    if env.registry.remove(env.id) {
        tracing::debug!("evicted host function {}", env.id);
    }
}

thread_local! {
    /// Set when a host function on this thread hands a trap back to the engine.
    static HOST_TRAPPED: Cell<bool> = const { Cell::new(false) };
}

/// Watches one native call for traps raised by host functions.
///
/// The engine reports a trap built with `wasmtime_trap_new` through its error
/// channel, indistinguishable from other failures. The trampoline marks the
/// thread instead, and the caller of the native function reads the mark.
/// Watches nest: dropping one restores the mark of the enclosing call.
pub(crate) struct HostTrapWatch {
    outer: bool,
}

impl HostTrapWatch {
    pub(crate) fn start() -> Self {
        Self {
            outer: HOST_TRAPPED.with(|flag| flag.replace(false)),
        }
    }

    pub(crate) fn raised(&self) -> bool {
        HOST_TRAPPED.with(Cell::get)
    }
}

impl Drop for HostTrapWatch {
    fn drop(&mut self) {
        HOST_TRAPPED.with(|flag| flag.set(self.outer));
    }
}

fn raise(native: &Native, message: &str) -> *mut wasm_trap_t {
    HOST_TRAPPED.with(|flag| flag.set(true));
    native.new_trap(message)
}

/// Native entry point of every host function.
pub(crate) unsafe extern "C" fn trampoline(
    env: *mut c_void,
    caller: *mut wasmtime_caller_t,
    args: *const wasmtime_val_t,
    nargs: usize,
    results: *mut wasmtime_val_t,
    nresults: usize,
) -> *mut wasm_trap_t {
    let env = unsafe { &*env.cast::<CallbackEnv>() };
    let native = &env.native;

    // Held until the call returns, so eviction cannot free it underneath us.
    let Some(registration) = env.registry.get(env.id) else {
        return raise(native, &format!("host function {} is not registered", env.id));
    };
    if nargs != registration.params.len() || nresults != registration.results.len() {
        return raise(native, &format!(
            "host function {} expects {} parameters and {} results, engine passed {nargs} and {nresults}",
            env.id,
            registration.params.len(),
            registration.results.len(),
        ));
    }

    let args = if nargs == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(args, nargs) }
    };
    let mut carriers = Vec::with_capacity(nargs + nresults);
    for (index, (value, &ty)) in args.iter().zip(&registration.params).enumerate() {
        match value.decode_as(ty) {
            Some(carrier) => carriers.push(carrier),
            None => {
                return raise(native, &format!(
                    "host function {} parameter {index}: expected {ty}, got {value:?}",
                    env.id
                ));
            }
        }
    }

    let caller = CallerModule::new(native, caller, registration.context);
    let outputs = match catch_unwind(AssertUnwindSafe(|| registration.invoke(&caller, carriers))) {
        Ok(Ok(outputs)) => outputs,
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            tracing::warn!("host function {} failed: {message}", env.id);
            return raise(native, &message);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!("host function {} panicked: {message}", env.id);
            return raise(native, &message);
        }
    };

    if outputs.len() != nresults {
        return raise(native, &format!(
            "host function {} returned {} results, expected {nresults}",
            env.id,
            outputs.len()
        ));
    }
    if nresults > 0 {
        let slots = unsafe { std::slice::from_raw_parts_mut(results, nresults) };
        for ((slot, &ty), carrier) in slots.iter_mut().zip(&registration.results).zip(outputs) {
            *slot = TaggedValue::encode(carrier, ty);
        }
    }
    std::ptr::null_mut()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("host function panicked: {s}")
    } else {
        "host function panicked".to_string()
    }
}

/// Exports of the module that called a host function.
///
/// Lookups go through the engine on every call, so they reflect the caller's
/// current state.
pub struct CallerModule<'a> {
    native: &'a Native,
    caller: *mut wasmtime_caller_t,
    store_context: ContextPtr,
}

impl<'a> CallerModule<'a> {
    pub(crate) fn new(
        native: &'a Native,
        caller: *mut wasmtime_caller_t,
        store_context: ContextPtr,
    ) -> Self {
        Self {
            native,
            caller,
            store_context,
        }
    }

    pub fn export(&self, name: &str) -> Option<ExternItem> {
        if self.caller.is_null() {
            return None;
        }
        let mut item = ExternItem::zeroed();
        let found = unsafe {
            (self.native.api.wasmtime_caller_export_get)(
                self.caller,
                name.as_ptr().cast(),
                name.len(),
                &mut item,
            )
        };
        found.then_some(item)
    }

    /// Context of the calling store, falling back to the one the function was registered in.
    fn context(&self) -> *mut wasmtime_context_t {
        let context = unsafe { (self.native.api.wasmtime_caller_context)(self.caller) };
        if context.is_null() {
            self.store_context.0
        } else {
            context
        }
    }

    pub fn memory(&self, name: &str) -> Option<Memory<'a>> {
        let raw = self.export(name)?.as_memory()?;
        Some(Memory::new(self.native, self.context(), raw))
    }

    pub fn global(&self, name: &str) -> Option<Global<'a>> {
        let raw = self.export(name)?.as_global()?;
        Some(Global::new(self.native, self.context(), raw))
    }

    pub fn table(&self, name: &str) -> Option<Table<'a>> {
        let raw = self.export(name)?.as_table()?;
        Some(Table::new(self.native, self.context(), raw))
    }
}

/// Builds a native function object that dispatches to `func` through the trampoline.
pub(crate) fn new_host_func(
    store: &Store,
    params: &[ValType],
    results: &[ValType],
    func: HostFunc,
) -> RuntimeResult<(u64, wasmtime_func_t)> {
    let native = store.native();
    let functype = new_functype(native, params, results)?;

    let id = store.registry().register(Registration {
        params: params.to_vec(),
        results: results.to_vec(),
        func,
        context: ContextPtr(store.context()),
    });
    let env = store.registry().env(native.clone(), id);

    let mut raw = wasmtime_func_t {
        store_id: 0,
        private: std::ptr::null_mut(),
    };
    unsafe {
        (native.api.wasmtime_func_new)(
            store.context(),
            functype,
            trampoline,
            env,
            Some(finalize_env),
            &mut raw,
        );
        (native.api.wasm_functype_delete)(functype);
    }
    tracing::debug!("registered host function {id} {params:?} -> {results:?}");
    Ok((id, raw))
}

fn new_functype(
    native: &Native,
    params: &[ValType],
    results: &[ValType],
) -> RuntimeResult<*mut wasm_functype_t> {
    let mut params = valtype_vec(native, params);
    let mut results = valtype_vec(native, results);
    // Takes ownership of both vectors and their valtypes.
    let functype = unsafe { (native.api.wasm_functype_new)(&mut params, &mut results) };
    if functype.is_null() {
        return Err(RuntimeError::CreationFailed("function type"));
    }
    Ok(functype)
}

fn valtype_vec(native: &Native, types: &[ValType]) -> wasm_valtype_vec_t {
    let mut vec = wasm_valtype_vec_t::empty();
    if types.is_empty() {
        unsafe { (native.api.wasm_valtype_vec_new_empty)(&mut vec) };
        return vec;
    }
    let entries: Vec<*mut wasm_valtype_t> = types
        .iter()
        .map(|ty| unsafe { (native.api.wasm_valtype_new)(ty.wasm_kind()) })
        .collect();
    unsafe { (native.api.wasm_valtype_vec_new)(&mut vec, entries.len(), entries.as_ptr()) };
    vec
}
