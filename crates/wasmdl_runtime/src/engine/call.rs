use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasm_valtype_vec_t, wasmtime_context_t, wasmtime_func_t, TaggedValue};
use crate::ffi::{Native, NativeError};
use crate::value::ValType;

use super::callback::HostTrapWatch;
use super::store::Store;

/// Upper bound on idle buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 32;

/// Parameter and result slots staged for one native call.
#[derive(Default)]
pub(crate) struct CallBuffer {
    pub(crate) params: Vec<TaggedValue>,
    pub(crate) results: Vec<TaggedValue>,
}

#[derive(Default)]
pub(crate) struct CallBufferPool {
    free: Mutex<Vec<CallBuffer>>,
}

impl CallBufferPool {
    fn lock(&self) -> MutexGuard<'_, Vec<CallBuffer>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> PooledBuffer<'_> {
        let buffer = self.lock().pop().unwrap_or_default();
        PooledBuffer { pool: self, buffer }
    }

    fn put(&self, mut buffer: CallBuffer) {
        buffer.params.clear();
        buffer.results.clear();
        let mut free = self.lock();
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buffer);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.lock().len()
    }
}

/// Returns its buffer to the pool when dropped, whichever way the call ended.
pub(crate) struct PooledBuffer<'a> {
    pool: &'a CallBufferPool,
    buffer: CallBuffer,
}

impl Deref for PooledBuffer<'_> {
    type Target = CallBuffer;

    fn deref(&self) -> &CallBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut CallBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buffer));
    }
}

/// Calls `func` with carrier-encoded `params` and decodes the results.
///
/// An exit with status 0 counts as success and returns whatever the result
/// slots hold. A failure raised by a host function surfaces as a trap. Native
/// error and trap handles are deleted on every branch.
pub(crate) fn call_func(
    native: &Native,
    context: *mut wasmtime_context_t,
    func: &wasmtime_func_t,
    params: &[u64],
    param_types: &[ValType],
    result_types: &[ValType],
) -> RuntimeResult<Vec<u64>> {
    if params.len() != param_types.len() {
        return Err(RuntimeError::ArityMismatch {
            expected: param_types.len(),
            actual: params.len(),
        });
    }

    let mut buffer = native.pool.get();
    let CallBuffer {
        params: args,
        results,
    } = &mut *buffer;
    args.extend(
        params
            .iter()
            .zip(param_types)
            .map(|(&carrier, &ty)| TaggedValue::encode(carrier, ty)),
    );
    results.extend(result_types.iter().map(|&ty| TaggedValue::zeroed(ty)));

    let watch = HostTrapWatch::start();
    let mut trap = std::ptr::null_mut();
    let error = unsafe {
        (native.api.wasmtime_func_call)(
            context,
            func,
            args.as_ptr(),
            args.len(),
            results.as_mut_ptr(),
            results.len(),
            &mut trap,
        )
    };

    if !error.is_null() {
        let outcome = unsafe { native.take_error(error) };
        if !trap.is_null() {
            unsafe { native.take_trap(trap) };
            trap = std::ptr::null_mut();
        }
        match outcome {
            NativeError::Exit(0) => {
                tracing::debug!("guest exited with status 0 during call; treating as success");
            }
            NativeError::Message(message) if watch.raised() => {
                return Err(RuntimeError::Trapped(message));
            }
            other => return Err(other.into_runtime_error(RuntimeError::CallFailed)),
        }
    }
    if !trap.is_null() {
        return Err(RuntimeError::Trapped(unsafe { native.take_trap(trap) }));
    }

    Ok(results
        .iter()
        .zip(result_types)
        .map(|(slot, &ty)| {
            slot.decode_as(ty).unwrap_or_else(|| {
                tracing::warn!("result slot declared {ty} came back as {slot:?}");
                slot.decode()
            })
        })
        .collect())
}

/// Parameter and result types of a function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    fn of(native: &Native, context: *mut wasmtime_context_t, func: &wasmtime_func_t) -> RuntimeResult<Self> {
        let raw = unsafe { (native.api.wasmtime_func_type)(context, func) };
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("function type"));
        }
        let params = unsafe { read_valtypes(native, (native.api.wasm_functype_params)(raw)) };
        let results = unsafe { read_valtypes(native, (native.api.wasm_functype_results)(raw)) };
        unsafe { (native.api.wasm_functype_delete)(raw) };
        Ok(Self {
            params: params?,
            results: results?,
        })
    }
}

unsafe fn read_valtypes(native: &Native, vec: *const wasm_valtype_vec_t) -> RuntimeResult<Vec<ValType>> {
    let Some(vec) = (unsafe { vec.as_ref() }) else {
        return Ok(vec![]);
    };
    if vec.size == 0 || vec.data.is_null() {
        return Ok(vec![]);
    }
    let entries = unsafe { std::slice::from_raw_parts(vec.data, vec.size) };
    entries
        .iter()
        .map(|&entry| {
            let kind = unsafe { (native.api.wasm_valtype_kind)(entry) };
            ValType::from_wasm_kind(kind).ok_or(RuntimeError::Unsupported("unknown value type kind"))
        })
        .collect()
}

/// An exported function bound to the store it lives in.
pub struct Function {
    store: Arc<Store>,
    raw: wasmtime_func_t,
    name: String,
    ty: FuncType,
}

impl Function {
    pub(crate) fn new(store: Arc<Store>, raw: wasmtime_func_t, name: &str) -> RuntimeResult<Self> {
        let ty = FuncType::of(store.native(), store.context(), &raw)?;
        Ok(Self {
            store,
            raw,
            name: name.to_string(),
            ty,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    /// Calls the function. `params` must match the declared parameter count.
    pub fn call(&self, params: &[u64]) -> RuntimeResult<Vec<u64>> {
        tracing::trace!("calling {}{:?}", self.name, params);
        call_func(
            self.store.native(),
            self.store.context(),
            &self.raw,
            params,
            &self.ty.params,
            &self.ty.results,
        )
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}
