//! Memories, globals and tables reached through an instance or a calling module.

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{wasmtime_context_t, wasmtime_global_t, wasmtime_memory_t, wasmtime_table_t, TaggedValue};
use crate::ffi::Native;
use crate::value::ValType;

/// WebAssembly page size.
pub const WASM_PAGE_SIZE: usize = 65536;

/// A linear memory. The data pointer is looked up on every access since growing may move it.
pub struct Memory<'a> {
    native: &'a Native,
    context: *mut wasmtime_context_t,
    raw: wasmtime_memory_t,
}

impl<'a> Memory<'a> {
    pub(crate) fn new(native: &'a Native, context: *mut wasmtime_context_t, raw: wasmtime_memory_t) -> Self {
        Self {
            native,
            context,
            raw,
        }
    }

    /// Current size in bytes.
    pub fn data_size(&self) -> usize {
        unsafe { (self.native.api.wasmtime_memory_data_size)(self.context, &self.raw) }
    }

    /// Current size in pages.
    pub fn size(&self) -> u64 {
        unsafe { (self.native.api.wasmtime_memory_size)(self.context, &self.raw) }
    }

    /// Grows by `delta` pages and returns the previous size in pages.
    pub fn grow(&self, delta: u64) -> RuntimeResult<u64> {
        let mut previous = 0;
        let error =
            unsafe { (self.native.api.wasmtime_memory_grow)(self.context, &self.raw, delta, &mut previous) };
        unsafe { self.native.check(error, RuntimeError::CallFailed) }?;
        Ok(previous)
    }

    fn bounds(&self, offset: usize, len: usize) -> RuntimeResult<*mut u8> {
        let size = self.data_size();
        match offset.checked_add(len) {
            Some(end) if end <= size => {}
            _ => return Err(RuntimeError::MemoryOutOfBounds { offset, len, size }),
        }
        let data = unsafe { (self.native.api.wasmtime_memory_data)(self.context, &self.raw) };
        if data.is_null() && len > 0 {
            return Err(RuntimeError::MemoryOutOfBounds { offset, len, size: 0 });
        }
        Ok(data)
    }

    pub fn read_into(&self, offset: usize, buf: &mut [u8]) -> RuntimeResult<()> {
        let data = self.bounds(offset, buf.len())?;
        if !buf.is_empty() {
            unsafe { std::ptr::copy_nonoverlapping(data.add(offset), buf.as_mut_ptr(), buf.len()) };
        }
        Ok(())
    }

    pub fn read(&self, offset: usize, len: usize) -> RuntimeResult<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> RuntimeResult<()> {
        let data = self.bounds(offset, bytes.len())?;
        if !bytes.is_empty() {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(offset), bytes.len()) };
        }
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> RuntimeResult<u32> {
        let mut bytes = [0; 4];
        self.read_into(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> RuntimeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// A global variable. Its type is discovered from its current value.
pub struct Global<'a> {
    native: &'a Native,
    context: *mut wasmtime_context_t,
    raw: wasmtime_global_t,
}

impl<'a> Global<'a> {
    pub(crate) fn new(native: &'a Native, context: *mut wasmtime_context_t, raw: wasmtime_global_t) -> Self {
        Self {
            native,
            context,
            raw,
        }
    }

    fn value(&self) -> TaggedValue {
        let mut value = TaggedValue::zeroed(ValType::I32);
        unsafe { (self.native.api.wasmtime_global_get)(self.context, &self.raw, &mut value) };
        value
    }

    pub fn get(&self) -> u64 {
        self.value().decode()
    }

    pub fn ty(&self) -> Option<ValType> {
        self.value().kind()
    }

    /// Sets the value. Fails on immutable globals.
    pub fn set(&self, carrier: u64) -> RuntimeResult<()> {
        let ty = self
            .ty()
            .ok_or(RuntimeError::Unsupported("global of unknown type"))?;
        if !ty.round_trips() {
            return Err(RuntimeError::UnsupportedValType(ty));
        }
        let value = TaggedValue::encode(carrier, ty);
        let error = unsafe { (self.native.api.wasmtime_global_set)(self.context, &self.raw, &value) };
        unsafe { self.native.check(error, RuntimeError::GlobalSet) }
    }
}

/// A table of references.
pub struct Table<'a> {
    native: &'a Native,
    context: *mut wasmtime_context_t,
    raw: wasmtime_table_t,
}

impl<'a> Table<'a> {
    pub(crate) fn new(native: &'a Native, context: *mut wasmtime_context_t, raw: wasmtime_table_t) -> Self {
        Self {
            native,
            context,
            raw,
        }
    }

    pub fn size(&self) -> u64 {
        unsafe { (self.native.api.wasmtime_table_size)(self.context, &self.raw) }
    }

    /// Element at `index` as a carrier. Funcref elements read as `0`.
    pub fn get(&self, index: u64) -> RuntimeResult<u64> {
        let mut value = TaggedValue::zeroed(ValType::FuncRef);
        let found = unsafe { (self.native.api.wasmtime_table_get)(self.context, &self.raw, index, &mut value) };
        if !found {
            return Err(RuntimeError::Table(format!(
                "index {index} out of bounds for table of size {}",
                self.size()
            )));
        }
        Ok(value.decode())
    }

    /// Grows by `delta` null elements of type `ty` and returns the previous size.
    pub fn grow(&self, delta: u64, ty: ValType) -> RuntimeResult<u64> {
        let init = null_reference(ty)?;
        let mut previous = 0;
        let error = unsafe {
            (self.native.api.wasmtime_table_grow)(self.context, &self.raw, delta, &init, &mut previous)
        };
        unsafe { self.native.check(error, RuntimeError::Table) }?;
        Ok(previous)
    }

    /// Stores an externref. Function references cannot be rebuilt from a carrier.
    pub fn set(&self, index: u64, carrier: u64, ty: ValType) -> RuntimeResult<()> {
        match ty {
            ValType::ExternRef => {}
            ValType::FuncRef => return Err(RuntimeError::Unsupported("storing funcref table elements")),
            other => return Err(RuntimeError::UnsupportedValType(other)),
        }
        let value = TaggedValue::encode(carrier, ty);
        let error = unsafe { (self.native.api.wasmtime_table_set)(self.context, &self.raw, index, &value) };
        unsafe { self.native.check(error, RuntimeError::Table) }
    }
}

fn null_reference(ty: ValType) -> RuntimeResult<TaggedValue> {
    match ty {
        ValType::FuncRef | ValType::ExternRef => Ok(TaggedValue::encode(0, ty)),
        other => Err(RuntimeError::UnsupportedValType(other)),
    }
}
