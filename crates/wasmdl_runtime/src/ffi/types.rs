//! Binary layouts shared with the wasmtime C API (`wasmtime.h`, `wasm.h`).
//!
//! Every `#[repr(C)]` struct here must match the native header byte for byte.
//! Unions are modelled as fixed-size byte arrays with explicit padding so that
//! a layout drift shows up as a failed const assertion instead of silent
//! memory corruption.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::mem::{align_of, offset_of, size_of};

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub(crate) struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(
    wasm_engine_t,
    wasmtime_store_t,
    wasmtime_context_t,
    wasmtime_module_t,
    wasmtime_linker_t,
    wasmtime_error_t,
    wasmtime_caller_t,
    wasm_trap_t,
    wasm_functype_t,
    wasm_valtype_t,
    wasi_config_t,
);

pub(crate) type wasm_valkind_t = u8;
pub(crate) type wasmtime_valkind_t = u8;
pub(crate) type wasmtime_extern_kind_t = u8;

pub(crate) const WASMTIME_EXTERN_FUNC: wasmtime_extern_kind_t = 0;
pub(crate) const WASMTIME_EXTERN_GLOBAL: wasmtime_extern_kind_t = 1;
pub(crate) const WASMTIME_EXTERN_TABLE: wasmtime_extern_kind_t = 2;
pub(crate) const WASMTIME_EXTERN_MEMORY: wasmtime_extern_kind_t = 3;

pub(crate) const WASI_DIR_PERMS_READ: usize = 1;
pub(crate) const WASI_DIR_PERMS_WRITE: usize = 2;
pub(crate) const WASI_FILE_PERMS_READ: usize = 1;
pub(crate) const WASI_FILE_PERMS_WRITE: usize = 2;

/// Size of `wasmtime_valunion_t`: the largest member is a 24-byte reference record.
pub const VAL_PAYLOAD_SIZE: usize = 24;
/// Size of the `wasmtime_extern_t` union: the largest member is `wasmtime_global_t`.
pub const EXTERN_PAYLOAD_SIZE: usize = 24;

/// `wasmtime_val_t`: one WebAssembly value tagged with its kind.
///
/// The payload is 8-byte aligned, so seven bytes of padding follow the kind.
/// Only the payload bytes selected by `kind` are meaningful.
#[repr(C, align(8))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaggedValue {
    pub(crate) kind: wasmtime_valkind_t,
    pub(crate) _padding: [u8; 7],
    pub(crate) of: [u8; VAL_PAYLOAD_SIZE],
}

pub(crate) type wasmtime_val_t = TaggedValue;

/// `wasmtime_extern_t`: a handle to a function, global, table or memory.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
pub struct ExternItem {
    pub(crate) kind: wasmtime_extern_kind_t,
    pub(crate) _padding: [u8; 7],
    pub(crate) of: [u8; EXTERN_PAYLOAD_SIZE],
}

pub(crate) type wasmtime_extern_t = ExternItem;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_func_t {
    pub(crate) store_id: u64,
    pub(crate) private: *mut c_void,
}

/// The anonymous `{ store_id, __private1 }` struct that leads table and memory
/// records in `extern.h`. Its tail padding places `__private2` at offset 16.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_store_slot_t {
    pub(crate) store_id: u64,
    pub(crate) private1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_table_t {
    pub(crate) slot: wasmtime_store_slot_t,
    pub(crate) private2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_memory_t {
    pub(crate) slot: wasmtime_store_slot_t,
    pub(crate) private2: u32,
}

#[cfg(test)]
impl wasmtime_table_t {
    pub(crate) const fn new(store_id: u64, private1: u32, private2: u32) -> Self {
        Self {
            slot: wasmtime_store_slot_t { store_id, private1 },
            private2,
        }
    }
}

#[cfg(test)]
impl wasmtime_memory_t {
    pub(crate) const fn new(store_id: u64, private1: u32, private2: u32) -> Self {
        Self {
            slot: wasmtime_store_slot_t { store_id, private1 },
            private2,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_global_t {
    pub(crate) store_id: u64,
    pub(crate) private1: u32,
    pub(crate) private2: u32,
    pub(crate) private3: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct wasmtime_instance_t {
    pub(crate) store_id: u64,
    pub(crate) private: usize,
}

/// `wasm_byte_vec_t` (also used as `wasm_message_t`).
#[repr(C)]
pub(crate) struct wasm_byte_vec_t {
    pub(crate) size: usize,
    pub(crate) data: *mut u8,
}

impl wasm_byte_vec_t {
    pub(crate) const fn empty() -> Self {
        Self {
            size: 0,
            data: std::ptr::null_mut(),
        }
    }

    /// Borrows the contents. An empty or null vector yields an empty slice.
    ///
    /// # Safety
    /// `data` must point to `size` initialized bytes owned by the vector.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        if self.size == 0 || self.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.size) }
    }
}

#[repr(C)]
pub(crate) struct wasm_valtype_vec_t {
    pub(crate) size: usize,
    pub(crate) data: *mut *mut wasm_valtype_t,
}

impl wasm_valtype_vec_t {
    pub(crate) const fn empty() -> Self {
        Self {
            size: 0,
            data: std::ptr::null_mut(),
        }
    }
}

pub(crate) type wasmtime_func_callback_t = unsafe extern "C" fn(
    env: *mut c_void,
    caller: *mut wasmtime_caller_t,
    args: *const wasmtime_val_t,
    nargs: usize,
    results: *mut wasmtime_val_t,
    nresults: usize,
) -> *mut wasm_trap_t;

pub(crate) type wasmtime_finalizer_t = Option<unsafe extern "C" fn(*mut c_void)>;

const _: () = assert!(size_of::<TaggedValue>() == 32 && align_of::<TaggedValue>() == 8);
const _: () = assert!(size_of::<ExternItem>() == 32 && align_of::<ExternItem>() == 8);
const _: () = assert!(size_of::<wasmtime_func_t>() <= EXTERN_PAYLOAD_SIZE);
const _: () = assert!(size_of::<wasmtime_table_t>() == 24 && offset_of!(wasmtime_table_t, private2) == 16);
const _: () = assert!(size_of::<wasmtime_memory_t>() == 24 && offset_of!(wasmtime_memory_t, private2) == 16);
const _: () = assert!(size_of::<wasmtime_global_t>() == EXTERN_PAYLOAD_SIZE);
const _: () = assert!(size_of::<wasmtime_func_t>() <= VAL_PAYLOAD_SIZE);

impl ExternItem {
    pub(crate) const fn zeroed() -> Self {
        Self {
            kind: 0,
            _padding: [0; 7],
            of: [0; EXTERN_PAYLOAD_SIZE],
        }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> wasmtime_extern_kind_t {
        self.kind
    }

    fn read<T: Copy>(&self) -> T {
        debug_assert!(size_of::<T>() <= EXTERN_PAYLOAD_SIZE);
        // The payload is 8-byte aligned and at least as large as every variant record.
        unsafe { std::ptr::read(self.of.as_ptr().cast::<T>()) }
    }

    fn write<T: Copy>(kind: wasmtime_extern_kind_t, record: T) -> Self {
        let mut item = Self::zeroed();
        item.kind = kind;
        unsafe { std::ptr::write(item.of.as_mut_ptr().cast::<T>(), record) };
        item
    }

    pub(crate) fn as_func(&self) -> Option<wasmtime_func_t> {
        (self.kind == WASMTIME_EXTERN_FUNC).then(|| self.read())
    }

    pub(crate) fn as_global(&self) -> Option<wasmtime_global_t> {
        (self.kind == WASMTIME_EXTERN_GLOBAL).then(|| self.read())
    }

    pub(crate) fn as_table(&self) -> Option<wasmtime_table_t> {
        (self.kind == WASMTIME_EXTERN_TABLE).then(|| self.read())
    }

    pub(crate) fn as_memory(&self) -> Option<wasmtime_memory_t> {
        (self.kind == WASMTIME_EXTERN_MEMORY).then(|| self.read())
    }

    pub(crate) fn from_func(func: wasmtime_func_t) -> Self {
        Self::write(WASMTIME_EXTERN_FUNC, func)
    }

    #[cfg(test)]
    pub(crate) fn from_global(global: wasmtime_global_t) -> Self {
        Self::write(WASMTIME_EXTERN_GLOBAL, global)
    }

    #[cfg(test)]
    pub(crate) fn from_table(table: wasmtime_table_t) -> Self {
        Self::write(WASMTIME_EXTERN_TABLE, table)
    }

    #[cfg(test)]
    pub(crate) fn from_memory(memory: wasmtime_memory_t) -> Self {
        Self::write(WASMTIME_EXTERN_MEMORY, memory)
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self.kind {
            WASMTIME_EXTERN_FUNC => "function",
            WASMTIME_EXTERN_GLOBAL => "global",
            WASMTIME_EXTERN_TABLE => "table",
            WASMTIME_EXTERN_MEMORY => "memory",
            _ => "unknown extern",
        }
    }
}

impl std::fmt::Debug for ExternItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternItem")
            .field("kind", &self.kind_name())
            .finish_non_exhaustive()
    }
}
