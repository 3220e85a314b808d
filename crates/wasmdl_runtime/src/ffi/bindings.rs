//! Function pointers into the wasmtime C API, resolved once per loaded library.

use std::ffi::{c_char, c_int, c_void};

use libloading::Library;

use super::types::*;
use crate::error::{RuntimeError, RuntimeResult};

macro_rules! native_bindings {
    ($( fn $name:ident( $($arg:ident: $ty:ty),* $(,)? ) -> $ret:ty; )*) => {
        /// Every entry point the runtime calls. Immutable once resolved.
        pub(crate) struct Bindings {
            $( pub(crate) $name: unsafe extern "C" fn($($arg: $ty),*) -> $ret, )*
        }

        impl Bindings {
            pub(crate) const SYMBOLS: &'static [&'static str] = &[$( stringify!($name), )*];

            /// Resolves every symbol. Fails on the first one the library does not export.
            ///
            /// # Safety
            /// `library` must be a wasmtime C API build whose signatures match the declarations.
            /// The returned pointers are valid only while `library` stays loaded.
            pub(crate) unsafe fn resolve(library: &Library) -> RuntimeResult<Self> {
                Ok(Self {
                    $(
                        $name: {
                            let symbol = unsafe {
                                library.get::<unsafe extern "C" fn($($ty),*) -> $ret>(
                                    concat!(stringify!($name), "\0").as_bytes(),
                                )
                            }
                            .map_err(|_| RuntimeError::MissingSymbol(stringify!($name)))?;
                            *symbol
                        },
                    )*
                })
            }

            /// Bindings whose every entry point returns a zeroed value. Tests override
            /// the entries they exercise.
            #[cfg(test)]
            pub(crate) fn inert() -> Self {
                Self {
                    $(
                        $name: {
                            #[allow(unused_variables)]
                            unsafe extern "C" fn $name($($arg: $ty),*) -> $ret {
                                unsafe { std::mem::zeroed() }
                            }
                            $name
                        },
                    )*
                }
            }
        }
    };
}

native_bindings! {
    // engine
    fn wasm_engine_new() -> *mut wasm_engine_t;
    fn wasm_engine_delete(engine: *mut wasm_engine_t) -> ();

    // store
    fn wasmtime_store_new(
        engine: *mut wasm_engine_t,
        data: *mut c_void,
        finalizer: wasmtime_finalizer_t,
    ) -> *mut wasmtime_store_t;
    fn wasmtime_store_context(store: *mut wasmtime_store_t) -> *mut wasmtime_context_t;
    fn wasmtime_store_delete(store: *mut wasmtime_store_t) -> ();

    // wat
    fn wasmtime_wat2wasm(
        wat: *const c_char,
        wat_len: usize,
        ret: *mut wasm_byte_vec_t,
    ) -> *mut wasmtime_error_t;

    // module
    fn wasmtime_module_new(
        engine: *mut wasm_engine_t,
        wasm: *const u8,
        wasm_len: usize,
        ret: *mut *mut wasmtime_module_t,
    ) -> *mut wasmtime_error_t;
    fn wasmtime_module_delete(module: *mut wasmtime_module_t) -> ();

    // instance
    fn wasmtime_instance_new(
        context: *mut wasmtime_context_t,
        module: *const wasmtime_module_t,
        imports: *const wasmtime_extern_t,
        nimports: usize,
        instance: *mut wasmtime_instance_t,
        trap: *mut *mut wasm_trap_t,
    ) -> *mut wasmtime_error_t;
    fn wasmtime_instance_export_get(
        context: *mut wasmtime_context_t,
        instance: *const wasmtime_instance_t,
        name: *const c_char,
        name_len: usize,
        item: *mut wasmtime_extern_t,
    ) -> bool;

    // function call and type
    fn wasmtime_func_call(
        context: *mut wasmtime_context_t,
        func: *const wasmtime_func_t,
        args: *const wasmtime_val_t,
        nargs: usize,
        results: *mut wasmtime_val_t,
        nresults: usize,
        trap: *mut *mut wasm_trap_t,
    ) -> *mut wasmtime_error_t;
    fn wasmtime_func_type(
        context: *const wasmtime_context_t,
        func: *const wasmtime_func_t,
    ) -> *mut wasm_functype_t;

    // error and trap
    fn wasmtime_error_message(error: *const wasmtime_error_t, message: *mut wasm_byte_vec_t) -> ();
    fn wasmtime_error_exit_status(error: *const wasmtime_error_t, status: *mut c_int) -> bool;
    fn wasmtime_error_delete(error: *mut wasmtime_error_t) -> ();
    fn wasmtime_trap_new(message: *const c_char, len: usize) -> *mut wasm_trap_t;
    fn wasm_trap_message(trap: *const wasm_trap_t, message: *mut wasm_byte_vec_t) -> ();
    fn wasm_trap_delete(trap: *mut wasm_trap_t) -> ();

    // byte vector
    fn wasm_byte_vec_delete(vec: *mut wasm_byte_vec_t) -> ();

    // function type introspection
    fn wasm_functype_params(ty: *const wasm_functype_t) -> *const wasm_valtype_vec_t;
    fn wasm_functype_results(ty: *const wasm_functype_t) -> *const wasm_valtype_vec_t;
    fn wasm_functype_delete(ty: *mut wasm_functype_t) -> ();
    fn wasm_valtype_kind(ty: *const wasm_valtype_t) -> wasm_valkind_t;

    // linker
    fn wasmtime_linker_new(engine: *mut wasm_engine_t) -> *mut wasmtime_linker_t;
    fn wasmtime_linker_delete(linker: *mut wasmtime_linker_t) -> ();
    fn wasmtime_linker_define_wasi(linker: *mut wasmtime_linker_t) -> *mut wasmtime_error_t;
    fn wasmtime_linker_define(
        linker: *mut wasmtime_linker_t,
        context: *mut wasmtime_context_t,
        module: *const c_char,
        module_len: usize,
        name: *const c_char,
        name_len: usize,
        item: *const wasmtime_extern_t,
    ) -> *mut wasmtime_error_t;
    fn wasmtime_linker_instantiate(
        linker: *const wasmtime_linker_t,
        context: *mut wasmtime_context_t,
        module: *const wasmtime_module_t,
        instance: *mut wasmtime_instance_t,
        trap: *mut *mut wasm_trap_t,
    ) -> *mut wasmtime_error_t;

    // caller
    fn wasmtime_caller_export_get(
        caller: *mut wasmtime_caller_t,
        name: *const c_char,
        name_len: usize,
        item: *mut wasmtime_extern_t,
    ) -> bool;
    fn wasmtime_caller_context(caller: *mut wasmtime_caller_t) -> *mut wasmtime_context_t;

    // memory
    fn wasmtime_memory_data(
        context: *const wasmtime_context_t,
        memory: *const wasmtime_memory_t,
    ) -> *mut u8;
    fn wasmtime_memory_data_size(
        context: *const wasmtime_context_t,
        memory: *const wasmtime_memory_t,
    ) -> usize;
    fn wasmtime_memory_size(
        context: *const wasmtime_context_t,
        memory: *const wasmtime_memory_t,
    ) -> u64;
    fn wasmtime_memory_grow(
        context: *mut wasmtime_context_t,
        memory: *const wasmtime_memory_t,
        delta: u64,
        prev_size: *mut u64,
    ) -> *mut wasmtime_error_t;

    // global
    fn wasmtime_global_get(
        context: *mut wasmtime_context_t,
        global: *const wasmtime_global_t,
        out: *mut wasmtime_val_t,
    ) -> ();
    fn wasmtime_global_set(
        context: *mut wasmtime_context_t,
        global: *const wasmtime_global_t,
        value: *const wasmtime_val_t,
    ) -> *mut wasmtime_error_t;

    // table
    fn wasmtime_table_size(
        context: *const wasmtime_context_t,
        table: *const wasmtime_table_t,
    ) -> u64;
    fn wasmtime_table_get(
        context: *mut wasmtime_context_t,
        table: *const wasmtime_table_t,
        index: u64,
        out: *mut wasmtime_val_t,
    ) -> bool;
    fn wasmtime_table_set(
        context: *mut wasmtime_context_t,
        table: *const wasmtime_table_t,
        index: u64,
        value: *const wasmtime_val_t,
    ) -> *mut wasmtime_error_t;
    fn wasmtime_table_grow(
        context: *mut wasmtime_context_t,
        table: *const wasmtime_table_t,
        delta: u64,
        init: *const wasmtime_val_t,
        prev_size: *mut u64,
    ) -> *mut wasmtime_error_t;

    // host function support
    fn wasmtime_func_new(
        context: *mut wasmtime_context_t,
        ty: *const wasm_functype_t,
        callback: wasmtime_func_callback_t,
        env: *mut c_void,
        finalizer: wasmtime_finalizer_t,
        ret: *mut wasmtime_func_t,
    ) -> ();
    fn wasm_functype_new(
        params: *mut wasm_valtype_vec_t,
        results: *mut wasm_valtype_vec_t,
    ) -> *mut wasm_functype_t;
    fn wasm_valtype_new(kind: wasm_valkind_t) -> *mut wasm_valtype_t;
    fn wasm_valtype_vec_new(
        out: *mut wasm_valtype_vec_t,
        size: usize,
        data: *const *mut wasm_valtype_t,
    ) -> ();
    fn wasm_valtype_vec_new_empty(out: *mut wasm_valtype_vec_t) -> ();

    // wasi
    fn wasi_config_new() -> *mut wasi_config_t;
    fn wasi_config_delete(config: *mut wasi_config_t) -> ();
    fn wasi_config_set_argv(
        config: *mut wasi_config_t,
        argc: usize,
        argv: *const *const c_char,
    ) -> bool;
    fn wasi_config_inherit_argv(config: *mut wasi_config_t) -> ();
    fn wasi_config_set_env(
        config: *mut wasi_config_t,
        envc: usize,
        names: *const *const c_char,
        values: *const *const c_char,
    ) -> bool;
    fn wasi_config_inherit_env(config: *mut wasi_config_t) -> ();
    fn wasi_config_inherit_stdin(config: *mut wasi_config_t) -> ();
    fn wasi_config_inherit_stdout(config: *mut wasi_config_t) -> ();
    fn wasi_config_inherit_stderr(config: *mut wasi_config_t) -> ();
    fn wasi_config_preopen_dir(
        config: *mut wasi_config_t,
        host_path: *const c_char,
        guest_path: *const c_char,
        dir_perms: usize,
        file_perms: usize,
    ) -> bool;
    fn wasmtime_context_set_wasi(
        context: *mut wasmtime_context_t,
        wasi: *mut wasi_config_t,
    ) -> *mut wasmtime_error_t;
}
