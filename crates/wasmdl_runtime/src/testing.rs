//! An in-process stand-in for the native library.
//!
//! Every entry point the unit tests exercise is replaced by a Rust function that
//! keeps its bookkeeping in thread-local state, so each test thread sees only
//! its own handles and counters. Counters reset whenever [`native`] builds a
//! fresh set of bindings.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use crate::engine::{Engine, Store};
use crate::ffi::bindings::Bindings;
use crate::ffi::types::*;
use crate::ffi::Native;
use crate::value::{decode_i32, encode_i32, ValType};

pub(crate) const FAKE_MEMORY_SIZE: usize = 65536;
pub(crate) const FAKE_TABLE_SIZE: u64 = 4;
/// Text the fake `wat2wasm` rejects.
pub(crate) const INVALID_WAT: &str = "(module";
/// Host directory the fake WASI configuration refuses to preopen.
pub(crate) const MISSING_DIR: &str = "/nonexistent-preopen";

/// Index the fake engine stamps into table and memory records and expects back.
pub(crate) const FAKE_EXTERN_INDEX: u32 = 0x5EED;
/// Store ids at or above this value name host functions created through `wasmtime_func_new`.
const HOST_FUNC_BASE: u64 = 1 << 32;
const WASM_HEADER: &[u8] = b"\0asm\x01\0\0\0";

/// Functions the fake engine knows how to call, keyed by their record's store id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeFunc {
    /// `(i32, i32) -> i32`, wrapping add.
    Add = 1,
    /// `() -> (i32, i32)`, returns `(7, 12)`.
    Pair,
    Trap,
    Error,
    ExitZero,
    ExitThree,
}

impl FakeFunc {
    const ALL: [FakeFunc; 6] = [
        FakeFunc::Add,
        FakeFunc::Pair,
        FakeFunc::Trap,
        FakeFunc::Error,
        FakeFunc::ExitZero,
        FakeFunc::ExitThree,
    ];

    pub(crate) fn raw(self) -> wasmtime_func_t {
        wasmtime_func_t {
            store_id: self as u64,
            private: ptr::null_mut(),
        }
    }

    fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|f| *f as u64 == id)
    }

    fn signature(self) -> (Vec<ValType>, Vec<ValType>) {
        match self {
            FakeFunc::Add => (vec![ValType::I32, ValType::I32], vec![ValType::I32]),
            FakeFunc::Pair => (vec![], vec![ValType::I32, ValType::I32]),
            _ => (vec![], vec![]),
        }
    }
}

/// What the store received from `wasmtime_context_set_wasi`.
#[derive(Debug, Default)]
pub(crate) struct AppliedWasi {
    pub(crate) argv: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) preopens: Vec<(String, String, usize, usize)>,
    pub(crate) inherit_argv: bool,
    pub(crate) inherit_env: bool,
    pub(crate) stdin: bool,
    pub(crate) stdout: bool,
    pub(crate) stderr: bool,
}

struct HostFuncRecord {
    context: *mut wasmtime_context_t,
    callback: wasmtime_func_callback_t,
    env: *mut c_void,
    finalizer: wasmtime_finalizer_t,
    params: Vec<ValType>,
    results: Vec<ValType>,
}

struct FakeError {
    exit: Option<c_int>,
    message: String,
}

struct FakeTrap {
    message: String,
}

struct FakeFuncType {
    params: wasm_valtype_vec_t,
    results: wasm_valtype_vec_t,
}

/// Backing allocation for a fake store. Its address doubles as the store context.
struct FakeStore {
    _id: u8,
}

#[derive(Default)]
struct FakeState {
    deleted: HashMap<&'static str, usize>,
    deleted_errors: usize,
    deleted_traps: usize,
    func_calls: usize,
    wat_conversions: usize,
    caller_lookups: usize,
    finalized_envs: usize,
    last_import_count: usize,
    wasi_definitions: usize,
    linker_definitions: Vec<(String, ExternItem)>,
    applied_wasi: Option<AppliedWasi>,
    host_funcs: Vec<HostFuncRecord>,
    memory: Vec<u8>,
}

impl FakeState {
    fn reset_counters(&mut self) {
        let host_funcs = std::mem::take(&mut self.host_funcs);
        *self = FakeState {
            host_funcs,
            ..FakeState::default()
        };
    }
}

thread_local! {
    static STATE: RefCell<FakeState> = RefCell::new(FakeState::default());
}

fn with<R>(f: impl FnOnce(&mut FakeState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

fn dangling<T>() -> *mut T {
    NonNull::<T>::dangling().as_ptr()
}

unsafe fn text<'a>(data: *const c_char, len: usize) -> &'a str {
    if len == 0 {
        return "";
    }
    let bytes = unsafe { slice::from_raw_parts(data.cast::<u8>(), len) };
    std::str::from_utf8(bytes).unwrap_or("<invalid utf-8>")
}

unsafe fn c_str(data: *const c_char) -> String {
    unsafe { CStr::from_ptr(data) }.to_string_lossy().into_owned()
}

unsafe fn write_bytes(out: *mut wasm_byte_vec_t, bytes: &[u8]) {
    let boxed: Box<[u8]> = bytes.into();
    let size = boxed.len();
    unsafe {
        (*out).size = size;
        (*out).data = Box::into_raw(boxed).cast::<u8>();
    }
}

// bindings

/// Bindings backed by the fake engine. Counters are reset.
pub(crate) fn native() -> Arc<Native> {
    with(FakeState::reset_counters);
    Native::with_bindings(bindings())
}

pub(crate) fn engine() -> anyhow::Result<Arc<Engine>> {
    Ok(Arc::new(Engine::with_native(native())?))
}

pub(crate) fn store() -> anyhow::Result<Arc<Store>> {
    Ok(Arc::new(Store::new(&engine()?)?))
}

/// A non-null context for calls that never leave the fake engine.
pub(crate) fn context() -> *mut wasmtime_context_t {
    dangling()
}

/// A non-null caller whose exports resolve to the fake memory.
pub(crate) fn caller() -> *mut wasmtime_caller_t {
    dangling()
}

pub(crate) fn null_instance() -> wasmtime_instance_t {
    wasmtime_instance_t {
        store_id: 0,
        private: 0,
    }
}

pub(crate) fn fake_memory() -> wasmtime_memory_t {
    wasmtime_memory_t::new(1, 0, FAKE_EXTERN_INDEX)
}

/// A global whose record carries its own value, type and mutability.
pub(crate) fn fake_global(ty: ValType, value: u64, mutable: bool) -> wasmtime_global_t {
    wasmtime_global_t {
        store_id: value,
        private1: ty.wasmtime_kind() as u32,
        private2: mutable as u32,
        private3: 0,
    }
}

pub(crate) fn fake_table() -> wasmtime_table_t {
    wasmtime_table_t::new(1, 0, FAKE_EXTERN_INDEX)
}

/// Reads `__private2` of a table or memory record at its `extern.h` offset, the
/// way the engine does, without going through the Rust declaration.
unsafe fn header_index<T>(record: *const T) -> u32 {
    unsafe { ptr::read_unaligned(record.cast::<u8>().add(16).cast::<u32>()) }
}

fn known_extern<T>(record: *const T) -> bool {
    !record.is_null() && unsafe { header_index(record) } == FAKE_EXTERN_INDEX
}

pub(crate) fn exit_error(code: c_int) -> *mut wasmtime_error_t {
    Box::into_raw(Box::new(FakeError {
        exit: Some(code),
        message: format!("exit with invalid exit status {code}"),
    }))
    .cast()
}

pub(crate) fn message_error(message: impl Into<String>) -> *mut wasmtime_error_t {
    Box::into_raw(Box::new(FakeError {
        exit: None,
        message: message.into(),
    }))
    .cast()
}

fn new_fake_trap(message: impl Into<String>) -> *mut wasm_trap_t {
    Box::into_raw(Box::new(FakeTrap {
        message: message.into(),
    }))
    .cast()
}

// observations

pub(crate) fn deleted_errors() -> usize {
    with(|s| s.deleted_errors)
}

pub(crate) fn deleted_traps() -> usize {
    with(|s| s.deleted_traps)
}

pub(crate) fn func_calls() -> usize {
    with(|s| s.func_calls)
}

/// Deletions of `kind`: `engine`, `store`, `module`, `linker` or `wasi_config`.
pub(crate) fn deleted_handles(kind: &str) -> usize {
    with(|s| s.deleted.get(kind).copied().unwrap_or(0))
}

pub(crate) fn finalized_envs() -> usize {
    with(|s| s.finalized_envs)
}

pub(crate) fn wat_conversions() -> usize {
    with(|s| s.wat_conversions)
}

pub(crate) fn caller_lookups() -> usize {
    with(|s| s.caller_lookups)
}

pub(crate) fn reset_caller_lookups() {
    with(|s| s.caller_lookups = 0);
}

pub(crate) fn last_import_count() -> usize {
    with(|s| s.last_import_count)
}

pub(crate) fn wasi_definitions() -> usize {
    with(|s| s.wasi_definitions)
}

/// Linker definitions as `module::name`, in definition order.
pub(crate) fn linker_definitions() -> Vec<String> {
    with(|s| s.linker_definitions.iter().map(|(key, _)| key.clone()).collect())
}

pub(crate) fn applied_wasi() -> Option<AppliedWasi> {
    with(|s| s.applied_wasi.take())
}

pub(crate) fn memory_snapshot() -> Vec<u8> {
    with(|s| memory_of(s).clone())
}

fn memory_of(state: &mut FakeState) -> &mut Vec<u8> {
    if state.memory.is_empty() {
        state.memory = vec![0; FAKE_MEMORY_SIZE];
    }
    &mut state.memory
}

fn count_deleted(kind: &'static str) {
    with(|s| *s.deleted.entry(kind).or_default() += 1);
}

fn bindings() -> Bindings {
    Bindings {
        wasm_engine_new: fake_engine_new,
        wasm_engine_delete: fake_engine_delete,
        wasmtime_store_new: fake_store_new,
        wasmtime_store_context: fake_store_context,
        wasmtime_store_delete: fake_store_delete,
        wasmtime_wat2wasm: fake_wat2wasm,
        wasmtime_module_new: fake_module_new,
        wasmtime_module_delete: fake_module_delete,
        wasmtime_instance_new: fake_instance_new,
        wasmtime_instance_export_get: fake_instance_export_get,
        wasmtime_func_call: fake_func_call,
        wasmtime_func_type: fake_func_type,
        wasmtime_error_message: fake_error_message,
        wasmtime_error_exit_status: fake_error_exit_status,
        wasmtime_error_delete: fake_error_delete,
        wasmtime_trap_new: fake_trap_new,
        wasm_trap_message: fake_trap_message,
        wasm_trap_delete: fake_trap_delete,
        wasm_byte_vec_delete: fake_byte_vec_delete,
        wasm_functype_params: fake_functype_params,
        wasm_functype_results: fake_functype_results,
        wasm_functype_delete: fake_functype_delete,
        wasm_valtype_kind: fake_valtype_kind,
        wasmtime_linker_new: fake_linker_new,
        wasmtime_linker_delete: fake_linker_delete,
        wasmtime_linker_define_wasi: fake_linker_define_wasi,
        wasmtime_linker_define: fake_linker_define,
        wasmtime_linker_instantiate: fake_linker_instantiate,
        wasmtime_caller_export_get: fake_caller_export_get,
        wasmtime_caller_context: fake_caller_context,
        wasmtime_memory_data: fake_memory_data,
        wasmtime_memory_data_size: fake_memory_data_size,
        wasmtime_memory_size: fake_memory_size,
        wasmtime_memory_grow: fake_memory_grow,
        wasmtime_global_get: fake_global_get,
        wasmtime_global_set: fake_global_set,
        wasmtime_table_size: fake_table_size,
        wasmtime_table_get: fake_table_get,
        wasmtime_table_set: fake_table_set,
        wasmtime_table_grow: fake_table_grow,
        wasmtime_func_new: fake_func_new,
        wasm_functype_new: fake_functype_new,
        wasm_valtype_new: fake_valtype_new,
        wasm_valtype_vec_new: fake_valtype_vec_new,
        wasm_valtype_vec_new_empty: fake_valtype_vec_new_empty,
        wasi_config_new: fake_wasi_config_new,
        wasi_config_delete: fake_wasi_config_delete,
        wasi_config_set_argv: fake_wasi_config_set_argv,
        wasi_config_inherit_argv: fake_wasi_config_inherit_argv,
        wasi_config_set_env: fake_wasi_config_set_env,
        wasi_config_inherit_env: fake_wasi_config_inherit_env,
        wasi_config_inherit_stdin: fake_wasi_config_inherit_stdin,
        wasi_config_inherit_stdout: fake_wasi_config_inherit_stdout,
        wasi_config_inherit_stderr: fake_wasi_config_inherit_stderr,
        wasi_config_preopen_dir: fake_wasi_config_preopen_dir,
        wasmtime_context_set_wasi: fake_context_set_wasi,
    }
}

// engine, store, module

unsafe extern "C" fn fake_engine_new() -> *mut wasm_engine_t {
    dangling()
}

unsafe extern "C" fn fake_engine_delete(_engine: *mut wasm_engine_t) {
    count_deleted("engine");
}

unsafe extern "C" fn fake_store_new(
    _engine: *mut wasm_engine_t,
    _data: *mut c_void,
    _finalizer: wasmtime_finalizer_t,
) -> *mut wasmtime_store_t {
    Box::into_raw(Box::new(FakeStore { _id: 0 })).cast()
}

unsafe extern "C" fn fake_store_context(store: *mut wasmtime_store_t) -> *mut wasmtime_context_t {
    store.cast()
}

/// Runs the finalizers of every host function created in this store, as the engine does.
unsafe extern "C" fn fake_store_delete(store: *mut wasmtime_store_t) {
    let context = store.cast::<wasmtime_context_t>();
    let pending: Vec<_> = with(|s| {
        s.host_funcs
            .iter_mut()
            .filter(|record| record.context == context)
            .filter_map(|record| {
                let finalizer = record.finalizer.take()?;
                Some((finalizer, std::mem::replace(&mut record.env, ptr::null_mut())))
            })
            .collect()
    });
    for (finalizer, env) in &pending {
        unsafe { finalizer(*env) };
    }
    with(|s| s.finalized_envs += pending.len());
    drop(unsafe { Box::from_raw(store.cast::<FakeStore>()) });
    count_deleted("store");
}

unsafe extern "C" fn fake_wat2wasm(
    wat: *const c_char,
    wat_len: usize,
    ret: *mut wasm_byte_vec_t,
) -> *mut wasmtime_error_t {
    if unsafe { text(wat, wat_len) } == INVALID_WAT {
        return message_error("expected `(`");
    }
    with(|s| s.wat_conversions += 1);
    unsafe { write_bytes(ret, WASM_HEADER) };
    ptr::null_mut()
}

unsafe extern "C" fn fake_module_new(
    _engine: *mut wasm_engine_t,
    _wasm: *const u8,
    _wasm_len: usize,
    ret: *mut *mut wasmtime_module_t,
) -> *mut wasmtime_error_t {
    unsafe { *ret = dangling() };
    ptr::null_mut()
}

unsafe extern "C" fn fake_module_delete(_module: *mut wasmtime_module_t) {
    count_deleted("module");
}

// instance

unsafe extern "C" fn fake_instance_new(
    _context: *mut wasmtime_context_t,
    _module: *const wasmtime_module_t,
    _imports: *const wasmtime_extern_t,
    nimports: usize,
    instance: *mut wasmtime_instance_t,
    _trap: *mut *mut wasm_trap_t,
) -> *mut wasmtime_error_t {
    with(|s| s.last_import_count = nimports);
    unsafe {
        *instance = wasmtime_instance_t {
            store_id: 1,
            private: 1,
        }
    };
    ptr::null_mut()
}

unsafe extern "C" fn fake_instance_export_get(
    _context: *mut wasmtime_context_t,
    _instance: *const wasmtime_instance_t,
    name: *const c_char,
    name_len: usize,
    item: *mut wasmtime_extern_t,
) -> bool {
    let name = unsafe { text(name, name_len) };
    let found = match name {
        "add" => Some(ExternItem::from_func(FakeFunc::Add.raw())),
        "memory" => Some(ExternItem::from_memory(fake_memory())),
        "counter" => Some(ExternItem::from_global(fake_global(ValType::I32, 5, true))),
        "table" => Some(ExternItem::from_table(fake_table())),
        other => with(|s| {
            s.linker_definitions
                .iter()
                .find(|(key, _)| key == other)
                .map(|(_, item)| *item)
        }),
    };
    match found {
        Some(found) => {
            unsafe { *item = found };
            true
        }
        None => false,
    }
}

// calls

unsafe extern "C" fn fake_func_call(
    _context: *mut wasmtime_context_t,
    func: *const wasmtime_func_t,
    args: *const wasmtime_val_t,
    nargs: usize,
    results: *mut wasmtime_val_t,
    nresults: usize,
    trap: *mut *mut wasm_trap_t,
) -> *mut wasmtime_error_t {
    with(|s| s.func_calls += 1);
    let id = unsafe { (*func).store_id };

    if id >= HOST_FUNC_BASE {
        let Some((callback, env)) = with(|s| {
            s.host_funcs
                .get((id - HOST_FUNC_BASE) as usize)
                .map(|record| (record.callback, record.env))
        }) else {
            return message_error("unknown host function");
        };
        // The callback may call back into the fake engine, so no state is borrowed here.
        let raised = unsafe { callback(env, caller(), args, nargs, results, nresults) };
        if raised.is_null() {
            return ptr::null_mut();
        }
        // A trap built by `wasmtime_trap_new` is a plain error inside the engine, so it
        // comes back through the error channel and the trap out-parameter stays null.
        let raised = unsafe { Box::from_raw(raised.cast::<FakeTrap>()) };
        return message_error(raised.message);
    }

    let args: &[TaggedValue] = if nargs == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(args, nargs) }
    };
    let results: &mut [TaggedValue] = if nresults == 0 {
        &mut []
    } else {
        unsafe { slice::from_raw_parts_mut(results, nresults) }
    };
    match FakeFunc::from_id(id) {
        Some(FakeFunc::Add) => {
            let sum = decode_i32(args[0].decode()).wrapping_add(decode_i32(args[1].decode()));
            results[0] = TaggedValue::encode(encode_i32(sum), ValType::I32);
        }
        Some(FakeFunc::Pair) => {
            results[0] = TaggedValue::encode(7, ValType::I32);
            results[1] = TaggedValue::encode(12, ValType::I32);
        }
        Some(FakeFunc::Trap) => unsafe { *trap = new_fake_trap("wasm trap: unreachable") },
        Some(FakeFunc::Error) => return message_error("call rejected"),
        Some(FakeFunc::ExitZero) => return exit_error(0),
        Some(FakeFunc::ExitThree) => return exit_error(3),
        None => return message_error("unknown function"),
    }
    ptr::null_mut()
}

unsafe extern "C" fn fake_func_type(
    _context: *const wasmtime_context_t,
    func: *const wasmtime_func_t,
) -> *mut wasm_functype_t {
    let id = unsafe { (*func).store_id };
    let signature = if id >= HOST_FUNC_BASE {
        with(|s| {
            s.host_funcs
                .get((id - HOST_FUNC_BASE) as usize)
                .map(|record| (record.params.clone(), record.results.clone()))
        })
    } else {
        FakeFunc::from_id(id).map(FakeFunc::signature)
    };
    match signature {
        Some((params, results)) => new_functype(&params, &results),
        None => ptr::null_mut(),
    }
}

// errors and traps

unsafe extern "C" fn fake_error_message(error: *const wasmtime_error_t, message: *mut wasm_byte_vec_t) {
    let error = unsafe { &*error.cast::<FakeError>() };
    unsafe { write_bytes(message, error.message.as_bytes()) };
}

unsafe extern "C" fn fake_error_exit_status(error: *const wasmtime_error_t, status: *mut c_int) -> bool {
    match unsafe { &*error.cast::<FakeError>() }.exit {
        Some(code) => {
            unsafe { *status = code };
            true
        }
        None => false,
    }
}

unsafe extern "C" fn fake_error_delete(error: *mut wasmtime_error_t) {
    drop(unsafe { Box::from_raw(error.cast::<FakeError>()) });
    with(|s| s.deleted_errors += 1);
}

unsafe extern "C" fn fake_trap_new(message: *const c_char, len: usize) -> *mut wasm_trap_t {
    new_fake_trap(unsafe { text(message, len) })
}

/// Trap messages come back NUL-terminated, like the real accessor.
unsafe extern "C" fn fake_trap_message(trap: *const wasm_trap_t, message: *mut wasm_byte_vec_t) {
    let trap = unsafe { &*trap.cast::<FakeTrap>() };
    let mut bytes = trap.message.as_bytes().to_vec();
    bytes.push(0);
    unsafe { write_bytes(message, &bytes) };
}

unsafe extern "C" fn fake_trap_delete(trap: *mut wasm_trap_t) {
    drop(unsafe { Box::from_raw(trap.cast::<FakeTrap>()) });
    with(|s| s.deleted_traps += 1);
}

unsafe extern "C" fn fake_byte_vec_delete(vec: *mut wasm_byte_vec_t) {
    let vec = unsafe { &mut *vec };
    if !vec.data.is_null() {
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(vec.data, vec.size)) });
    }
    *vec = wasm_byte_vec_t::empty();
}

// function types

fn new_valtype_vec(types: &[ValType]) -> wasm_valtype_vec_t {
    if types.is_empty() {
        return wasm_valtype_vec_t::empty();
    }
    let entries: Box<[*mut wasm_valtype_t]> = types
        .iter()
        .map(|ty| Box::into_raw(Box::new(ty.wasm_kind())).cast::<wasm_valtype_t>())
        .collect();
    let size = entries.len();
    wasm_valtype_vec_t {
        size,
        data: Box::into_raw(entries).cast::<*mut wasm_valtype_t>(),
    }
}

unsafe fn valtype_kinds(vec: &wasm_valtype_vec_t) -> Vec<ValType> {
    if vec.data.is_null() || vec.size == 0 {
        return vec![];
    }
    unsafe { slice::from_raw_parts(vec.data, vec.size) }
        .iter()
        .filter_map(|&entry| ValType::from_wasm_kind(unsafe { *entry.cast::<wasm_valkind_t>() }))
        .collect()
}

unsafe fn free_valtype_vec(vec: &mut wasm_valtype_vec_t) {
    if vec.data.is_null() {
        return;
    }
    let entries = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(vec.data, vec.size)) };
    for &entry in entries.iter() {
        drop(unsafe { Box::from_raw(entry.cast::<wasm_valkind_t>()) });
    }
    *vec = wasm_valtype_vec_t::empty();
}

fn new_functype(params: &[ValType], results: &[ValType]) -> *mut wasm_functype_t {
    Box::into_raw(Box::new(FakeFuncType {
        params: new_valtype_vec(params),
        results: new_valtype_vec(results),
    }))
    .cast()
}

unsafe extern "C" fn fake_functype_params(ty: *const wasm_functype_t) -> *const wasm_valtype_vec_t {
    unsafe { &(*ty.cast::<FakeFuncType>()).params }
}

unsafe extern "C" fn fake_functype_results(ty: *const wasm_functype_t) -> *const wasm_valtype_vec_t {
    unsafe { &(*ty.cast::<FakeFuncType>()).results }
}

unsafe extern "C" fn fake_functype_delete(ty: *mut wasm_functype_t) {
    let mut ty = unsafe { Box::from_raw(ty.cast::<FakeFuncType>()) };
    unsafe {
        free_valtype_vec(&mut ty.params);
        free_valtype_vec(&mut ty.results);
    }
}

unsafe extern "C" fn fake_valtype_kind(ty: *const wasm_valtype_t) -> wasm_valkind_t {
    unsafe { *ty.cast::<wasm_valkind_t>() }
}

unsafe extern "C" fn fake_valtype_new(kind: wasm_valkind_t) -> *mut wasm_valtype_t {
    Box::into_raw(Box::new(kind)).cast()
}

unsafe extern "C" fn fake_valtype_vec_new(
    out: *mut wasm_valtype_vec_t,
    size: usize,
    data: *const *mut wasm_valtype_t,
) {
    let entries: Box<[*mut wasm_valtype_t]> = unsafe { slice::from_raw_parts(data, size) }.into();
    unsafe {
        *out = wasm_valtype_vec_t {
            size,
            data: Box::into_raw(entries).cast::<*mut wasm_valtype_t>(),
        }
    };
}

unsafe extern "C" fn fake_valtype_vec_new_empty(out: *mut wasm_valtype_vec_t) {
    unsafe { *out = wasm_valtype_vec_t::empty() };
}

/// Takes ownership of both vectors, leaving them empty.
unsafe extern "C" fn fake_functype_new(
    params: *mut wasm_valtype_vec_t,
    results: *mut wasm_valtype_vec_t,
) -> *mut wasm_functype_t {
    let (params, results) = unsafe { (&mut *params, &mut *results) };
    let ty = Box::new(FakeFuncType {
        params: std::mem::replace(params, wasm_valtype_vec_t::empty()),
        results: std::mem::replace(results, wasm_valtype_vec_t::empty()),
    });
    Box::into_raw(ty).cast()
}

unsafe extern "C" fn fake_func_new(
    context: *mut wasmtime_context_t,
    ty: *const wasm_functype_t,
    callback: wasmtime_func_callback_t,
    env: *mut c_void,
    finalizer: wasmtime_finalizer_t,
    ret: *mut wasmtime_func_t,
) {
    let ty = unsafe { &*ty.cast::<FakeFuncType>() };
    let (params, results) = unsafe { (valtype_kinds(&ty.params), valtype_kinds(&ty.results)) };
    let index = with(|s| {
        s.host_funcs.push(HostFuncRecord {
            context,
            callback,
            env,
            finalizer,
            params,
            results,
        });
        s.host_funcs.len() - 1
    });
    unsafe {
        *ret = wasmtime_func_t {
            store_id: HOST_FUNC_BASE + index as u64,
            private: ptr::null_mut(),
        }
    };
}

// linker

unsafe extern "C" fn fake_linker_new(_engine: *mut wasm_engine_t) -> *mut wasmtime_linker_t {
    dangling()
}

unsafe extern "C" fn fake_linker_delete(_linker: *mut wasmtime_linker_t) {
    count_deleted("linker");
}

unsafe extern "C" fn fake_linker_define_wasi(_linker: *mut wasmtime_linker_t) -> *mut wasmtime_error_t {
    with(|s| s.wasi_definitions += 1);
    ptr::null_mut()
}

unsafe extern "C" fn fake_linker_define(
    _linker: *mut wasmtime_linker_t,
    _context: *mut wasmtime_context_t,
    module: *const c_char,
    module_len: usize,
    name: *const c_char,
    name_len: usize,
    item: *const wasmtime_extern_t,
) -> *mut wasmtime_error_t {
    let key = unsafe { format!("{}::{}", text(module, module_len), text(name, name_len)) };
    let item = unsafe { *item };
    let duplicate = with(|s| {
        if s.linker_definitions.iter().any(|(k, _)| *k == key) {
            return true;
        }
        s.linker_definitions.push((key.clone(), item));
        false
    });
    if duplicate {
        return message_error(format!("import of `{key}` defined twice"));
    }
    ptr::null_mut()
}

unsafe extern "C" fn fake_linker_instantiate(
    _linker: *const wasmtime_linker_t,
    _context: *mut wasmtime_context_t,
    _module: *const wasmtime_module_t,
    instance: *mut wasmtime_instance_t,
    _trap: *mut *mut wasm_trap_t,
) -> *mut wasmtime_error_t {
    unsafe {
        *instance = wasmtime_instance_t {
            store_id: 1,
            private: 2,
        }
    };
    ptr::null_mut()
}

// caller

unsafe extern "C" fn fake_caller_export_get(
    _caller: *mut wasmtime_caller_t,
    name: *const c_char,
    name_len: usize,
    item: *mut wasmtime_extern_t,
) -> bool {
    with(|s| s.caller_lookups += 1);
    if unsafe { text(name, name_len) } != "memory" {
        return false;
    }
    unsafe { *item = ExternItem::from_memory(fake_memory()) };
    true
}

/// Forces callers onto the context captured at registration.
unsafe extern "C" fn fake_caller_context(_caller: *mut wasmtime_caller_t) -> *mut wasmtime_context_t {
    ptr::null_mut()
}

// memory

unsafe extern "C" fn fake_memory_data(
    _context: *const wasmtime_context_t,
    memory: *const wasmtime_memory_t,
) -> *mut u8 {
    if !known_extern(memory) {
        return ptr::null_mut();
    }
    with(|s| memory_of(s).as_mut_ptr())
}

unsafe extern "C" fn fake_memory_data_size(
    _context: *const wasmtime_context_t,
    memory: *const wasmtime_memory_t,
) -> usize {
    if known_extern(memory) {
        FAKE_MEMORY_SIZE
    } else {
        0
    }
}

unsafe extern "C" fn fake_memory_size(_context: *const wasmtime_context_t, memory: *const wasmtime_memory_t) -> u64 {
    known_extern(memory) as u64
}

unsafe extern "C" fn fake_memory_grow(
    _context: *mut wasmtime_context_t,
    memory: *const wasmtime_memory_t,
    _delta: u64,
    prev_size: *mut u64,
) -> *mut wasmtime_error_t {
    if !known_extern(memory) {
        return message_error("unknown memory index");
    }
    unsafe { *prev_size = 1 };
    ptr::null_mut()
}

// global

unsafe extern "C" fn fake_global_get(
    _context: *mut wasmtime_context_t,
    global: *const wasmtime_global_t,
    out: *mut wasmtime_val_t,
) {
    let global = unsafe { &*global };
    let ty = ValType::from_wasmtime_kind(global.private1 as wasmtime_valkind_t).unwrap_or(ValType::I32);
    unsafe { *out = TaggedValue::encode(global.store_id, ty) };
}

unsafe extern "C" fn fake_global_set(
    _context: *mut wasmtime_context_t,
    global: *const wasmtime_global_t,
    _value: *const wasmtime_val_t,
) -> *mut wasmtime_error_t {
    if unsafe { (*global).private2 } == 0 {
        return message_error("immutable global cannot be set");
    }
    ptr::null_mut()
}

// table

unsafe extern "C" fn fake_table_size(_context: *const wasmtime_context_t, table: *const wasmtime_table_t) -> u64 {
    if known_extern(table) {
        FAKE_TABLE_SIZE
    } else {
        0
    }
}

unsafe extern "C" fn fake_table_get(
    _context: *mut wasmtime_context_t,
    table: *const wasmtime_table_t,
    index: u64,
    out: *mut wasmtime_val_t,
) -> bool {
    if !known_extern(table) || index >= FAKE_TABLE_SIZE {
        return false;
    }
    unsafe { *out = TaggedValue::encode(0, ValType::FuncRef) };
    true
}

unsafe extern "C" fn fake_table_set(
    _context: *mut wasmtime_context_t,
    table: *const wasmtime_table_t,
    index: u64,
    _value: *const wasmtime_val_t,
) -> *mut wasmtime_error_t {
    if !known_extern(table) {
        return message_error("unknown table index");
    }
    if index >= FAKE_TABLE_SIZE {
        return message_error("table element index out of bounds");
    }
    ptr::null_mut()
}

unsafe extern "C" fn fake_table_grow(
    _context: *mut wasmtime_context_t,
    table: *const wasmtime_table_t,
    _delta: u64,
    _init: *const wasmtime_val_t,
    prev_size: *mut u64,
) -> *mut wasmtime_error_t {
    if !known_extern(table) {
        return message_error("unknown table index");
    }
    unsafe { *prev_size = FAKE_TABLE_SIZE };
    ptr::null_mut()
}

// wasi

unsafe fn wasi<'a>(config: *mut wasi_config_t) -> &'a mut AppliedWasi {
    unsafe { &mut *config.cast::<AppliedWasi>() }
}

unsafe fn c_strings(data: *const *const c_char, len: usize) -> Vec<String> {
    if len == 0 {
        return vec![];
    }
    unsafe { slice::from_raw_parts(data, len) }
        .iter()
        .map(|&s| unsafe { c_str(s) })
        .collect()
}

unsafe extern "C" fn fake_wasi_config_new() -> *mut wasi_config_t {
    Box::into_raw(Box::<AppliedWasi>::default()).cast()
}

unsafe extern "C" fn fake_wasi_config_delete(config: *mut wasi_config_t) {
    drop(unsafe { Box::from_raw(config.cast::<AppliedWasi>()) });
    count_deleted("wasi_config");
}

unsafe extern "C" fn fake_wasi_config_set_argv(
    config: *mut wasi_config_t,
    argc: usize,
    argv: *const *const c_char,
) -> bool {
    unsafe { wasi(config).argv = c_strings(argv, argc) };
    true
}

unsafe extern "C" fn fake_wasi_config_inherit_argv(config: *mut wasi_config_t) {
    unsafe { wasi(config).inherit_argv = true };
}

unsafe extern "C" fn fake_wasi_config_set_env(
    config: *mut wasi_config_t,
    envc: usize,
    names: *const *const c_char,
    values: *const *const c_char,
) -> bool {
    let (names, values) = unsafe { (c_strings(names, envc), c_strings(values, envc)) };
    unsafe { wasi(config).env = names.into_iter().zip(values).collect() };
    true
}

unsafe extern "C" fn fake_wasi_config_inherit_env(config: *mut wasi_config_t) {
    unsafe { wasi(config).inherit_env = true };
}

unsafe extern "C" fn fake_wasi_config_inherit_stdin(config: *mut wasi_config_t) {
    unsafe { wasi(config).stdin = true };
}

unsafe extern "C" fn fake_wasi_config_inherit_stdout(config: *mut wasi_config_t) {
    unsafe { wasi(config).stdout = true };
}

unsafe extern "C" fn fake_wasi_config_inherit_stderr(config: *mut wasi_config_t) {
    unsafe { wasi(config).stderr = true };
}

unsafe extern "C" fn fake_wasi_config_preopen_dir(
    config: *mut wasi_config_t,
    host_path: *const c_char,
    guest_path: *const c_char,
    dir_perms: usize,
    file_perms: usize,
) -> bool {
    let (host, guest) = unsafe { (c_str(host_path), c_str(guest_path)) };
    if host == MISSING_DIR {
        return false;
    }
    unsafe { wasi(config).preopens.push((host, guest, dir_perms, file_perms)) };
    true
}

unsafe extern "C" fn fake_context_set_wasi(
    _context: *mut wasmtime_context_t,
    config: *mut wasi_config_t,
) -> *mut wasmtime_error_t {
    let applied = unsafe { Box::from_raw(config.cast::<AppliedWasi>()) };
    with(|s| s.applied_wasi = Some(*applied));
    ptr::null_mut()
}
