//! Safe wrappers over the native engine, plus the `Runtime` façade.
//!
//! Lifetimes follow ownership: stores, modules and linkers hold their engine,
//! instances and exported functions hold their store.

mod cache;
pub(crate) mod call;
pub(crate) mod callback;
mod config;
mod externals;
mod instance;
mod linker;
mod module;
mod runtime;
mod store;
mod wasi;

pub use cache::CompilationCache;
pub use call::{FuncType, Function};
pub use callback::{CallbackRegistry, CallerModule, HostFunc};
pub use config::RuntimeConfig;
pub use externals::{Global, Memory, Table, WASM_PAGE_SIZE};
pub use instance::Instance;
pub use linker::{HostModule, HostModuleBuilder, Linker};
pub use module::Module;
pub use runtime::Runtime;
pub use store::{Engine, Store};
pub use wasi::{PreopenDir, WasiConfig};
