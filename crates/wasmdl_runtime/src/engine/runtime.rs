use std::cell::Cell;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};

use super::cache::CompilationCache;
use super::config::RuntimeConfig;
use super::instance::Instance;
use super::linker::{HostModuleBuilder, Linker};
use super::module::Module;
use super::store::{Engine, Store};

/// One engine, one store and one linker, wired up from a [`RuntimeConfig`].
pub struct Runtime {
    config: RuntimeConfig,
    cache: Option<CompilationCache>,
    linker: Linker,
    store: Arc<Store>,
    engine: Arc<Engine>,
    wasi_defined: Cell<bool>,
}

impl Runtime {
    /// Resolves and loads the native library, then creates the engine, store and linker.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let path = config.library.resolve().map_err(RuntimeError::Config)?;
        tracing::debug!("using wasmtime library {}", path.display());
        let engine = Engine::load(&path)?;
        Self::with_engine(engine, config)
    }

    pub fn with_engine(engine: Arc<Engine>, config: RuntimeConfig) -> RuntimeResult<Self> {
        let store = Arc::new(Store::new(&engine)?);
        let linker = Linker::new(&engine)?;
        let cache = config.compilation_cache.then(CompilationCache::new);
        Ok(Self {
            config,
            cache,
            linker,
            store,
            engine,
            wasi_defined: Cell::new(false),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn cache(&self) -> Option<&CompilationCache> {
        self.cache.as_ref()
    }

    /// Compiles binary or text `bytes`, reusing an earlier compilation when the cache is on.
    pub fn compile(&self, bytes: &[u8]) -> RuntimeResult<Arc<Module>> {
        match &self.cache {
            Some(cache) => cache.get_or_compile(&self.engine, bytes),
            None => Ok(Arc::new(Module::new(&self.engine, bytes)?)),
        }
    }

    /// Instantiates with whatever the linker has defined so far.
    pub fn instantiate(&self, module: &Arc<Module>) -> RuntimeResult<Instance> {
        self.linker.instantiate(&self.store, module)
    }

    /// Configures WASI on the store, defines the WASI imports once, then instantiates.
    pub fn instantiate_with_wasi(&self, module: &Arc<Module>) -> RuntimeResult<Instance> {
        let wasi = self.config.wasi_config.clone().unwrap_or_default();
        wasi.apply(&self.store)?;
        if !self.wasi_defined.get() {
            self.linker.define_wasi()?;
            self.wasi_defined.set(true);
        }
        self.instantiate(module)
    }

    /// Starts a group of host functions importable as `name`.
    pub fn host_module(&self, name: impl Into<String>) -> HostModuleBuilder<'_> {
        HostModuleBuilder::new(&self.linker, &self.store, name)
    }

    /// Fails with [`RuntimeError::StillReferenced`] while instances or modules
    /// outside this runtime hold the store or engine.
    pub fn check_closable(&self) -> RuntimeResult<()> {
        if Arc::strong_count(&self.store) > 1 {
            return Err(RuntimeError::StillReferenced("store"));
        }
        let cached = match &self.cache {
            Some(cache) if cache.shared() > 0 => return Err(RuntimeError::StillReferenced("engine")),
            Some(cache) => cache.len(),
            None => 0,
        };
        // The runtime, its store and its linker each hold one reference.
        if Arc::strong_count(&self.engine) > 3 + cached {
            return Err(RuntimeError::StillReferenced("engine"));
        }
        Ok(())
    }

    /// Releases the linker, store and engine in order.
    ///
    /// Nothing is released unless [`Runtime::check_closable`] passes; on failure the
    /// handles are released when the last holder drops them.
    pub fn close(self) -> RuntimeResult<()> {
        self.check_closable()?;
        let Runtime {
            cache,
            mut linker,
            store,
            mut engine,
            ..
        } = self;
        drop(cache);
        linker.release();
        drop(linker);

        let mut store = Arc::try_unwrap(store).map_err(|_| RuntimeError::StillReferenced("store"))?;
        store.release();
        drop(store);

        Arc::get_mut(&mut engine)
            .ok_or(RuntimeError::StillReferenced("engine"))?
            .release();
        tracing::debug!("runtime closed");
        Ok(())
    }
}
