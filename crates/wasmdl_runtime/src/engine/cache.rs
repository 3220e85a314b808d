use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::error::RuntimeResult;

use super::module::Module;
use super::store::Engine;

/// Compiled modules keyed by the SHA-256 of their source bytes.
#[derive(Default)]
pub struct CompilationCache {
    modules: Mutex<HashMap<[u8; 32], Arc<Module>>>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(bytes: &[u8]) -> [u8; 32] {
        Sha256::digest(bytes).into()
    }

    pub fn get_or_compile(&self, engine: &Arc<Engine>, bytes: &[u8]) -> RuntimeResult<Arc<Module>> {
        let key = Self::key(bytes);
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = modules.get(&key) {
            tracing::debug!("compilation cache hit");
            return Ok(module.clone());
        }
        let module = Arc::new(Module::new(engine, bytes)?);
        modules.insert(key, module.clone());
        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached modules that are also held outside the cache.
    pub fn shared(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|module| Arc::strong_count(module) > 1)
            .count()
    }

    pub fn clear(&self) {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
