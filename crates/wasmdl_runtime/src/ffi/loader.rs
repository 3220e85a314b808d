use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use libloading::Library;

use crate::error::{RuntimeError, RuntimeResult};

struct CachedLibrary {
    library: Arc<Library>,
    ref_count: usize,
}

/// Reference-counted cache of opened shared libraries, keyed by path.
///
/// Runtimes in the same process share one handle per path; the library is
/// closed once the last holder releases it.
#[derive(Default)]
pub struct LibraryLoader {
    cache: Mutex<HashMap<PathBuf, CachedLibrary>>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide loader used by the runtime.
    pub fn shared() -> Arc<LibraryLoader> {
        static SHARED: OnceLock<Arc<LibraryLoader>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(LibraryLoader::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CachedLibrary>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached handle for `path`, opening the library on first use.
    pub fn acquire(&self, path: &Path) -> RuntimeResult<Arc<Library>> {
        let mut cache = self.lock();
        if let Some(entry) = cache.get_mut(path) {
            entry.ref_count += 1;
            tracing::debug!(
                "reusing {} (ref_count={})",
                path.display(),
                entry.ref_count
            );
            return Ok(entry.library.clone());
        }

        let library = Arc::new(open(path)?);
        cache.insert(
            path.to_path_buf(),
            CachedLibrary {
                library: library.clone(),
                ref_count: 1,
            },
        );
        tracing::debug!("loaded {}", path.display());
        Ok(library)
    }

    /// Drops one reference. The library is evicted and closed when the count reaches zero.
    /// Releasing a path that is not loaded does nothing.
    pub fn release(&self, path: &Path) {
        let mut cache = self.lock();
        let Some(entry) = cache.get_mut(path) else {
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            cache.remove(path);
            tracing::debug!("unloaded {}", path.display());
        }
    }

    pub fn ref_count(&self, path: &Path) -> usize {
        self.lock().get(path).map_or(0, |entry| entry.ref_count)
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }
}

#[cfg(unix)]
fn open(path: &Path) -> RuntimeResult<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // Symbols must be bound eagerly and visible to libraries the engine loads itself.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
        .map(Library::from)
        .map_err(|e| RuntimeError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

#[cfg(not(unix))]
fn open(path: &Path) -> RuntimeResult<Library> {
    unsafe { Library::new(path) }.map_err(|e| RuntimeError::LoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// One acquired reference, released on drop.
pub struct LibraryLease {
    loader: Arc<LibraryLoader>,
    path: PathBuf,
    library: Arc<Library>,
}

impl LibraryLease {
    pub fn acquire(loader: Arc<LibraryLoader>, path: &Path) -> RuntimeResult<Self> {
        let library = loader.acquire(path)?;
        Ok(Self {
            loader,
            path: path.to_path_buf(),
            library,
        })
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LibraryLease {
    fn drop(&mut self) {
        self.loader.release(&self.path);
    }
}
