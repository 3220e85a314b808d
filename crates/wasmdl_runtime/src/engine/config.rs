use std::path::PathBuf;

use wasmdl_config::{LibraryConfig, WasmdlConfig};

use super::wasi::WasiConfig;

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Where the native library comes from.
    pub library: LibraryConfig,
    /// WASI settings used by `Runtime::instantiate_with_wasi`. `None` means defaults.
    pub wasi_config: Option<WasiConfig>,
    /// Reuse compiled modules for identical bytes.
    pub compilation_cache: bool,
}

impl RuntimeConfig {
    pub fn create_from_config(config: &WasmdlConfig) -> Self {
        Self {
            library: config.library.clone(),
            wasi_config: Some(WasiConfig::create_from_section(&config.wasi)),
            compilation_cache: config.compilation_cache,
        }
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library: LibraryConfig::with_path(path),
            ..Self::default()
        }
    }
}
