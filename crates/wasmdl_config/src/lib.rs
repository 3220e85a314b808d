use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, String>;

/// wasmtime release whose C API the runtime binds against.
pub const DEFAULT_LIBRARY_VERSION: &str = "v40.0.0";

/// Environment variable that overrides the library location.
pub const LIBRARY_PATH_ENV: &str = "WASMTIME_LIB_PATH";

const RELEASE_BASE_URL: &str = "https://github.com/bytecodealliance/wasmtime/releases/download";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WasmdlConfig {
    /// Where to find the native wasmtime library.
    #[serde(default)]
    pub library: LibraryConfig,
    /// WASI settings applied when a module is instantiated with WASI.
    #[serde(default)]
    pub wasi: WasiSection,
    /// Module to run (used by the CLI).
    #[serde(default)]
    pub module: Option<ModuleSection>,
    /// Cache compiled modules by content hash.
    #[serde(default)]
    pub compilation_cache: bool,

    /// Directory where the config file is located.
    /// Relative paths in the file are resolved against it.
    #[serde(skip)]
    config_dir: PathBuf,
}

impl WasmdlConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config: WasmdlConfig = serde_yaml::from_reader(
            std::fs::File::open(path).map_err(|e| format!("Failed to open file: {}", e))?,
        )
        .map_err(|e| format!("Failed to parse YAML: {}", e))?;

        let path = path
            .canonicalize()
            .map_err(|e| format!("Failed to canonicalize path: {}", e))?;
        config.config_dir = path
            .parent()
            .ok_or_else(|| format!("Failed to get parent directory of path: {}", path.display()))?
            .to_path_buf();
        config.validate()?;
        config.resolve_relative_paths();

        Ok(config)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn resolve_relative_paths(&mut self) {
        let base = self.config_dir.clone();
        let absolutize = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.library.path.as_mut() {
            absolutize(path);
        }
        if let Some(dir) = self.library.cache_dir.as_mut() {
            absolutize(dir);
        }
        for preopen in self.wasi.preopens.iter_mut() {
            absolutize(&mut preopen.host);
        }
        if let Some(module) = self.module.as_mut() {
            absolutize(&mut module.path);
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.config_dir.is_dir() {
            return Err(format!(
                "Broken config path: config_dir is not a directory: {}",
                self.config_dir.display()
            ));
        }

        if self.library.version.is_empty() {
            return Err("Library version must not be empty".to_string());
        }

        for preopen in self.wasi.preopens.iter() {
            if preopen.guest.is_empty() {
                return Err(format!(
                    "Guest path must not be empty for preopen {}",
                    preopen.host.display()
                ));
            }
            if !preopen.read && !preopen.write {
                return Err(format!(
                    "Preopen {} must allow read or write",
                    preopen.guest
                ));
            }
        }

        for key in self.wasi.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(format!("Invalid environment variable name: {:?}", key));
            }
        }

        if let Some(module) = &self.module {
            if module.path.as_os_str().is_empty() {
                return Err("Module path must not be empty".to_string());
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Explicit path to the shared library. Takes precedence over everything else.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Release version used to locate a pre-fetched library in the cache directory.
    #[serde(default = "LibraryConfig::default_version")]
    pub version: String,
    /// Overrides the per-platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            version: Self::default_version(),
            cache_dir: None,
        }
    }
}

impl LibraryConfig {
    fn default_version() -> String {
        DEFAULT_LIBRARY_VERSION.to_string()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Resolves the library location, consulting `WASMTIME_LIB_PATH`.
    pub fn resolve(&self) -> Result<PathBuf> {
        let from_env = std::env::var_os(LIBRARY_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        self.resolve_with_override(from_env)
    }

    /// Precedence: explicit `path`, then `env_override`, then the cache directory.
    pub fn resolve_with_override(&self, env_override: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        if let Some(path) = env_override {
            return Ok(path);
        }

        let cached = self.cache_dir()?.join(library_filename()?);
        if cached.is_file() {
            return Ok(cached);
        }

        Err(format!(
            "wasmtime library {} not found at {}; download {} and extract {} there, or set {}",
            self.version,
            cached.display(),
            download_url(&self.version)?,
            library_filename()?,
            LIBRARY_PATH_ENV
        ))
    }

    /// Per-platform cache directory keyed by version.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let base = match &self.cache_dir {
            Some(dir) => return Ok(dir.join(&self.version)),
            None => platform_data_dir()?,
        };
        Ok(base.join("wasmdl").join(&self.version))
    }
}

fn platform_data_dir() -> Result<PathBuf> {
    if cfg!(target_os = "windows") {
        std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .ok_or_else(|| "LOCALAPPDATA is not set".to_string())
    } else if cfg!(any(target_os = "linux", target_os = "macos")) {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local").join("share"))
            .ok_or_else(|| "HOME is not set".to_string())
    } else {
        Err(format!("Unsupported platform: {}", std::env::consts::OS))
    }
}

/// File name of the shared library on this platform.
pub fn library_filename() -> Result<&'static str> {
    match std::env::consts::OS {
        "linux" => Ok("libwasmtime.so"),
        "macos" => Ok("libwasmtime.dylib"),
        "windows" => Ok("wasmtime.dll"),
        os => Err(format!("Unsupported operating system: {}", os)),
    }
}

/// Release archive URL of the C API for this platform.
pub fn download_url(version: &str) -> Result<String> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "macos",
        "windows" => "windows",
        os => return Err(format!("Unsupported operating system: {}", os)),
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x86_64",
        "aarch64" => "aarch64",
        arch => return Err(format!("Unsupported architecture: {}", arch)),
    };
    let ext = if os == "windows" { "zip" } else { "tar.xz" };
    Ok(format!(
        "{RELEASE_BASE_URL}/{version}/wasmtime-{version}-{arch}-{os}-c-api.{ext}"
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WasiSection {
    /// Arguments passed to the module. The first one is conventionally the program name.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables, in insertion order.
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Host directories made visible to the guest.
    #[serde(default)]
    pub preopens: Vec<PreopenConfig>,
    /// Inherit stdin/stdout/stderr from the host.
    ///
    /// Default: true.
    #[serde(default = "default_true")]
    pub inherit_stdio: bool,
    /// Inherit the host environment instead of `env`.
    #[serde(default)]
    pub inherit_env: bool,
    /// Inherit the host arguments instead of `args`.
    #[serde(default)]
    pub inherit_args: bool,
}

impl Default for WasiSection {
    fn default() -> Self {
        Self {
            args: vec![],
            env: IndexMap::new(),
            preopens: vec![],
            inherit_stdio: true,
            inherit_env: false,
            inherit_args: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreopenConfig {
    /// Directory on the host.
    pub host: PathBuf,
    /// Path under which the guest sees it.
    pub guest: String,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
    /// Path to a `.wasm` or `.wat` file.
    pub path: PathBuf,
    /// Export to call. Defaults to `_start`.
    #[serde(default)]
    pub invoke: Option<String>,
    /// Instantiate with WASI imports.
    #[serde(default)]
    pub wasi: bool,
}

fn default_true() -> bool {
    true
}
