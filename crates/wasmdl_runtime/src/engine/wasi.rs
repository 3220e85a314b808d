use std::ffi::CString;
use std::path::{Path, PathBuf};

use wasmdl_config::WasiSection;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ffi::types::{
    wasi_config_t, WASI_DIR_PERMS_READ, WASI_DIR_PERMS_WRITE, WASI_FILE_PERMS_READ, WASI_FILE_PERMS_WRITE,
};
use crate::ffi::{c_string, Native};

use super::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreopenDir {
    pub host: PathBuf,
    pub guest: String,
    pub read: bool,
    pub write: bool,
}

impl PreopenDir {
    fn dir_perms(&self) -> usize {
        let mut perms = 0;
        if self.read {
            perms |= WASI_DIR_PERMS_READ;
        }
        if self.write {
            perms |= WASI_DIR_PERMS_WRITE;
        }
        perms
    }

    fn file_perms(&self) -> usize {
        let mut perms = 0;
        if self.read {
            perms |= WASI_FILE_PERMS_READ;
        }
        if self.write {
            perms |= WASI_FILE_PERMS_WRITE;
        }
        perms
    }
}

/// WASI settings for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasiConfig {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub preopens: Vec<PreopenDir>,
    pub inherit_argv: bool,
    pub inherit_env: bool,
    pub inherit_stdin: bool,
    pub inherit_stdout: bool,
    pub inherit_stderr: bool,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            args: vec![],
            env: vec![],
            preopens: vec![],
            inherit_argv: false,
            inherit_env: false,
            inherit_stdin: true,
            inherit_stdout: true,
            inherit_stderr: true,
        }
    }
}

impl WasiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_from_section(section: &WasiSection) -> Self {
        Self {
            args: section.args.clone(),
            env: section
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            preopens: section
                .preopens
                .iter()
                .map(|p| PreopenDir {
                    host: p.host.clone(),
                    guest: p.guest.clone(),
                    read: p.read,
                    write: p.write,
                })
                .collect(),
            inherit_argv: section.inherit_args,
            inherit_env: section.inherit_env,
            inherit_stdin: section.inherit_stdio,
            inherit_stdout: section.inherit_stdio,
            inherit_stderr: section.inherit_stdio,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn preopen_dir(mut self, host: impl AsRef<Path>, guest: impl Into<String>, read: bool, write: bool) -> Self {
        self.preopens.push(PreopenDir {
            host: host.as_ref().to_path_buf(),
            guest: guest.into(),
            read,
            write,
        });
        self
    }

    pub fn inherit_argv(mut self) -> Self {
        self.inherit_argv = true;
        self
    }

    pub fn inherit_env(mut self) -> Self {
        self.inherit_env = true;
        self
    }

    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdin = inherit;
        self.inherit_stdout = inherit;
        self.inherit_stderr = inherit;
        self
    }

    /// Explicit settings that an inherit flag overrides.
    pub fn overridden(&self) -> Vec<&'static str> {
        let mut overridden = vec![];
        if self.inherit_argv && !self.args.is_empty() {
            overridden.push("args");
        }
        if self.inherit_env && !self.env.is_empty() {
            overridden.push("env");
        }
        overridden
    }

    /// Builds the native configuration and hands it to `store`.
    ///
    /// Inherited argv or environment wins over explicit values, which are then
    /// ignored with a warning.
    pub fn apply(&self, store: &Store) -> RuntimeResult<()> {
        for setting in self.overridden() {
            tracing::warn!("wasi {setting} ignored because the host {setting} is inherited");
        }
        let native = store.native();
        let config = NativeWasiConfig::new(native)?;
        let raw = config.raw;

        if self.inherit_argv {
            unsafe { (native.api.wasi_config_inherit_argv)(raw) };
        } else if !self.args.is_empty() {
            let args = self.args.iter().map(|a| c_string(a)).collect::<RuntimeResult<Vec<_>>>()?;
            let ptrs: Vec<_> = args.iter().map(|a| a.as_ptr()).collect();
            if !unsafe { (native.api.wasi_config_set_argv)(raw, ptrs.len(), ptrs.as_ptr()) } {
                return Err(RuntimeError::Wasi("failed to set arguments".to_string()));
            }
        }

        if self.inherit_env {
            unsafe { (native.api.wasi_config_inherit_env)(raw) };
        } else if !self.env.is_empty() {
            let names = self.env.iter().map(|(k, _)| c_string(k)).collect::<RuntimeResult<Vec<_>>>()?;
            let values = self.env.iter().map(|(_, v)| c_string(v)).collect::<RuntimeResult<Vec<_>>>()?;
            let name_ptrs: Vec<_> = names.iter().map(|n| n.as_ptr()).collect();
            let value_ptrs: Vec<_> = values.iter().map(|v| v.as_ptr()).collect();
            if !unsafe {
                (native.api.wasi_config_set_env)(raw, name_ptrs.len(), name_ptrs.as_ptr(), value_ptrs.as_ptr())
            } {
                return Err(RuntimeError::Wasi("failed to set environment".to_string()));
            }
        }

        if self.inherit_stdin {
            unsafe { (native.api.wasi_config_inherit_stdin)(raw) };
        }
        if self.inherit_stdout {
            unsafe { (native.api.wasi_config_inherit_stdout)(raw) };
        }
        if self.inherit_stderr {
            unsafe { (native.api.wasi_config_inherit_stderr)(raw) };
        }

        for preopen in &self.preopens {
            let host = path_c_string(&preopen.host)?;
            let guest = c_string(&preopen.guest)?;
            let opened = unsafe {
                (native.api.wasi_config_preopen_dir)(
                    raw,
                    host.as_ptr(),
                    guest.as_ptr(),
                    preopen.dir_perms(),
                    preopen.file_perms(),
                )
            };
            if !opened {
                return Err(RuntimeError::Wasi(format!(
                    "failed to preopen {} as {}",
                    preopen.host.display(),
                    preopen.guest
                )));
            }
        }

        // The store takes ownership of the configuration, even on error.
        let error = unsafe { (native.api.wasmtime_context_set_wasi)(store.context(), config.into_raw()) };
        unsafe { native.check(error, RuntimeError::Wasi) }?;
        tracing::debug!(
            "configured WASI: {} args, {} env vars, {} preopens",
            self.args.len(),
            self.env.len(),
            self.preopens.len()
        );
        Ok(())
    }
}

fn path_c_string(path: &Path) -> RuntimeResult<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| RuntimeError::Wasi(format!("path is not UTF-8: {}", path.display())))?;
    c_string(text)
}

/// Deletes the native configuration unless ownership was handed to a store.
struct NativeWasiConfig<'a> {
    native: &'a Native,
    raw: *mut wasi_config_t,
}

impl<'a> NativeWasiConfig<'a> {
    fn new(native: &'a Native) -> RuntimeResult<Self> {
        let raw = unsafe { (native.api.wasi_config_new)() };
        if raw.is_null() {
            return Err(RuntimeError::CreationFailed("WASI config"));
        }
        Ok(Self { native, raw })
    }

    fn into_raw(mut self) -> *mut wasi_config_t {
        std::mem::replace(&mut self.raw, std::ptr::null_mut())
    }
}

impl Drop for NativeWasiConfig<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { (self.native.api.wasi_config_delete)(self.raw) };
        }
    }
}
