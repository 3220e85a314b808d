use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context as _, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use wasmdl_config::{LIBRARY_PATH_ENV, WasmdlConfig, download_url, library_filename};
use wasmdl_runtime::value::{
    decode_f32, decode_f64, decode_i32, decode_i64, encode_f32, encode_f64, encode_i32, encode_i64,
};
use wasmdl_runtime::{ExitError, Module, Runtime, RuntimeConfig, RuntimeError, ValType};

const DEFAULT_ENTRY: &str = "_start";

/// Run WebAssembly modules on a wasmtime library loaded at runtime.
#[derive(Parser, Debug)]
#[command(name = "wasmdl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile, instantiate and call a module.
    Run(RunArgs),
    /// Check that the native library can be found and loaded.
    Doctor(DoctorArgs),
}

/// Where the runtime settings come from. Shared by `run` and `doctor`.
#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Path to a wasmdl config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the wasmtime shared library.
    #[arg(long)]
    library: Option<PathBuf>,
}

impl SourceArgs {
    fn load(&self) -> Result<WasmdlConfig> {
        match &self.config {
            Some(path) => WasmdlConfig::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e)),
            None => Ok(WasmdlConfig::default()),
        }
    }

    /// The config file's runtime settings with `--library` applied on top.
    fn runtime(&self, config: &WasmdlConfig) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::create_from_config(config);
        if let Some(library) = &self.library {
            runtime.library.path = Some(library.clone());
        }
        runtime
    }
}

#[derive(Args, Debug, Default)]
struct DoctorArgs {
    /// Show the resolved paths.
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// `.wasm` or `.wat` file. Falls back to `module.path` in the config file.
    module: Option<PathBuf>,

    #[command(flatten)]
    source: SourceArgs,

    /// Export to call.
    #[arg(long)]
    invoke: Option<String>,

    /// Instantiate with WASI imports.
    #[arg(long)]
    wasi: bool,

    /// Guest arguments with `--wasi`, otherwise parameters of the invoked export.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Everything `run` needs once the command line and config file are merged.
#[derive(Debug)]
struct RunPlan {
    module: PathBuf,
    invoke: String,
    wasi: bool,
    params: Vec<String>,
    runtime: RuntimeConfig,
}

impl RunPlan {
    fn new(args: RunArgs) -> Result<Self> {
        let config = args.source.load()?;
        let section = config.module.clone();

        let module = match (args.module, &section) {
            (Some(path), _) => path,
            (None, Some(section)) => section.path.clone(),
            (None, None) => bail!("no module given on the command line or in the config file"),
        };
        let invoke = args
            .invoke
            .or_else(|| section.as_ref().and_then(|s| s.invoke.clone()))
            .unwrap_or_else(|| DEFAULT_ENTRY.to_string());
        let wasi = args.wasi || section.as_ref().is_some_and(|s| s.wasi);

        let mut runtime = args.source.runtime(&config);

        let mut params = args.args;
        if wasi {
            // Guest arguments replace the configured ones, behind the program name.
            if !params.is_empty() {
                let program = module
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Some(wasi_config) = runtime.wasi_config.as_mut() {
                    wasi_config.args = std::iter::once(program).chain(params.drain(..)).collect();
                }
            }
        }

        Ok(Self {
            module,
            invoke,
            wasi,
            params,
            runtime,
        })
    }
}

fn main() -> ExitCode {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "wasmdl_runtime=warn,wasmdl_cli=info") };
    }

    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::from_default_env());
    if let Err(e) = subscriber.try_init() {
        eprintln!("failed to initialize logging: {e}");
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => RunPlan::new(args).and_then(|plan| run(&plan)),
        Command::Doctor(args) => doctor(&args),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(plan: &RunPlan) -> Result<ExitCode> {
    let bytes = std::fs::read(&plan.module)
        .with_context(|| format!("Failed to read module {}", plan.module.display()))?;
    let runtime = Runtime::new(plan.runtime.clone())?;
    let module = runtime.compile(&bytes)?;
    let code = invoke(&runtime, &module, plan)?;

    drop(module);
    if let Err(e) = runtime.close() {
        tracing::warn!("runtime not fully released: {e}");
    }
    Ok(code)
}

fn invoke(runtime: &Runtime, module: &Arc<Module>, plan: &RunPlan) -> Result<ExitCode> {
    let instance = if plan.wasi {
        runtime.instantiate_with_wasi(module)
    } else {
        runtime.instantiate(module)
    };
    let instance = match instance {
        Ok(instance) => instance,
        Err(e) => return exit_status(e),
    };

    let func = instance.exported_function(&plan.invoke)?;
    let params = parse_params(&plan.params, &func.ty().params)?;
    match func.call(&params) {
        Ok(results) => {
            for line in format_results(&results, &func.ty().results) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => exit_status(e),
    }
}

/// A guest exit becomes the process status. Anything else is an error.
fn exit_status(error: RuntimeError) -> Result<ExitCode> {
    match error {
        RuntimeError::Exit(ExitError { code }) => {
            tracing::info!("module exited with status {code}");
            Ok(u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from))
        }
        e => Err(e.into()),
    }
}

fn parse_params(args: &[String], types: &[ValType]) -> Result<Vec<u64>> {
    if args.len() != types.len() {
        bail!("expected {} arguments, got {}", types.len(), args.len());
    }
    args.iter()
        .zip(types)
        .map(|(arg, ty)| parse_param(arg, *ty))
        .collect()
}

fn parse_param(arg: &str, ty: ValType) -> Result<u64> {
    let carrier = match ty {
        ValType::I32 => encode_i32(
            arg.parse::<i32>()
                .or_else(|_| arg.parse::<u32>().map(|v| v as i32))
                .with_context(|| format!("invalid i32: {arg}"))?,
        ),
        ValType::I64 => encode_i64(
            arg.parse::<i64>()
                .or_else(|_| arg.parse::<u64>().map(|v| v as i64))
                .with_context(|| format!("invalid i64: {arg}"))?,
        ),
        ValType::F32 => encode_f32(arg.parse().with_context(|| format!("invalid f32: {arg}"))?),
        ValType::F64 => encode_f64(arg.parse().with_context(|| format!("invalid f64: {arg}"))?),
        other => bail!("{other} parameters cannot be passed from the command line"),
    };
    Ok(carrier)
}

fn format_results(results: &[u64], types: &[ValType]) -> Vec<String> {
    results
        .iter()
        .zip(types)
        .map(|(&carrier, ty)| match ty {
            ValType::I32 => decode_i32(carrier).to_string(),
            ValType::I64 => decode_i64(carrier).to_string(),
            ValType::F32 => decode_f32(carrier).to_string(),
            ValType::F64 => decode_f64(carrier).to_string(),
            other => format!("{other}:{carrier:#x}"),
        })
        .collect()
}

fn doctor(args: &DoctorArgs) -> Result<ExitCode> {
    let runtime = args.source.runtime(&args.source.load()?);
    println!("wasmdl {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.source.config {
        println!("config: {}", path.display());
    }

    match std::env::var(LIBRARY_PATH_ENV) {
        Ok(v) if !v.is_empty() => println!("{LIBRARY_PATH_ENV}: {v}"),
        _ => println!("{LIBRARY_PATH_ENV}: not set"),
    }

    let library = &runtime.library;
    if args.verbose {
        match library.cache_dir() {
            Ok(dir) => println!("cache directory: {}", dir.display()),
            Err(e) => println!("cache directory: {e}"),
        }
    }

    let path = match library.resolve() {
        Ok(path) => path,
        Err(e) => {
            println!("library: {e}");
            print_download_hint(&library.version);
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("library: {}", path.display());

    match Runtime::new(RuntimeConfig::with_library_path(&path)) {
        Ok(runtime) => {
            println!("engine: ok");
            if let Err(e) = runtime.close() {
                println!("  - note: {e}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("engine: {e}");
            check_file(&path);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_download_hint(version: &str) {
    match (download_url(version), library_filename()) {
        (Ok(url), Ok(file)) => {
            println!("  - fix: download {url}");
            println!("         and point {LIBRARY_PATH_ENV} at the extracted {file}");
        }
        (Err(e), _) | (_, Err(e)) => println!("  - note: {e}"),
    }
}

fn check_file(path: &Path) {
    if !path.exists() {
        println!("  - {} does not exist", path.display());
    } else if !path.is_file() {
        println!("  - {} is not a file", path.display());
    }
}
