//! Command line interface: argument parsing and the `run` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use guest_runtime_common::{ArenaStart, CallingConvention, ConfigFile};
use guest_runtime_core::{
    ArrayLayout, CallRecord, CallRecorder, CallTracer, NativeValue, ResultDecoding, ResultLocator,
    TracingCallTracer, WasmEngine,
};
use guest_runtime_host::create_runtime;

/// Interval between epoch ticks once the watchdog fired.
const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

/// Run functions of a WebAssembly guest module.
#[derive(Debug, Parser)]
#[command(name = "guest-runtime", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Call one exported function and print its result as JSON.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the `.wasm` module.
    pub module: PathBuf,

    /// Name of the exported function to call.
    pub function: String,

    /// Parameters as `kind:value` (bool, i8, u8, i16, u16, i32, u32, i64,
    /// u64, f32, f64, str, bytes as hex).
    #[arg(value_parser = parse_param)]
    pub params: Vec<NativeValue>,

    /// TOML configuration file.
    #[arg(long, env = "GUEST_RUNTIME_CONFIG")]
    pub config: Option<PathBuf>,

    /// How to decode the function result.
    #[arg(long, value_enum, default_value_t = ResultKind::Scalar)]
    pub result: ResultKind,

    /// Where string and bytes results take their length from.
    #[arg(long, value_enum, default_value_t = LocatorArg::Header)]
    pub locator: LocatorArg,

    /// Layout of bytes results located by header.
    #[arg(long, value_enum, default_value_t = LayoutArg::LengthPrefixed)]
    pub layout: LayoutArg,

    /// Override the calling convention.
    #[arg(long, value_enum)]
    pub calling_convention: Option<ConventionArg>,

    /// Guest-exported `(size) -> ptr` allocator used to grow the arena.
    #[arg(long)]
    pub allocator: Option<String>,

    /// Override where the staging arena starts.
    #[arg(long, value_enum)]
    pub arena_start: Option<ArenaStartArg>,

    /// Trace every host import call.
    #[arg(long)]
    pub trace_imports: bool,

    /// Enable fuel metering with this budget.
    #[arg(long)]
    pub fuel: Option<u64>,

    /// Interrupt the guest after this many milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResultKind {
    Scalar,
    String,
    Bytes,
    I32Array,
    StringArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocatorArg {
    Header,
    SecondResult,
    ReturnSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    LengthPrefixed,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConventionArg {
    PointerOnly,
    PointerWithLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArenaStartArg {
    Origin,
    MemoryEnd,
}

impl RunArgs {
    /// Apply command line overrides on top of the configuration file.
    pub fn apply(&self, file: &mut ConfigFile) {
        let runtime = &mut file.runtime;

        if let Some(convention) = self.calling_convention {
            runtime.abi.calling_convention = match convention {
                ConventionArg::PointerOnly => CallingConvention::PointerOnly,
                ConventionArg::PointerWithLength => CallingConvention::PointerWithLength,
            };
        }
        if let Some(allocator) = &self.allocator {
            runtime.abi.allocator_export = Some(allocator.clone());
        }
        if let Some(start) = self.arena_start {
            runtime.abi.arena_start = match start {
                ArenaStartArg::Origin => ArenaStart::Origin,
                ArenaStartArg::MemoryEnd => ArenaStart::MemoryEnd,
            };
        }
        if self.trace_imports {
            runtime.trace.imports = true;
        }
        if let Some(fuel) = self.fuel {
            runtime.engine.fuel_metering = true;
            runtime.execution.max_fuel = fuel;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            file.watchdog.timeout_ms = Some(timeout_ms);
        }
        // The watchdog interrupts through the engine epoch.
        if file.watchdog.timeout_ms.is_some() {
            file.runtime.engine.epoch_interruption = true;
        }
    }

    /// The result decoding selected on the command line.
    pub fn decoding(&self) -> ResultDecoding {
        let locator = match self.locator {
            LocatorArg::Header => ResultLocator::Header,
            LocatorArg::SecondResult => ResultLocator::SecondResult,
            LocatorArg::ReturnSlot => ResultLocator::ReturnSlot,
        };
        let layout = match self.layout {
            LayoutArg::LengthPrefixed => ArrayLayout::LengthPrefixed,
            LayoutArg::Indirect => ArrayLayout::Indirect,
        };

        match self.result {
            ResultKind::Scalar => ResultDecoding::Scalar,
            ResultKind::String => ResultDecoding::String(locator),
            ResultKind::Bytes => ResultDecoding::Bytes { locator, layout },
            ResultKind::I32Array => ResultDecoding::I32Array,
            ResultKind::StringArray => ResultDecoding::StringArray,
        }
    }
}

/// Parse a `kind:value` parameter.
pub fn parse_param(raw: &str) -> Result<NativeValue, String> {
    let (kind, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected kind:value, got '{raw}'"))?;

    Ok(match kind {
        "bool" => NativeValue::Bool(number(kind, value)?),
        "i8" => NativeValue::I8(number(kind, value)?),
        "u8" => NativeValue::U8(number(kind, value)?),
        "i16" => NativeValue::I16(number(kind, value)?),
        "u16" => NativeValue::U16(number(kind, value)?),
        "i32" => NativeValue::I32(number(kind, value)?),
        "u32" => NativeValue::U32(number(kind, value)?),
        "i64" => NativeValue::I64(number(kind, value)?),
        "u64" => NativeValue::U64(number(kind, value)?),
        "f32" => NativeValue::F32(number(kind, value)?),
        "f64" => NativeValue::F64(number(kind, value)?),
        "str" => NativeValue::Text(value.to_string()),
        "bytes" => NativeValue::Bytes(
            hex::decode(value).map_err(|e| format!("invalid bytes value '{value}': {e}"))?,
        ),
        other => return Err(format!("unknown parameter kind '{other}'")),
    })
}

fn number<T>(kind: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("invalid {kind} value '{value}': {e}"))
}

/// Result document printed by `run`.
#[derive(Debug, Serialize)]
pub struct Output {
    pub result: NativeValue,
    pub calls: Vec<CallRecord>,
}

/// Execute `args` with the (already overridden) configuration file.
pub async fn run(args: RunArgs, file: &ConfigFile) -> anyhow::Result<Output> {
    let config = file.runtime.clone();
    let engine = WasmEngine::new(&config.engine).context("Failed to create engine")?;

    let tracer = config
        .trace
        .imports
        .then(|| Arc::new(TracingCallTracer) as Arc<dyn CallTracer>);
    let recorder = CallRecorder::new();
    let runtime = create_runtime(engine.clone(), &config, tracer)
        .context("Failed to link host imports")?
        .with_recorder(recorder.clone());

    let decoding = args.decoding();
    info!(module = %args.module.display(), function = %args.function, "Running guest function");

    let task = tokio::task::spawn_blocking(move || {
        runtime.execute(&args.module, &args.function, &args.params, &decoding)
    });
    let result = with_watchdog(task, &engine, file.watchdog.timeout_ms)
        .await?
        .context("Execution failed")?;

    Ok(Output {
        result,
        calls: recorder.calls(),
    })
}

/// Await a blocking execution, interrupting the guest once `timeout_ms` elapses.
pub async fn with_watchdog<T>(
    mut task: JoinHandle<T>,
    engine: &WasmEngine,
    timeout_ms: Option<u64>,
) -> anyhow::Result<T> {
    let Some(timeout_ms) = timeout_ms else {
        return task.await.context("Execution task failed");
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut task).await {
        Ok(joined) => joined.context("Execution task failed"),
        Err(_) => {
            warn!(timeout_ms, "Execution timed out, interrupting guest");
            // Keep ticking: a store created after the first tick has a later deadline.
            loop {
                engine.increment_epoch();
                if let Ok(joined) = tokio::time::timeout(INTERRUPT_RETRY, &mut task).await {
                    return joined.context("Execution task failed");
                }
            }
        }
    }
}
