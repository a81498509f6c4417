//! Per-invocation host context and store management.
//!
//! This module provides:
//! - [`HostContext`]: state reachable from host imports through [`wasmtime::Caller`]
//! - [`OutputSink`]: destination of guest `println` output
//! - [`create_store`]: a fresh store with fuel, epoch and memory limits applied

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use guest_runtime_common::{ExecutionConfig, RuntimeError};

use crate::WasmEngine;
use crate::memory::MemoryView;
use crate::recorder::{CallRecord, CallRecorder};

/// Destination of text printed by the guest.
pub trait OutputSink: Send + Sync {
    /// Write one line of guest output.
    fn write_line(&self, line: &str);
}

/// Writes guest output to the process stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            warn!(error = %e, "unable to write guest output");
        }
    }
}

/// Keeps guest output in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl OutputSink for BufferedSink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Per-invocation execution context.
///
/// Created for each `execute` call and dropped with the store once the call
/// returns. Host imports reach it through [`wasmtime::Caller::data`].
pub struct HostContext {
    /// Unique invocation identifier for tracing.
    pub invocation_id: String,

    /// Guest memory, bound once the instance exports it.
    memory: Option<MemoryView>,

    /// Recorder receiving host import calls, if any.
    recorder: Option<CallRecorder>,

    /// Sink for `env.println`.
    output: Arc<dyn OutputSink>,

    /// Store limits (memory cap).
    pub(crate) limits: StoreLimits,

    start_time: Instant,
}

impl HostContext {
    /// Create a context writing guest output to stdout.
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            memory: None,
            recorder: None,
            output: Arc::new(StdoutSink),
            limits: StoreLimits::default(),
            start_time: Instant::now(),
        }
    }

    /// Record host calls into `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Option<CallRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Send guest output to `output`.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    /// Bind the instance's exported memory.
    pub fn bind_memory(&mut self, memory: MemoryView) {
        self.memory = Some(memory);
    }

    /// The bound guest memory.
    ///
    /// # Errors
    ///
    /// Fails when called before the memory was bound, e.g. by an import
    /// invoked from the start function.
    pub fn memory(&self) -> Result<MemoryView, RuntimeError> {
        self.memory
            .ok_or_else(|| RuntimeError::export_missing("memory", "memory"))
    }

    /// Append a record if a recorder is attached.
    pub fn record(&self, call: CallRecord) {
        if let Some(recorder) = &self.recorder {
            recorder.record(call);
        }
    }

    /// The guest output sink.
    pub fn output(&self) -> &dyn OutputSink {
        self.output.as_ref()
    }

    /// Elapsed time since the invocation started, instantiation and
    /// parameter staging included.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("invocation_id", &self.invocation_id)
            .field("memory_bound", &self.memory.is_some())
            .field("recording", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store around `context`.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    mut context: HostContext,
) -> Result<Store<HostContext>, RuntimeError> {
    context.limits = StoreLimitsBuilder::new()
        .memory_size(config.max_memory_bytes())
        .build();

    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.is_fuel_enabled() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    // One tick: the watchdog interrupts with a single epoch increment.
    if engine.config().epoch_interruption {
        store.set_epoch_deadline(1);
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<HostContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<HostContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NativeValue;
    use guest_runtime_common::EngineConfig;

    #[test]
    fn test_host_context_creation() {
        let ctx = HostContext::new("test-invocation-123");

        assert_eq!(ctx.invocation_id, "test-invocation-123");
        assert!(matches!(ctx.memory(), Err(RuntimeError::ExportMissing { .. })));
    }

    #[test]
    fn test_record_without_recorder_is_dropped() {
        let ctx = HostContext::new("test");
        ctx.record(CallRecord::new("index", "log.log", vec![NativeValue::I32(1)]));
    }

    #[test]
    fn test_record_with_recorder() {
        let recorder = CallRecorder::new();
        let ctx = HostContext::new("test").with_recorder(Some(recorder.clone()));

        ctx.record(CallRecord::new("index", "log.log", vec![NativeValue::I32(1)]));

        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_elapsed_covers_context_lifetime() {
        let ctx = HostContext::new("test");
        std::thread::sleep(Duration::from_millis(5));

        let first = ctx.elapsed();
        assert!(first >= Duration::from_millis(5));
        assert!(ctx.elapsed() >= first);
    }

    #[test]
    fn test_buffered_sink() {
        let sink = BufferedSink::new();
        let ctx = HostContext::new("test").with_output(Arc::new(sink.clone()));

        ctx.output().write_line("hello");
        ctx.output().write_line("world");

        assert_eq!(sink.lines(), vec!["hello", "world"]);
    }

    #[test]
    fn test_store_creation() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let store = create_store(&engine, &ExecutionConfig::default(), HostContext::new("test-123"));

        assert!(store.is_ok());
    }

    #[test]
    fn test_store_fuel() {
        let engine = WasmEngine::new(&EngineConfig {
            fuel_metering: true,
            ..Default::default()
        })
        .unwrap();
        let exec_config = ExecutionConfig {
            max_fuel: 1000,
            ..Default::default()
        };

        let store = create_store(&engine, &exec_config, HostContext::new("test")).unwrap();

        assert_eq!(get_remaining_fuel(&store), Some(1000));
        assert_eq!(calculate_fuel_consumed(1000, &store), 0);
    }

    #[test]
    fn test_store_without_fuel() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let store = create_store(&engine, &ExecutionConfig::default(), HostContext::new("test")).unwrap();

        assert_eq!(get_remaining_fuel(&store), None);
    }
}
