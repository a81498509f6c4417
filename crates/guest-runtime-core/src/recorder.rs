//! Host import call recording and tracing.
//!
//! - [`CallRecorder`]: append-only log of host import invocations, read by
//!   the caller once an execution returns
//! - [`CallTracer`]: observability hook injected into the import registry
//!   and the dispatcher

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use wasmtime::Val;

use guest_runtime_common::RuntimeError;

use crate::value::{GuestValue, NativeValue, ValSet};

/// A single host import invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    /// Import namespace (e.g. `index`).
    pub module: String,

    /// Function name inside the namespace (e.g. `log.log`).
    pub function: String,

    /// Decoded parameters.
    pub params: Vec<NativeValue>,

    /// Decoded return value, `None` for imports without results.
    pub return_value: Option<NativeValue>,
}

impl CallRecord {
    /// Create a record for an import without a return value.
    pub fn new(module: impl Into<String>, function: impl Into<String>, params: Vec<NativeValue>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            params,
            return_value: None,
        }
    }
}

/// Shared, append-only list of [`CallRecord`]s.
///
/// Cloning the recorder yields another handle onto the same list.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&self, call: CallRecord) {
        debug!(module = %call.module, function = %call.function, "host call recorded");
        self.calls.lock().push(call);
    }

    /// Snapshot of every record in call order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Observer of host import invocations and parameter conversions.
///
/// Implementations must not alter the call they observe.
pub trait CallTracer: Send + Sync {
    /// Called before an import runs, with its raw arguments.
    fn on_import_call(&self, module: &str, function: &str, params: &[Val]);

    /// Called after an import returns, with its raw results or its error.
    fn on_import_return(&self, module: &str, function: &str, outcome: Result<&[Val], &RuntimeError>);

    /// Called by the dispatcher for every converted parameter.
    fn on_parameter(&self, _native: &NativeValue, _encoded: &GuestValue) {}
}

/// [`CallTracer`] forwarding every event to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallTracer;

impl CallTracer for TracingCallTracer {
    fn on_import_call(&self, module: &str, function: &str, params: &[Val]) {
        debug!(target: "guest_runtime::trace", "host call {module}.{function}{}", ValSet(params));
    }

    fn on_import_return(&self, module: &str, function: &str, outcome: Result<&[Val], &RuntimeError>) {
        match outcome {
            Ok(results) => {
                debug!(target: "guest_runtime::trace", "host call {module}.{function} returned {}", ValSet(results));
            }
            Err(e) => {
                debug!(target: "guest_runtime::trace", error = %e, "host call {module}.{function} failed");
            }
        }
    }

    fn on_parameter(&self, native: &NativeValue, encoded: &GuestValue) {
        debug!(target: "guest_runtime::trace", ?native, ?encoded, "parameter converted");
    }
}
