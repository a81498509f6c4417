//! End-to-end invocation of guest functions.
//!
//! [`Runtime::execute`] runs one call as a single blocking sequence:
//!
//! 1. Read and compile the module
//! 2. Instantiate it into a fresh store with the host imports
//! 3. Bind the exported `memory` and set up the staging arena
//! 4. Convert parameters and check them against the entry signature
//! 5. Call the entry function and decode its results
//!
//! Nothing is shared between calls except the engine, the linker and the
//! injected collaborators; every call gets its own store, memory and arena.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{AsContextMut, FuncType, Instance, Linker, Trap, Val, ValType};

use guest_runtime_common::{AbiConfig, ArenaStart, ExecutionConfig, ResultExt, RuntimeConfig, RuntimeError};

use crate::arena::Arena;
use crate::codec::{ResultDecoding, decode_result, flatten_params, to_guest_value};
use crate::memory::MemoryView;
use crate::recorder::{CallRecorder, CallTracer};
use crate::store::{HostContext, OutputSink, StdoutSink, calculate_fuel_consumed, create_store, get_remaining_fuel};
use crate::value::{NativeValue, ValSet};
use crate::{CompiledModule, WasmEngine};

/// Size of the `(ptr, len)` slot staged for return-slot results.
const RETURN_SLOT_SIZE: usize = 8;

/// Guest function dispatcher.
///
/// `Runtime` owns the engine and the linker holding the host imports. It can
/// be reused for any number of calls; calls never share guest state.
pub struct Runtime {
    engine: WasmEngine,
    linker: Linker<HostContext>,
    execution: ExecutionConfig,
    abi: AbiConfig,
    recorder: Option<CallRecorder>,
    output: Arc<dyn OutputSink>,
    tracer: Option<Arc<dyn CallTracer>>,
}

impl Runtime {
    /// Create a runtime over a linker that already holds the host imports.
    pub fn new(engine: WasmEngine, linker: Linker<HostContext>, config: &RuntimeConfig) -> Self {
        Self {
            engine,
            linker,
            execution: config.execution.clone(),
            abi: config.abi.clone(),
            recorder: None,
            output: Arc::new(StdoutSink),
            tracer: None,
        }
    }

    /// Record host import calls made during every execution.
    #[must_use]
    pub fn with_recorder(mut self, recorder: CallRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Send guest `println` output to `output`.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    /// Report parameter conversions to `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn CallTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Load the module at `path` and call `function` with `params`.
    ///
    /// # Errors
    ///
    /// Returns a load error when the file cannot be read or compiled, and
    /// otherwise any error of [`Runtime::execute_module`].
    pub fn execute(
        &self,
        path: impl AsRef<Path>,
        function: &str,
        params: &[NativeValue],
        decoding: &ResultDecoding,
    ) -> Result<NativeValue, RuntimeError> {
        let module = CompiledModule::from_file(self.engine.inner(), path)?;
        self.execute_module(&module, function, params, decoding)
    }

    /// Call `function` of an already compiled module.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Instantiation fails (load error, or the start function aborts/traps)
    /// - The `memory`, allocator or entry function export is missing
    /// - A parameter cannot be converted or does not match the signature
    /// - The guest aborts or traps
    /// - The result cannot be decoded
    #[instrument(
        skip_all,
        fields(module = %module.name(), function = %function, invocation_id = tracing::field::Empty)
    )]
    pub fn execute_module(
        &self,
        module: &CompiledModule,
        function: &str,
        params: &[NativeValue],
        decoding: &ResultDecoding,
    ) -> Result<NativeValue, RuntimeError> {
        let invocation_id = Uuid::new_v4().to_string();
        Span::current().record("invocation_id", invocation_id.as_str());

        let context = HostContext::new(invocation_id)
            .with_recorder(self.recorder.clone())
            .with_output(Arc::clone(&self.output));
        let mut store = create_store(&self.engine, &self.execution, context)?;
        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);

        debug!("Instantiating module");

        let instance = self
            .linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| classify_instantiation_error(module.name(), e))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| RuntimeError::export_missing("memory", "memory"))?;
        let view = MemoryView::new(memory);
        store.data_mut().bind_memory(view);

        debug!(pages = view.pages(&store), bytes = view.size(&store), "Memory bound");

        let mut arena = self.create_arena(&mut store, &instance, &view)?;

        let func = instance
            .get_func(&mut store, function)
            .ok_or_else(|| RuntimeError::export_missing(function, "function"))?;
        let signature = func.ty(&store);

        debug!(signature = %describe_signature(&signature), "Entry point resolved");

        let mut encoded = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let value = to_guest_value(param, &mut arena, &mut store, &view)
                .with_context(|| format!("convert parameter #{index}"))?;
            debug!(index, native = ?param, encoded = ?value, "Parameter converted");
            if let Some(tracer) = &self.tracer {
                tracer.on_parameter(param, &value);
            }
            encoded.push(value);
        }

        let mut args = flatten_params(&encoded, self.abi.calling_convention);
        let return_slot = if decoding.needs_return_slot() {
            let slot = arena
                .write(&mut store, &view, &[0; RETURN_SLOT_SIZE])
                .context("stage return slot")?;
            args.push(Val::I32(slot));
            Some(slot)
        } else {
            None
        };

        check_signature(function, &signature, &args)?;

        let mut results: Vec<Val> = signature.results().map(|ty| zero_value(&ty)).collect();

        debug!(args = %ValSet(&args), "Executing entry point");

        let start = Instant::now();
        let outcome = func.call(&mut store, &args, &mut results);
        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &store);
        let duration = start.elapsed();
        let total = store.data().elapsed();

        if let Err(e) = outcome {
            let err = classify_guest_error(e);
            if err.is_guest_abort() {
                warn!(
                    duration_ms = duration.as_millis(),
                    total_ms = total.as_millis(),
                    error = %err,
                    "Guest aborted"
                );
            } else {
                error!(
                    duration_ms = duration.as_millis(),
                    total_ms = total.as_millis(),
                    fuel_consumed,
                    error = %err,
                    "Execution trapped"
                );
            }
            return Err(err);
        }

        info!(
            duration_ms = duration.as_millis(),
            total_ms = total.as_millis(),
            fuel_consumed,
            results = %ValSet(&results),
            "Execution completed successfully"
        );

        decode_result(&view, &store, decoding, &results, return_slot).context("decode result")
    }

    /// Build the staging arena according to the ABI configuration.
    fn create_arena(
        &self,
        mut store: impl AsContextMut,
        instance: &Instance,
        view: &MemoryView,
    ) -> Result<Arena, RuntimeError> {
        let size = view.size(&store);

        let arena = match self.abi.arena_start {
            ArenaStart::Origin => Arena::new(0, size),
            ArenaStart::MemoryEnd => {
                let end = i32::try_from(size)
                    .map_err(|_| RuntimeError::allocation(format!("memory of {size} bytes has no addressable end")))?;
                Arena::new(end, 0)
            }
        };
        let arena = arena.with_min_size(self.abi.min_arena_size);

        match &self.abi.allocator_export {
            Some(name) => {
                let allocator = instance
                    .get_typed_func::<i32, i32>(&mut store, name)
                    .map_err(|_| RuntimeError::export_missing(name, "allocator"))?;
                debug!(allocator = %name, "Guest allocator bound");
                Ok(arena.with_allocator(allocator))
            }
            None => Ok(arena),
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine)
            .field("abi", &self.abi)
            .field("recording", &self.recorder.is_some())
            .field("tracing", &self.tracer.is_some())
            .finish_non_exhaustive()
    }
}

/// Turn an error raised while guest code runs into a [`RuntimeError`].
///
/// Host import errors are recovered as they were raised; engine traps
/// keep their trap code.
fn classify_guest_error(error: wasmtime::Error) -> RuntimeError {
    let error = match error.downcast::<RuntimeError>() {
        Ok(err) => return err,
        Err(error) => error,
    };

    match error.downcast_ref::<Trap>() {
        Some(trap) => RuntimeError::trap(trap.to_string(), Some(format!("{trap:?}"))),
        None => RuntimeError::trap(format!("{error:#}"), None),
    }
}

/// Instantiation failures are load errors unless guest code ran and failed.
fn classify_instantiation_error(module: &str, error: wasmtime::Error) -> RuntimeError {
    if error.is::<RuntimeError>() || error.is::<Trap>() {
        return classify_guest_error(error).context("run start function");
    }
    RuntimeError::load(module, format!("instantiation failed: {error:#}"))
}

/// Check converted arguments against the entry function's signature.
fn check_signature(function: &str, signature: &FuncType, args: &[Val]) -> Result<(), RuntimeError> {
    let expected = signature.params().len();
    if expected != args.len() {
        return Err(RuntimeError::signature_mismatch(
            function,
            format!("expected {expected} parameter words, got {}", args.len()),
        ));
    }

    for (index, (ty, arg)) in signature.params().zip(args).enumerate() {
        if !val_matches(&ty, arg) {
            return Err(RuntimeError::signature_mismatch(
                function,
                format!("parameter word #{index} is {ty}, got {}", ValSet(std::slice::from_ref(arg))),
            ));
        }
    }

    if let Some(ty) = signature.results().find(|ty| !is_numeric(ty)) {
        return Err(RuntimeError::signature_mismatch(
            function,
            format!("unsupported result type {ty}"),
        ));
    }

    Ok(())
}

fn val_matches(ty: &ValType, val: &Val) -> bool {
    matches!(
        (ty, val),
        (ValType::I32, Val::I32(_))
            | (ValType::I64, Val::I64(_))
            | (ValType::F32, Val::F32(_))
            | (ValType::F64, Val::F64(_))
    )
}

fn is_numeric(ty: &ValType) -> bool {
    matches!(ty, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
}

/// Placeholder result slot for a numeric type.
fn zero_value(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        _ => Val::I32(0),
    }
}

fn describe_signature(signature: &FuncType) -> String {
    let params: Vec<String> = signature.params().map(|t| t.to_string()).collect();
    let results: Vec<String> = signature.results().map(|t| t.to_string()).collect();
    format!("({}) -> ({})", params.join(", "), results.join(", "))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use wasmtime::Engine;

    use super::*;
    use guest_runtime_common::GuestAbort;

    fn func_type(params: Vec<ValType>, results: Vec<ValType>) -> FuncType {
        FuncType::new(&Engine::default(), params, results)
    }

    #[test]
    fn test_signature_accepts_matching_words() {
        let ty = func_type(vec![ValType::I32, ValType::I64, ValType::F64], vec![ValType::I32]);

        let args = [Val::I32(1), Val::I64(2), Val::F64(0)];
        assert!(check_signature("main", &ty, &args).is_ok());
    }

    #[rstest]
    #[case::too_few(vec![Val::I32(1)])]
    #[case::too_many(vec![Val::I32(1), Val::I32(2), Val::I32(3)])]
    #[case::wrong_kind(vec![Val::I32(1), Val::F32(0)])]
    fn test_signature_mismatch(#[case] args: Vec<Val>) {
        let ty = func_type(vec![ValType::I32, ValType::I64], vec![]);

        let err = check_signature("main", &ty, &args).unwrap_err();
        assert!(matches!(err, RuntimeError::SignatureMismatch { ref function, .. } if function == "main"));
    }

    #[test]
    fn test_zero_values() {
        assert!(matches!(zero_value(&ValType::I32), Val::I32(0)));
        assert!(matches!(zero_value(&ValType::I64), Val::I64(0)));
        assert!(matches!(zero_value(&ValType::F64), Val::F64(0)));
    }

    #[test]
    fn test_describe_signature() {
        let ty = func_type(vec![ValType::I32, ValType::I32], vec![ValType::I64]);
        assert_eq!(describe_signature(&ty), "(i32, i32) -> (i64)");
    }

    #[test]
    fn test_classify_host_abort() {
        let abort = GuestAbort {
            message: "boom".into(),
            filename: "index.ts".into(),
            line: 3,
            column: 9,
        };
        let err = classify_guest_error(wasmtime::Error::new(RuntimeError::from(abort.clone())));

        assert_eq!(err.as_guest_abort(), Some(&abort));
    }

    #[test]
    fn test_classify_trap() {
        let err = classify_guest_error(wasmtime::Error::new(Trap::UnreachableCodeReached));

        match err {
            RuntimeError::GuestTrap { code, .. } => assert_eq!(code.as_deref(), Some("UnreachableCodeReached")),
            other => panic!("expected trap, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_instantiation_error() {
        let err = classify_instantiation_error("m.wasm", wasmtime::Error::msg("unknown import: `env::foo`"));
        assert!(matches!(err, RuntimeError::Load { ref module, .. } if module == "m.wasm"));

        let err = classify_instantiation_error("m.wasm", wasmtime::Error::new(Trap::UnreachableCodeReached));
        assert!(err.is_trap());
    }
}
