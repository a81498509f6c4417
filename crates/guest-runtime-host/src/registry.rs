//! Host import table and linker construction.
//!
//! Every host import is described once by an [`ImportDescriptor`] in a
//! process-wide table. [`ImportRegistry::link`] groups the table by namespace
//! and registers each entry on a Wasmtime linker, wrapping it with the
//! optional [`CallTracer`] and converting its [`RuntimeError`] into the
//! engine's error type.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;
use wasmtime::{Caller, FuncType, Linker, Val, ValType};

use guest_runtime_common::{RuntimeConfig, RuntimeError};
use guest_runtime_core::{CallTracer, HostContext, MemoryView, Runtime, WasmEngine};

use crate::{env, index};

/// Signature shared by all host import implementations.
pub type ImportFn = fn(&mut Caller<'_, HostContext>, &[Val]) -> Result<Vec<Val>, RuntimeError>;

/// A host function the guest may import.
#[derive(Clone)]
pub struct ImportDescriptor {
    /// Import namespace (`env`, `index`).
    pub module: &'static str,

    /// Function name inside the namespace.
    pub name: &'static str,

    /// Parameter kinds.
    pub params: Vec<ValType>,

    /// Result kinds.
    pub results: Vec<ValType>,

    /// Host implementation.
    pub implementation: ImportFn,
}

impl ImportDescriptor {
    fn new(
        module: &'static str,
        name: &'static str,
        params: &[ValType],
        results: &[ValType],
        implementation: ImportFn,
    ) -> Self {
        Self {
            module,
            name,
            params: params.to_vec(),
            results: results.to_vec(),
            implementation,
        }
    }
}

impl std::fmt::Debug for ImportDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportDescriptor")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

static IMPORTS: Lazy<Vec<ImportDescriptor>> = Lazy::new(|| {
    use ValType::I32;

    vec![
        ImportDescriptor::new("env", "abort", &[I32, I32, I32, I32], &[], env::abort),
        ImportDescriptor::new("env", "println", &[I32, I32], &[], env::println),
        ImportDescriptor::new("index", "log.log", &[I32, I32], &[], index::log_log),
        // Placeholders returning zero without reading their arguments.
        ImportDescriptor::new("index", "typeConversion.bytesToHex", &[I32], &[I32], index::zero),
        ImportDescriptor::new("index", "bigDecimal.fromString", &[I32], &[I32], index::zero),
        ImportDescriptor::new("index", "typeConversion.stringToH160", &[I32], &[I32], index::zero),
        ImportDescriptor::new("index", "store.get", &[I32, I32], &[I32], index::zero),
        ImportDescriptor::new("index", "store.set", &[I32, I32, I32], &[], index::nothing),
        ImportDescriptor::new("index", "ethereum.call", &[I32], &[I32], index::zero),
        ImportDescriptor::new("index", "typeConversion.bytesToString", &[I32], &[I32], index::zero),
        ImportDescriptor::new("index", "dataSource.create", &[I32, I32], &[], index::nothing),
    ]
});

/// The host import table, optionally traced.
#[derive(Clone, Default)]
pub struct ImportRegistry {
    tracer: Option<Arc<dyn CallTracer>>,
}

impl ImportRegistry {
    /// Create a registry over the process-wide import table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap every import with `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn CallTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Every registered import.
    pub fn imports(&self) -> &'static [ImportDescriptor] {
        IMPORTS.as_slice()
    }

    /// Look up an import by namespace and name.
    pub fn find(&self, module: &str, name: &str) -> Option<&'static ImportDescriptor> {
        self.imports()
            .iter()
            .find(|import| import.module == module && import.name == name)
    }

    /// Imports grouped by namespace.
    pub fn namespaces(&self) -> BTreeMap<&'static str, Vec<&'static ImportDescriptor>> {
        let mut namespaces: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for import in self.imports() {
            namespaces.entry(import.module).or_default().push(import);
        }
        namespaces
    }

    /// Register every import on `linker`.
    ///
    /// # Errors
    ///
    /// Returns an error if an import cannot be defined (e.g. it is already
    /// defined with another signature).
    pub fn link(&self, linker: &mut Linker<HostContext>) -> Result<(), RuntimeError> {
        for (module, imports) in self.namespaces() {
            for import in imports {
                let ty = FuncType::new(
                    linker.engine(),
                    import.params.iter().cloned(),
                    import.results.iter().cloned(),
                );
                let tracer = self.tracer.clone();

                linker
                    .func_new(module, import.name, ty, move |mut caller, params, results| {
                        dispatch(import, tracer.as_deref(), &mut caller, params, results)
                    })
                    .map_err(|e| {
                        RuntimeError::invalid_config(format!(
                            "Failed to register {module}.{}: {e}",
                            import.name
                        ))
                    })?;
            }
            debug!(namespace = module, "Host namespace registered");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ImportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportRegistry")
            .field("imports", &self.imports().len())
            .field("tracing", &self.tracer.is_some())
            .finish()
    }
}

/// Run one import and hand its outcome back to the engine.
///
/// Guest aborts travel unchanged so the dispatcher can surface them as is;
/// every other failure is annotated with the import name.
fn dispatch(
    import: &ImportDescriptor,
    tracer: Option<&dyn CallTracer>,
    caller: &mut Caller<'_, HostContext>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    if let Some(tracer) = tracer {
        tracer.on_import_call(import.module, import.name, params);
    }

    let outcome = (import.implementation)(caller, params).and_then(|values| {
        if values.len() == results.len() {
            Ok(values)
        } else {
            Err(RuntimeError::signature_mismatch(
                format!("{}.{}", import.module, import.name),
                format!("produced {} results, expected {}", values.len(), results.len()),
            ))
        }
    });

    if let Some(tracer) = tracer {
        tracer.on_import_return(import.module, import.name, outcome.as_deref());
    }

    match outcome {
        Ok(values) => {
            for (slot, value) in results.iter_mut().zip(values) {
                *slot = value;
            }
            Ok(())
        }
        Err(e) if e.is_guest_abort() => Err(wasmtime::Error::new(e)),
        Err(e) => Err(wasmtime::Error::new(
            e.context(format!("host import {}.{}", import.module, import.name)),
        )),
    }
}

/// The guest memory reachable from an import.
///
/// Falls back to the caller's `memory` export when the import runs before
/// the dispatcher bound it (from the start function).
pub(crate) fn guest_memory(caller: &mut Caller<'_, HostContext>) -> Result<MemoryView, RuntimeError> {
    if let Ok(view) = caller.data().memory() {
        return Ok(view);
    }
    caller
        .get_export("memory")
        .and_then(wasmtime::Extern::into_memory)
        .map(MemoryView::new)
        .ok_or_else(|| RuntimeError::export_missing("memory", "memory"))
}

/// Read the `index`-th parameter as an `i32` word.
pub(crate) fn arg_i32(params: &[Val], index: usize) -> Result<i32, RuntimeError> {
    match params.get(index) {
        Some(Val::I32(v)) => Ok(*v),
        other => Err(RuntimeError::decode(
            format!("argument #{index}"),
            format!("expected an i32 word, got {other:?}"),
        )),
    }
}

/// Create a linker holding every host import.
///
/// # Errors
///
/// Returns an error if an import cannot be registered.
pub fn create_linker(
    engine: &WasmEngine,
    registry: &ImportRegistry,
) -> Result<Linker<HostContext>, RuntimeError> {
    let mut linker = Linker::new(engine.inner());
    registry.link(&mut linker)?;
    Ok(linker)
}

/// Create a [`Runtime`] with the host imports linked.
///
/// The tracer, if any, observes both the imports and parameter conversion.
///
/// # Errors
///
/// Returns an error if an import cannot be registered.
pub fn create_runtime(
    engine: WasmEngine,
    config: &RuntimeConfig,
    tracer: Option<Arc<dyn CallTracer>>,
) -> Result<Runtime, RuntimeError> {
    let mut registry = ImportRegistry::new();
    if let Some(tracer) = &tracer {
        registry = registry.with_tracer(Arc::clone(tracer));
    }

    let linker = create_linker(&engine, &registry)?;
    let runtime = Runtime::new(engine, linker, config);

    Ok(match tracer {
        Some(tracer) => runtime.with_tracer(tracer),
        None => runtime,
    })
}

#[cfg(test)]
mod tests {
    use guest_runtime_common::EngineConfig;

    use super::*;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_namespaces() {
        let namespaces = ImportRegistry::new().namespaces();

        assert_eq!(namespaces.keys().copied().collect::<Vec<_>>(), vec!["env", "index"]);
        assert_eq!(namespaces["env"].len(), 2);
        assert_eq!(namespaces["index"].len(), 9);
    }

    #[test]
    fn test_find_signatures() {
        let registry = ImportRegistry::new();

        let abort = registry.find("env", "abort").unwrap();
        assert_eq!(abort.params.len(), 4);
        assert!(abort.results.is_empty());

        let store_get = registry.find("index", "store.get").unwrap();
        assert_eq!(store_get.params.len(), 2);
        assert_eq!(store_get.results.len(), 1);

        assert!(registry.find("index", "nope").is_none());
    }

    #[test]
    fn test_create_linker() {
        assert!(create_linker(&engine(), &ImportRegistry::new()).is_ok());
    }

    #[test]
    fn test_link_twice_fails() {
        let engine = engine();
        let registry = ImportRegistry::new();
        let mut linker = create_linker(&engine, &registry).unwrap();

        let result = registry.link(&mut linker);
        assert!(matches!(result, Err(RuntimeError::InvalidConfig { .. })));
    }

    #[test]
    fn test_arg_i32() {
        let params = [Val::I32(7), Val::I64(1)];

        assert_eq!(arg_i32(&params, 0).unwrap(), 7);
        assert!(arg_i32(&params, 1).is_err());
        assert!(arg_i32(&params, 2).is_err());
    }
}
