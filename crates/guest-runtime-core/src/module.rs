//! WebAssembly module loading and compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that reads guest files, validates and compiles them. Every failure on the
//! way from a path to a compiled module is reported as a load error.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use guest_runtime_common::RuntimeError;

/// A compiled WebAssembly module.
///
/// `CompiledModule` is cheap to clone and can be executed any number of
/// times; each execution instantiates it into a fresh store.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Name used in errors and logs (usually the file path).
    name: String,

    /// Hash of the original Wasm bytes.
    content_hash: String,
}

impl CompiledModule {
    /// Read and compile a module from a file.
    ///
    /// # Errors
    ///
    /// Returns a load error if the file cannot be read or does not compile.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let bytes = std::fs::read(path)
            .map_err(|e| RuntimeError::load(&name, format!("unable to read wasm file: {e}")))?;

        debug!(bytes_len = bytes.len(), "Module file read");

        Self::from_bytes(engine, name, &bytes)
    }

    /// Compile a module from WebAssembly binary bytes.
    ///
    /// # Errors
    ///
    /// Returns a load error if the bytes are not a valid module.
    #[instrument(skip(engine, name, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(
        engine: &Engine,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        let start = Instant::now();

        Self::validate_wasm_header(bytes).map_err(|reason| RuntimeError::load(&name, reason))?;

        let module = Module::from_binary(engine, bytes)
            .map_err(|e| RuntimeError::load(&name, format!("compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);

        info!(
            module = %name,
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            name,
            content_hash,
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns a load error if the text does not parse or compile.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| RuntimeError::load("<wat>", format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        debug!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            name: "<wat>".to_string(),
            content_hash,
        })
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Get the module name used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), &'static str> {
        if bytes.len() < 8 {
            return Err("invalid wasm: file too small");
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err("invalid wasm: bad magic number");
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.name)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::WasmEngine;
    use guest_runtime_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        assert!(CompiledModule::validate_wasm_header(&[0x00, 0x61]).is_err());
    }

    #[test]
    fn test_bad_magic_is_load_error() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = CompiledModule::from_bytes(engine().inner(), "bad.wasm", bad_wasm);

        assert!(matches!(result, Err(RuntimeError::Load { ref module, .. }) if module == "bad.wasm"));
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16); // 64-bit hex
    }

    #[test]
    fn test_module_compilation() {
        let module = CompiledModule::from_bytes(engine().inner(), "minimal", MINIMAL_WASM).unwrap();

        assert_eq!(module.name(), "minimal");
        assert!(!module.content_hash().is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL_WASM).unwrap();

        let module = CompiledModule::from_file(engine().inner(), file.path()).unwrap();
        assert_eq!(module.name(), file.path().display().to_string());
    }

    #[test]
    fn test_from_missing_file() {
        let result = CompiledModule::from_file(engine().inner(), "/no/such/module.wasm");
        assert!(matches!(result, Err(RuntimeError::Load { .. })));
    }

    #[test]
    fn test_invalid_wat() {
        let result = CompiledModule::from_wat(engine().inner(), "(module (func $broken");
        assert!(matches!(result, Err(RuntimeError::Load { .. })));
    }

    #[test]
    fn test_module_debug() {
        let module = CompiledModule::from_bytes(engine().inner(), "minimal", MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
