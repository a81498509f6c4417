//! Error types for guest-runtime.
//!
//! This module defines the error taxonomy of the host/guest boundary using `thiserror`:
//! - [`RuntimeError`]: Top-level errors returned by every fallible operation
//! - [`BoundsError`]: A guest memory access outside the live buffer
//! - [`GuestAbort`]: A structured abort raised by the guest through `env.abort`

use thiserror::Error;

/// A guest memory access that falls outside the live linear memory.
///
/// Offsets and lengths are kept as `i64` so that both guest words (`i32`)
/// and host lengths (`usize`) are represented without truncation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("segment at offset {offset} with length {length} is outside memory of {memory_size} bytes")]
pub struct BoundsError {
    /// Start of the requested segment.
    pub offset: i64,
    /// Requested length in bytes.
    pub length: i64,
    /// Size of the linear memory at the time of the access.
    pub memory_size: usize,
}

/// Abort raised by guest code through the `env.abort` import.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("wasm execution aborted at {filename}:{line}:{column}: {message}")]
pub struct GuestAbort {
    /// Abort message decoded from guest memory.
    pub message: String,
    /// Source file name decoded from guest memory.
    pub filename: String,
    /// Source line reported by the guest.
    pub line: i32,
    /// Source column reported by the guest.
    pub column: i32,
}

/// Top-level runtime errors.
///
/// These errors represent failures that can occur while loading a guest
/// module, marshaling values across the boundary and invoking guest code.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A guest memory access was out of bounds.
    #[error("Memory access out of bounds: {0}")]
    Bounds(#[from] BoundsError),

    /// A string or array header in guest memory could not be decoded.
    #[error("Decode failed for {what}: {reason}")]
    Decode {
        /// What was being decoded (e.g. "string length").
        what: String,
        /// Description of the malformed content.
        reason: String,
    },

    /// Reading, compiling or instantiating a module failed.
    #[error("Unable to load module '{module}': {reason}")]
    Load {
        /// Path or name of the module.
        module: String,
        /// Description of the failure.
        reason: String,
    },

    /// A required export is absent from the guest module.
    #[error("Export '{name}' ({kind}) not found")]
    ExportMissing {
        /// Name of the missing export.
        name: String,
        /// Kind of export that was expected (memory, function, allocator).
        kind: String,
    },

    /// Staging memory for host values could not be obtained.
    #[error("Allocation failed: {reason}")]
    Allocation {
        /// Description of the allocation failure.
        reason: String,
    },

    /// The guest called `env.abort`.
    #[error(transparent)]
    GuestAbort(#[from] GuestAbort),

    /// The engine trapped while running guest code.
    #[error("Wasm trap: {message}")]
    GuestTrap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// A host value has no guest representation.
    #[error("Unsupported type: {type_name} has no guest representation")]
    UnsupportedType {
        /// Name of the host value kind.
        type_name: String,
    },

    /// Converted parameters do not match the entry function signature.
    #[error("Signature mismatch calling '{function}': {reason}")]
    SignatureMismatch {
        /// Name of the guest function.
        function: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// An error annotated with the operation that was in progress.
    #[error("{context}: {source}")]
    Context {
        /// What was being processed when the error occurred.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Create a new `Decode` error.
    pub fn decode(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Load` error.
    pub fn load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `ExportMissing` error.
    pub fn export_missing(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::ExportMissing {
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Create a new `Allocation` error.
    pub fn allocation(reason: impl Into<String>) -> Self {
        Self::Allocation {
            reason: reason.into(),
        }
    }

    /// Create a new `GuestTrap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::GuestTrap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `UnsupportedType` error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create a new `SignatureMismatch` error.
    pub fn signature_mismatch(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignatureMismatch {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap this error with a description of the operation in progress.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping every `Context` layer.
    pub fn root_cause(&self) -> &RuntimeError {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns the guest abort if this error was raised by `env.abort`.
    pub fn as_guest_abort(&self) -> Option<&GuestAbort> {
        match self.root_cause() {
            Self::GuestAbort(abort) => Some(abort),
            _ => None,
        }
    }

    /// Returns `true` if the guest aborted through `env.abort`.
    pub fn is_guest_abort(&self) -> bool {
        self.as_guest_abort().is_some()
    }

    /// Returns `true` if the engine trapped.
    pub fn is_trap(&self) -> bool {
        matches!(self.root_cause(), Self::GuestTrap { .. })
    }

    /// Returns `true` if a guest memory access was out of bounds.
    pub fn is_bounds(&self) -> bool {
        matches!(self.root_cause(), Self::Bounds(_))
    }
}

/// Extension trait adding context to fallible results.
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context string.
    fn context(self, context: impl Into<String>) -> Result<T, RuntimeError>;

    /// Wrap the error with a lazily built context string.
    fn with_context<C, F>(self, f: F) -> Result<T, RuntimeError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<RuntimeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, RuntimeError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, RuntimeError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
