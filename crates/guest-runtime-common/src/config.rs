//! Configuration structures for guest-runtime.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (fuel, epoch interruption)
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, memory)
//! - [`AbiConfig`]: The guest calling convention and staging strategy
//! - [`TraceConfig`]: Host import tracing

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the runtime.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Guest ABI configuration.
    #[serde(default)]
    pub abi: AbiConfig,

    /// Host import tracing configuration.
    #[serde(default)]
    pub trace: TraceConfig,
}

/// Wasmtime engine configuration.
///
/// These settings are fixed when the engine is created and apply to
/// every module compiled with it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable fuel metering.
    ///
    /// When enabled, every call receives `execution.max_fuel` units and
    /// traps with `OutOfFuel` once they are consumed.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Enable epoch-based interruption.
    ///
    /// The runtime itself never increments the epoch; an embedder watchdog
    /// does so to interrupt a call that runs for too long.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel_metering: defaults::fuel_metering(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per call.
    ///
    /// Only effective when `engine.fuel_metering` is enabled.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory in megabytes.
    ///
    /// Growth beyond this limit is refused, which the arena reports as
    /// an allocation failure.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl ExecutionConfig {
    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// How host-staged references are passed to guest functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    /// Each string or byte parameter is passed as a single pointer word.
    #[default]
    PointerOnly,
    /// Each string or byte parameter is followed by its encoded size in bytes.
    PointerWithLength,
}

/// Where the staging arena of a call starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaStart {
    /// Offset 0, with the whole current memory as free capacity.
    #[default]
    Origin,
    /// End of the current memory, with no free capacity.
    ///
    /// The first write always grows, so data already in guest memory is
    /// never overwritten.
    MemoryEnd,
}

/// Guest ABI configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbiConfig {
    /// Parameter passing convention for staged references.
    #[serde(default)]
    pub calling_convention: CallingConvention,

    /// Name of a guest export with signature `(size: i32) -> (ptr: i32)`.
    ///
    /// When unset the arena grows linear memory itself.
    #[serde(default)]
    pub allocator_export: Option<String>,

    /// Minimum number of bytes requested whenever the arena grows.
    #[serde(default = "defaults::min_arena_size")]
    pub min_arena_size: usize,

    /// Placement of the initial arena.
    #[serde(default)]
    pub arena_start: ArenaStart,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            calling_convention: CallingConvention::default(),
            allocator_export: None,
            min_arena_size: defaults::min_arena_size(),
            arena_start: ArenaStart::default(),
        }
    }
}

/// Host import tracing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TraceConfig {
    /// Trace every host import invocation with its arguments and result.
    #[serde(default)]
    pub imports: bool,
}

/// Default value functions for serde.
mod defaults {
    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn epoch_interruption() -> bool {
        false
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub const fn min_arena_size() -> usize {
        10_000
    }
}
