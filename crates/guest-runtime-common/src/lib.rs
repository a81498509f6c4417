//! Common types, errors, and configuration for guest-runtime.
//!
//! This crate provides shared functionality used across the guest-runtime workspace:
//! - Error types using `thiserror`, one variant per failure kind of the host/guest boundary
//! - Configuration structures for the engine, execution limits and the guest ABI
//! - The TOML configuration file read by the CLI

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    AbiConfig, ArenaStart, CallingConvention, EngineConfig, ExecutionConfig, RuntimeConfig,
    TraceConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, LogConfig, WatchdogConfig};
pub use error::{BoundsError, GuestAbort, ResultExt, RuntimeError};
