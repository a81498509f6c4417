//! Configuration file structures for guest-runtime.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`LogConfig`]: Log filter and output format
//! - [`WatchdogConfig`]: Embedder-side execution timeout

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// fuel_metering = true
/// epoch_interruption = true
///
/// [runtime.execution]
/// max_fuel = 10_000_000
/// max_memory_mb = 64
///
/// [runtime.abi]
/// calling_convention = "pointer_only"
/// allocator_export = "memory.allocate"
/// min_arena_size = 10_000
/// arena_start = "memory_end"
///
/// [runtime.trace]
/// imports = true
///
/// [log]
/// filter = "info,guest_runtime_core=debug"
/// json = false
///
/// [watchdog]
/// timeout_ms = 500
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, ABI, tracing).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Log output configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Watchdog configuration.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Configuration file read");

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "defaults::log_filter")]
    pub filter: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: defaults::log_filter(),
            json: false,
        }
    }
}

/// Watchdog configuration.
///
/// The runtime has no timeout of its own; the embedder interrupts a call
/// that outlives this budget (requires `runtime.engine.epoch_interruption`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WatchdogConfig {
    /// Execution budget in milliseconds, unbounded when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn log_filter() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{ArenaStart, CallingConvention};

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.log.filter, "info");
        assert!(!config.log.json);
        assert!(config.watchdog.timeout_ms.is_none());
        assert!(config.runtime.abi.allocator_export.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [log]
            json = true
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.log.json);
        // Defaults applied
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.runtime.execution.max_memory_mb, 128);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            fuel_metering = true
            epoch_interruption = true

            [runtime.execution]
            max_fuel = 5_000_000
            max_memory_mb = 64

            [runtime.abi]
            calling_convention = "pointer_with_length"
            allocator_export = "memory.allocate"
            min_arena_size = 4096
            arena_start = "memory_end"

            [runtime.trace]
            imports = true

            [log]
            filter = "debug"

            [watchdog]
            timeout_ms = 250
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.runtime.engine.fuel_metering);
        assert!(config.runtime.engine.epoch_interruption);
        assert_eq!(config.runtime.execution.max_fuel, 5_000_000);
        assert_eq!(config.runtime.execution.max_memory_mb, 64);
        assert_eq!(
            config.runtime.abi.calling_convention,
            CallingConvention::PointerWithLength
        );
        assert_eq!(
            config.runtime.abi.allocator_export.as_deref(),
            Some("memory.allocate")
        );
        assert_eq!(config.runtime.abi.min_arena_size, 4096);
        assert_eq!(config.runtime.abi.arena_start, ArenaStart::MemoryEnd);
        assert!(config.runtime.trace.imports);
        assert_eq!(config.log.filter, "debug");
        assert_eq!(config.watchdog.timeout_ms, Some(250));
    }

    #[rstest]
    #[case("this is not valid toml [")]
    #[case("[runtime.abi]\ncalling_convention = \"sideways\"")]
    #[case("[watchdog]\ntimeout_ms = \"soon\"")]
    fn test_parse_invalid_toml(#[case] content: &str) {
        let result = ConfigFile::from_toml(content);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
