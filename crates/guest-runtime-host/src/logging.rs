//! Forwarding of guest log messages to `tracing`.

use std::fmt;

use tracing::{debug, error, info, warn};

/// Severity of a guest log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestLogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for GuestLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestLogLevel::Error => write!(f, "ERROR"),
            GuestLogLevel::Warning => write!(f, "WARN"),
            GuestLogLevel::Info => write!(f, "INFO"),
            GuestLogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Convert the guest's numeric log level.
///
/// 0 is critical and 1 error, both logged as errors; values past 3 are debug.
pub fn level_from_i32(level: i32) -> GuestLogLevel {
    match level {
        i32::MIN..=1 => GuestLogLevel::Error,
        2 => GuestLogLevel::Warning,
        3 => GuestLogLevel::Info,
        _ => GuestLogLevel::Debug,
    }
}

/// Emit a guest message through `tracing`.
pub fn forward(invocation_id: &str, level: GuestLogLevel, message: &str) {
    match level {
        GuestLogLevel::Debug => debug!(invocation_id, guest_log = true, "{}", message),
        GuestLogLevel::Info => info!(invocation_id, guest_log = true, "{}", message),
        GuestLogLevel::Warning => warn!(invocation_id, guest_log = true, "{}", message),
        GuestLogLevel::Error => error!(invocation_id, guest_log = true, "{}", message),
    }
}
