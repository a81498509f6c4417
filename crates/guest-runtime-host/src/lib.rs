//! Host imports for guest-runtime.
//!
//! This crate provides the host-side functions a guest module may import,
//! and wires them into a Wasmtime linker.
//!
//! # Namespaces
//!
//! - [`env`]: `abort` (structured guest abort) and `println`
//! - [`index`]: `log.log` plus placeholder entries returning zero
//!
//! # Usage
//!
//! ```ignore
//! use guest_runtime_common::RuntimeConfig;
//! use guest_runtime_core::WasmEngine;
//! use guest_runtime_host::create_runtime;
//!
//! let config = RuntimeConfig::default();
//! let engine = WasmEngine::new(&config.engine)?;
//! let runtime = create_runtime(engine, &config, None)?;
//! ```

pub mod env;
pub mod index;
pub mod logging;
pub mod registry;

pub use logging::{GuestLogLevel, level_from_i32};
pub use registry::{ImportDescriptor, ImportFn, ImportRegistry, create_linker, create_runtime};
