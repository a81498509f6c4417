//! Core Wasmtime runtime for guest-runtime.
//!
//! This crate provides host/guest execution and value marshaling:
//! - [`WasmEngine`]: Configured Wasmtime engine (fuel, epoch interruption)
//! - [`CompiledModule`]: Compiled WebAssembly module wrapper
//! - [`MemoryView`]: Bounds-checked access to guest linear memory
//! - [`Arena`]: Per-call staging of host values in guest memory
//! - [`codec`]: Heap layouts, parameter conversion and result decoding
//! - [`HostContext`]: Per-invocation state reachable from host imports
//! - [`CallRecorder`] and [`CallTracer`]: Host import observability
//! - [`Runtime`]: One blocking compile → instantiate → call sequence per execution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 WasmEngine + Linker                     │
//! │  (Shared across executions)                             │
//! │  - Host imports (see guest-runtime-host)                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<HostContext> + Instance                │
//! │  (Per-execution, isolated)                              │
//! │  - MemoryView over the exported "memory"                │
//! │  - Arena staging parameters                             │
//! │  - Fuel and memory limits                               │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Value codec                         │
//! │  NativeValue ⇄ guest words and heap layouts             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod arena;
pub mod codec;
pub mod dispatcher;
pub mod engine;
pub mod memory;
pub mod module;
pub mod recorder;
pub mod store;
pub mod value;

pub use arena::{Arena, MIN_ARENA_SIZE};
pub use codec::{ArrayLayout, ResultDecoding, ResultLocator};
pub use dispatcher::Runtime;
pub use engine::WasmEngine;
pub use memory::{MemoryView, WASM_PAGE_SIZE};
pub use module::CompiledModule;
pub use recorder::{CallRecord, CallRecorder, CallTracer, TracingCallTracer};
pub use store::{BufferedSink, HostContext, OutputSink, StdoutSink, create_store};
pub use value::{ElementKind, GuestValue, NativeValue, ValSet};
