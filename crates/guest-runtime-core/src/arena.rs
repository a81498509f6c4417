//! Per-call staging region for host values written into guest memory.
//!
//! An [`Arena`] is a bump cursor over memory the guest does not use (or has
//! handed over through its allocator). Allocations are monotonic; nothing is
//! freed, and the arena is dropped together with the instantiation at the end
//! of the call.

use tracing::{debug, trace};
use wasmtime::{AsContextMut, TypedFunc};

use guest_runtime_common::RuntimeError;

use crate::memory::{MemoryView, WASM_PAGE_SIZE};

/// Smallest region requested whenever the arena grows.
pub const MIN_ARENA_SIZE: usize = 10_000;

/// Bump allocator for one invocation.
pub struct Arena {
    start: i32,
    free_size: usize,
    min_size: usize,
    allocator: Option<TypedFunc<i32, i32>>,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("start", &self.start)
            .field("free_size", &self.free_size)
            .field("min_size", &self.min_size)
            .field("allocator", &self.allocator.is_some())
            .finish()
    }
}

impl Arena {
    /// Create an arena over `free_size` bytes starting at `start`.
    pub fn new(start: i32, free_size: usize) -> Self {
        Self {
            start,
            free_size,
            min_size: MIN_ARENA_SIZE,
            allocator: None,
        }
    }

    /// Grow through a guest-exported `(size) -> ptr` allocator instead of
    /// growing linear memory directly.
    #[must_use]
    pub fn with_allocator(mut self, allocator: TypedFunc<i32, i32>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Override the minimum growth request.
    #[must_use]
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Current cursor position.
    pub fn start(&self) -> i32 {
        self.start
    }

    /// Remaining capacity before the next growth.
    pub fn free_size(&self) -> usize {
        self.free_size
    }

    /// Copy `bytes` into the arena and return the pointer they were written at.
    ///
    /// # Errors
    ///
    /// Returns an allocation error when the arena cannot grow, or a bounds
    /// error if the staged region is not backed by memory.
    pub fn write(
        &mut self,
        mut store: impl AsContextMut,
        view: &MemoryView,
        bytes: &[u8],
    ) -> Result<i32, RuntimeError> {
        if bytes.is_empty() {
            return Ok(self.start);
        }
        if bytes.len() > self.free_size {
            self.grow(&mut store, view, bytes.len())?;
        }

        let ptr = self.start;
        view.write_segment(&mut store, ptr, bytes)?;

        let advance = i32::try_from(bytes.len())
            .map_err(|_| RuntimeError::allocation(format!("{} bytes exceed the guest address space", bytes.len())))?;
        self.start = ptr
            .checked_add(advance)
            .ok_or_else(|| RuntimeError::allocation("arena cursor overflowed the guest address space"))?;
        self.free_size -= bytes.len();

        trace!(ptr, len = bytes.len(), free_size = self.free_size, "arena write");
        Ok(ptr)
    }

    /// Obtain a fresh region of at least `max(requested, min_size)` bytes.
    fn grow(
        &mut self,
        mut store: impl AsContextMut,
        view: &MemoryView,
        requested: usize,
    ) -> Result<(), RuntimeError> {
        let size = requested.max(self.min_size);

        let (start, free_size) = match &self.allocator {
            Some(allocator) => {
                let word = i32::try_from(size)
                    .map_err(|_| RuntimeError::allocation(format!("request of {size} bytes is too large")))?;
                let ptr = allocator
                    .call(&mut store, word)
                    .map_err(|e| RuntimeError::allocation(format!("guest allocator failed: {e}")))?;
                if ptr < 0 {
                    return Err(RuntimeError::allocation(format!(
                        "guest allocator returned invalid pointer {ptr}"
                    )));
                }
                (ptr, size)
            }
            None => {
                let pages = size.div_ceil(WASM_PAGE_SIZE);
                let previous = view.grow(&mut store, pages as u64)?;
                let base = usize::try_from(previous)
                    .ok()
                    .and_then(|p| p.checked_mul(WASM_PAGE_SIZE))
                    .and_then(|b| i32::try_from(b).ok())
                    .ok_or_else(|| RuntimeError::allocation("grown memory is beyond the guest address space"))?;
                (base, pages * WASM_PAGE_SIZE)
            }
        };

        debug!(
            requested,
            start,
            free_size,
            via_allocator = self.allocator.is_some(),
            "arena grown"
        );

        self.start = start;
        self.free_size = free_size;
        Ok(())
    }
}
