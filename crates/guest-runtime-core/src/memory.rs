//! Bounds-checked access to guest linear memory.
//!
//! [`MemoryView`] wraps the guest's exported `memory`. It never caches the
//! underlying byte buffer: every access takes the store and re-fetches the
//! live buffer, so pointers stay valid across memory growth as long as the
//! instantiation is alive.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};
use wasmtime::{AsContext, AsContextMut, Memory};

use guest_runtime_common::{BoundsError, RuntimeError};

/// Size of a WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: usize = 65_536;

/// Accessor over one instantiation's linear memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryView {
    memory: Memory,
}

impl MemoryView {
    /// Bind a view to a guest memory.
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Get the underlying Wasmtime memory.
    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// Current size of the memory in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(&store)
    }

    /// Current size of the memory in pages.
    pub fn pages(&self, store: impl AsContext) -> u64 {
        self.memory.size(&store)
    }

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// Fails when `offset` is negative or not inside the buffer, or when the
    /// segment runs past its end. Nothing is returned on failure.
    pub fn read_segment(
        &self,
        store: impl AsContext,
        offset: i32,
        length: i32,
    ) -> Result<Vec<u8>, BoundsError> {
        let data = self.memory.data(&store);
        let range = checked_range(data.len(), i64::from(offset), i64::from(length))?;
        Ok(data[range].to_vec())
    }

    /// Read a little-endian `i32` at `offset`.
    pub fn read_i32(&self, store: impl AsContext, offset: i32) -> Result<i32, BoundsError> {
        let bytes = self.read_segment(store, offset, 4)?;
        Ok(LittleEndian::read_i32(&bytes))
    }

    /// Read a little-endian `u32` at `offset`.
    pub fn read_u32(&self, store: impl AsContext, offset: i32) -> Result<u32, BoundsError> {
        let bytes = self.read_segment(store, offset, 4)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    /// Read a little-endian `i64` at `offset`.
    pub fn read_i64(&self, store: impl AsContext, offset: i32) -> Result<i64, BoundsError> {
        let bytes = self.read_segment(store, offset, 8)?;
        Ok(LittleEndian::read_i64(&bytes))
    }

    /// Copy `bytes` into memory starting at `offset`.
    ///
    /// The caller must own the target range (normally through the arena).
    /// The buffer is left untouched when the range is out of bounds.
    pub fn write_segment(
        &self,
        mut store: impl AsContextMut,
        offset: i32,
        bytes: &[u8],
    ) -> Result<(), BoundsError> {
        let data = self.memory.data_mut(&mut store);
        let length = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        let range = checked_range(data.len(), i64::from(offset), length)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Grow the memory by `pages` pages, returning the previous size in pages.
    ///
    /// # Errors
    ///
    /// Returns an allocation error when the engine or the store limiter
    /// refuses the growth.
    pub fn grow(&self, store: impl AsContextMut, pages: u64) -> Result<u64, RuntimeError> {
        self.memory
            .grow(store, pages)
            .map_err(|e| RuntimeError::allocation(format!("unable to grow memory by {pages} pages: {e}")))
    }

    /// Log a memory segment as hex for diagnostics.
    ///
    /// Out-of-bounds segments are reported as a warning instead of failing.
    pub fn log_segment(&self, store: impl AsContext, label: &str, offset: i32, length: i32) {
        match self.read_segment(store, offset, length) {
            Ok(bytes) => debug!(label, offset, length, bytes = %hex::encode(&bytes), "memory segment"),
            Err(e) => warn!(label, offset, length, error = %e, "unable to obtain memory segment"),
        }
    }
}

/// Validate a segment against a buffer of `memory_size` bytes.
fn checked_range(
    memory_size: usize,
    offset: i64,
    length: i64,
) -> Result<std::ops::Range<usize>, BoundsError> {
    let err = BoundsError {
        offset,
        length,
        memory_size,
    };

    let size = i64::try_from(memory_size).unwrap_or(i64::MAX);
    if offset < 0 || length < 0 || offset >= size {
        return Err(err);
    }

    let end = offset.checked_add(length).ok_or_else(|| err.clone())?;
    if end > size {
        return Err(err);
    }

    let start = usize::try_from(offset).map_err(|_| err.clone())?;
    let end = usize::try_from(end).map_err(|_| err)?;
    Ok(start..end)
}
