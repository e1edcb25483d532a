//! Typed storage errors.
//!
//! Most fallible paths in vellum return [`eyre::Result`] with message context.
//! The variants here are the errors callers are expected to match on; they are
//! attached to the report chain, so
//! `report.downcast_ref::<StorageError>()` recovers the concrete variant.
//! I/O failures keep their underlying `std::io::Error` in the chain the same
//! way.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// A page number outside the range addressable by the current snapshot or
    /// the mapped capacity. Requests past the end are never translated into
    /// an address.
    #[error("page {page_no} out of bounds (limit {page_count})")]
    PageOutOfBounds { page_no: u64, page_count: u64 },

    /// A `SliceWriter` write would run past the end of its backing buffer.
    /// No byte outside the buffer is modified.
    #[error("key buffer overflow: write needs {requested} bytes, capacity is {capacity}")]
    BufferOverflow { requested: usize, capacity: usize },

    /// A second read-write transaction was requested while one is active and
    /// the caller asked not to block.
    #[error("a write transaction is already active")]
    WriterBusy,

    /// Every reader slot is claimed.
    #[error("too many concurrent read transactions (max {max})")]
    TooManyReaders { max: usize },
}
