//! # vellum: a memory-mapped, copy-on-write page store
//!
//! vellum is the storage substrate of a document database: a single backing
//! file partitioned into fixed-size pages, memory-mapped for zero-copy
//! access, mutated through transactions with snapshot isolation, and
//! addressed by ordered binary keys. Everything above it (document models,
//! indexes, wire protocols) is somebody else's layer; vellum only decides
//! how pages are mapped, allocated, mutated atomically, and how keys are
//! encoded so that byte order equals logical order.
//!
//! ## Quick Start
//!
//! ```ignore
//! use vellum::{SliceWriter, Store};
//!
//! let store = Store::create("data.vel")?;
//!
//! let mut tx = store.begin_write()?;
//! let page_no = {
//!     let mut page = tx.allocate_pages(1)?;
//!     let mut key = SliceWriter::new(16);
//!     key.write_str("user-42")?;
//!     key.write_i32(42)?;
//!     let len = key.position();
//!     page.payload_mut()[..len].copy_from_slice(key.create_slice(len)?.as_bytes());
//!     page.header()?.page_number()
//! };
//! tx.commit()?;
//!
//! let reader = store.begin_read()?;
//! let page = reader.get_page(page_no)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │         Store (open / begin)        │
//! ├───────────────────┬─────────────────┤
//! │ WriteTransaction  │ ReadTransaction │   snapshot isolation
//! ├───────────────────┴─────────────────┤
//! │  Pager · meta slots · free list     │   allocation, atomic publish
//! ├─────────────────────────────────────┤
//! │  Shared mapping (memmap2, 4K pages) │   zero-copy page views
//! └─────────────────────────────────────┘
//!
//!        SliceWriter ──> Slice            ordered binary keys (big-endian)
//! ```
//!
//! ## Guarantees
//!
//! - **Atomicity**: a commit publishes all of its pages or none of them;
//!   crash recovery re-adopts the last fully published state via the
//!   ping-pong meta slots.
//! - **Isolation**: one writer at a time; any number of readers, each pinned
//!   to the snapshot in effect at its begin. Writers stage privately and
//!   never rewrite a committed page in place.
//! - **Bounds**: every page access is validated against the snapshot's
//!   high-water mark and the mapped capacity; key encoding is validated
//!   against its buffer. Violations are typed errors, never wild addresses.
//!
//! ## Module Overview
//!
//! - [`Store`]: the top-level handle over one backing file
//! - [`mvcc`]: transactions, snapshots, reader accounting
//! - [`storage`]: pager, mapping, page layout, meta slots, free list
//! - [`encoding`]: [`Slice`] keys and the [`SliceWriter`] cursor

pub mod encoding;
pub mod mvcc;
pub mod storage;

mod error;
mod store;

pub use encoding::{Slice, SliceWriter};
pub use error::StorageError;
pub use mvcc::{ReadTransaction, WriteTransaction};
pub use storage::{
    validate_page, Page, PageHeader, PageMut, PageType, FIRST_DATA_PAGE, PAGE_HEADER_SIZE,
    PAGE_PAYLOAD_SIZE, PAGE_SIZE,
};
pub use store::Store;
