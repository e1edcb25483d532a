//! # Transactions and Snapshot Isolation
//!
//! This module implements the atomicity and isolation boundary of vellum:
//! a Single-Writer / Multi-Reader model where readers never block and never
//! observe a partially committed writer.
//!
//! ## Transaction Lifecycle
//!
//! ```text
//! begin_read() ──> ReadTransaction ──────────────> dropped (slot released)
//!
//! begin_write() ─> WriteTransaction ─> commit() ─> Committed (published)
//!                        │
//!                        └─> rollback() / drop ──> discarded (no trace)
//! ```
//!
//! Terminal states are unrepresentable rather than checked: `commit` and
//! `rollback` consume the transaction, so no operation can be issued after
//! either.
//!
//! ## Isolation Model
//!
//! A read transaction captures, atomically under the store lock, the
//! committed state in effect at its begin: the commit sequence, the
//! allocation high-water mark, and the mapping covering the file. Everything
//! it can address through that snapshot is immutable for as long as it lives,
//! because the writer follows two rules:
//!
//! 1. **Private staging**: new and shadowed pages live in heap buffers owned
//!    by the write transaction. The shared mapping is untouched until commit.
//! 2. **Copy-on-write publication**: commit copies staged buffers only into
//!    pages beyond every snapshot's high-water mark, or into pages whose
//!    free sequence is covered by the oldest live reader snapshot.
//!
//! Publishing is a meta-slot flip (see `storage::meta`), so readers that
//! begin after a commit see all of it and readers that began before see none
//! of it.
//!
//! ## Single-Writer Discipline
//!
//! At most one write transaction exists at a time, enforced by a mutex held
//! for the transaction's lifetime. `begin_write` blocks until the writer
//! lock is free; `try_begin_write` fails fast with
//! [`StorageError::WriterBusy`](crate::StorageError::WriterBusy). Readers
//! take no part in that lock.
//!
//! ## Reader Accounting
//!
//! Active readers are tracked in a fixed slot array of snapshot sequences;
//! the minimum over the occupied slots gates free-page reuse. The array is
//! bounded, so reader registration can fail with
//! [`StorageError::TooManyReaders`](crate::StorageError::TooManyReaders)
//! instead of growing without limit.

pub(crate) mod readers;
mod transaction;

pub(crate) use readers::ReaderTable;
pub use transaction::{ReadTransaction, WriteTransaction};
