//! # Storage Module
//!
//! This module provides the page-oriented persistence substrate of vellum:
//! a single backing file partitioned into fixed-size pages, memory-mapped
//! into the process address space and accessed zero-copy.
//!
//! ## Architecture Overview
//!
//! ```text
//! +------------------------------------+
//! |        Store / Transactions        |   (src/store.rs, src/txn)
//! +------------------------------------+
//! |   Pager (file + mapping, growth)   |   pager.rs
//! +-------------------+----------------+
//! |  Meta slots (0,1) |  Free list     |   meta.rs, freelist.rs
//! +-------------------+----------------+
//! |     Mapping (raw shared mmap)      |   mapping.rs
//! +------------------------------------+
//! |     Page views and header layout   |   page.rs
//! +------------------------------------+
//! ```
//!
//! ## File Layout
//!
//! The backing file is a flat array of 4 KiB pages:
//!
//! ```text
//! Offset 0:       Page 0   meta slot A
//! Offset 4096:    Page 1   meta slot B
//! Offset 8192:    Page 2   first data page
//! ...
//! ```
//!
//! Pages 0 and 1 are ping-pong meta slots. A commit writes the slot that is
//! *not* currently live, so a torn meta write can never destroy the last
//! published state; open picks the valid slot with the highest commit
//! sequence.
//!
//! ## Copy-on-Write Discipline
//!
//! Committed page contents are never modified in place. Writers stage new and
//! shadowed pages in private buffers and copy them into the mapping only
//! during commit, at page numbers no live reader snapshot can address. This
//! single invariant is what makes zero-copy reader views sound (see
//! `mapping.rs` for the full safety argument).
//!
//! ## Page Size
//!
//! All storage uses 4 KiB (4096 byte) pages. The size is a compile-time
//! constant for the lifetime of a store file and is recorded in the meta
//! header so a mismatched build refuses to open the file.

mod mapping;
mod meta;
mod page;
mod pager;

pub(crate) mod freelist;

pub(crate) use mapping::Mapping;
pub(crate) use meta::{select_live_slot, MetaHeader};
pub use page::{validate_page, Page, PageHeader, PageMut, PageType};
pub use pager::Pager;

/// Fixed size of every page in the backing store.
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the start of every data page for [`PageHeader`].
pub const PAGE_HEADER_SIZE: usize = 16;

/// Payload capacity of a single data page.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Pages 0 and 1 hold the meta slots.
pub(crate) const META_PAGE_COUNT: u64 = 2;

/// First page number handed out to consumers.
pub const FIRST_DATA_PAGE: u64 = META_PAGE_COUNT;

/// Growth granularity: the file is extended to a multiple of this many pages
/// (1 MiB with 4 KiB pages), so repeated small commits do not remap on every
/// allocation.
pub(crate) const GROW_CHUNK_PAGES: u64 = 256;

/// Initial capacity of a freshly created store file.
pub(crate) const INITIAL_PAGE_COUNT: u64 = 16;
