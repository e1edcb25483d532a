//! # Store
//!
//! The top-level handle over one backing file. A `Store` owns the pager, the
//! last-committed state, the single-writer lock, and the reader table; every
//! transaction is opened through it.
//!
//! ## Opening
//!
//! `Store::create` lays down a fresh file with an empty published state;
//! `Store::open` adopts the live meta slot of an existing file and reloads
//! the persisted free list from its trunk chain. Both validate the file
//! shape before any page is handed out, so a truncated or foreign file is
//! rejected up front rather than surfacing as a bad page read later.
//!
//! ## Usage
//!
//! ```
//! use vellum::Store;
//!
//! # fn main() -> eyre::Result<()> {
//! # let dir = tempfile::tempdir().unwrap();
//! let store = Store::create(dir.path().join("data.vel"))?;
//!
//! let mut tx = store.begin_write()?;
//! let page_no = {
//!     let mut page = tx.allocate_pages(1)?;
//!     page.payload_mut()[0] = 42;
//!     page.header()?.page_number()
//! };
//! tx.commit()?;
//!
//! let reader = store.begin_read()?;
//! assert_eq!(reader.get_page(page_no)?.payload()[0], 42);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use eyre::{ensure, Result};
use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::mvcc::{ReadTransaction, ReaderTable, WriteTransaction};
use crate::storage::freelist::FreeList;
use crate::storage::{
    Pager, PageHeader, PageType, FIRST_DATA_PAGE, PAGE_HEADER_SIZE,
};

/// The last fully published state: what a new snapshot observes.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub(crate) sequence: u64,
    pub(crate) next_page: u64,
    pub(crate) freelist: FreeList,
    pub(crate) trunk_pages: Vec<u64>,
}

pub(crate) struct StoreInner {
    pub(crate) pager: Pager,
    pub(crate) committed: Committed,
    pub(crate) live_slot: usize,
}

pub struct Store {
    inner: Mutex<StoreInner>,
    readers: ReaderTable,
    writer: Mutex<()>,
}

impl Store {
    /// Create a new store file at `path`. An existing file is truncated.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Pager::create(path)?;

        Ok(Self {
            inner: Mutex::new(StoreInner {
                pager,
                committed: Committed {
                    sequence: 1,
                    next_page: FIRST_DATA_PAGE,
                    freelist: FreeList::new(),
                    trunk_pages: Vec::new(),
                },
                live_slot: 0,
            }),
            readers: ReaderTable::new(),
            writer: Mutex::new(()),
        })
    }

    /// Open an existing store file, adopting its live meta slot.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Pager::open(path)?;
        let (meta, live_slot) = pager.read_meta()?;

        let (freelist, trunk_pages) = load_freelist(&pager, &meta)?;
        ensure!(
            freelist.len() as u64 == meta.freelist_len(),
            "free list is corrupt: trunk chain holds {} entries, meta records {}",
            freelist.len(),
            meta.freelist_len()
        );

        debug!(
            "loaded free list: {} entries in {} trunk pages",
            freelist.len(),
            trunk_pages.len()
        );

        Ok(Self {
            inner: Mutex::new(StoreInner {
                pager,
                committed: Committed {
                    sequence: meta.sequence(),
                    next_page: meta.next_page(),
                    freelist,
                    trunk_pages,
                },
                live_slot,
            }),
            readers: ReaderTable::new(),
            writer: Mutex::new(()),
        })
    }

    /// Open a read-only transaction on the current committed snapshot.
    ///
    /// Fails with [`StorageError::TooManyReaders`](crate::StorageError) when
    /// every reader slot is claimed.
    pub fn begin_read(&self) -> Result<ReadTransaction<'_>> {
        // Snapshot capture and reader registration happen under one lock so
        // a concurrent commit can neither be half-seen nor free pages out
        // from under a reader it has not yet observed.
        let inner = self.inner.lock();
        let slot_idx = self.readers.register(inner.committed.sequence)?;
        Ok(ReadTransaction::new(
            self,
            inner.pager.mapping(),
            inner.committed.sequence,
            inner.committed.next_page,
            slot_idx,
        ))
    }

    /// Open the read-write transaction, blocking while another is active.
    pub fn begin_write(&self) -> Result<WriteTransaction<'_>> {
        let guard = self.writer.lock();
        Ok(self.start_write(guard))
    }

    /// Open the read-write transaction without blocking; fails with
    /// [`StorageError::WriterBusy`](crate::StorageError) when one is active.
    pub fn try_begin_write(&self) -> Result<WriteTransaction<'_>> {
        match self.writer.try_lock() {
            Some(guard) => Ok(self.start_write(guard)),
            None => Err(StorageError::WriterBusy.into()),
        }
    }

    fn start_write<'s>(&'s self, guard: MutexGuard<'s, ()>) -> WriteTransaction<'s> {
        let inner = self.inner.lock();
        WriteTransaction::new(self, guard, inner.pager.mapping(), &inner.committed)
    }

    /// Commit sequence of the last published state.
    pub fn committed_sequence(&self) -> u64 {
        self.inner.lock().committed.sequence
    }

    /// Number of free pages available for reuse (subject to reader gating).
    pub fn free_page_count(&self) -> u64 {
        self.inner.lock().committed.freelist.len() as u64
    }

    pub(crate) fn inner_lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock()
    }

    pub(crate) fn readers(&self) -> &ReaderTable {
        &self.readers
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("path", &inner.pager.path())
            .field("sequence", &inner.committed.sequence)
            .field("next_page", &inner.committed.next_page)
            .finish()
    }
}

/// Walk the trunk chain recorded in `meta` and rebuild the in-memory free
/// list. Returns the entries and the trunk pages themselves (the next commit
/// recycles them).
fn load_freelist(
    pager: &Pager,
    meta: &crate::storage::MetaHeader,
) -> Result<(FreeList, Vec<u64>)> {
    let mapping = pager.mapping();
    let mut freelist = FreeList::new();
    let mut trunk_pages = Vec::new();
    let mut next_trunk = meta.freelist_head();

    while next_trunk != 0 {
        ensure!(
            next_trunk >= FIRST_DATA_PAGE && next_trunk < meta.next_page(),
            "free-list trunk {} lies outside the committed range",
            next_trunk
        );
        ensure!(
            (trunk_pages.len() as u64) < meta.next_page(),
            "free-list trunk chain does not terminate"
        );

        let page = mapping.page(next_trunk)?;
        let header = PageHeader::from_bytes(page)?;
        ensure!(
            header.page_number() == next_trunk && header.page_type() == PageType::FreeList,
            "page {} is not a free-list trunk",
            next_trunk
        );

        let (next, entries) = crate::storage::freelist::read_trunk(&page[PAGE_HEADER_SIZE..])?;
        freelist.extend(entries);
        trunk_pages.push(next_trunk);
        next_trunk = next;
    }

    Ok((freelist, trunk_pages))
}
