//! # Pager
//!
//! The pager owns the backing file and its current [`Mapping`]. It is the
//! sole translator between page numbers and file offsets, and the sole
//! authority for growing the store.
//!
//! ## Growth Policy
//!
//! The file is extended lazily, at commit time, to cover the committing
//! transaction's allocation high-water mark, rounded up to
//! `GROW_CHUNK_PAGES` so a burst of small commits does not remap over and
//! over. Growth replaces the mapping wholesale: the new mapping is swapped in
//! behind an `Arc`, and transactions that started on the old mapping keep it
//! alive until they finish. A request for a page beyond the mapped capacity
//! is a hard [`StorageError::PageOutOfBounds`](crate::StorageError); it is
//! never translated into an address.
//!
//! ## Teardown
//!
//! Dropping the pager drops the current mapping; retired mappings unmap when
//! the last transaction referencing them drops. No page view can outlive the
//! transaction it came from, so no view can outlive its mapping.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use log::debug;

use super::{
    select_live_slot, Mapping, MetaHeader, FIRST_DATA_PAGE, GROW_CHUNK_PAGES, INITIAL_PAGE_COUNT,
    META_PAGE_COUNT, PAGE_SIZE,
};

pub struct Pager {
    file: File,
    path: PathBuf,
    mapping: Arc<Mapping>,
}

impl Pager {
    /// Create a fresh store file at `path` and publish an empty first state
    /// (sequence 1, no data pages, empty free list) into meta slot 0.
    pub(crate) fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        let file_size = INITIAL_PAGE_COUNT * PAGE_SIZE as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to size store file to {} bytes", file_size))?;

        let mapping = Arc::new(Mapping::map(&file)?);

        let pager = Self {
            file,
            path: path.to_path_buf(),
            mapping,
        };

        pager.publish_meta(0, &MetaHeader::new(1, FIRST_DATA_PAGE, 0, 0))?;

        debug!(
            "created store '{}' ({} pages)",
            pager.path.display(),
            INITIAL_PAGE_COUNT
        );
        Ok(pager)
    }

    /// Open an existing store file and verify it carries a usable meta slot.
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let mapping = Arc::new(Mapping::map(&file)?);
        ensure!(
            mapping.page_count() >= META_PAGE_COUNT,
            "store file '{}' is too small to hold meta pages",
            path.display()
        );

        let pager = Self {
            file,
            path: path.to_path_buf(),
            mapping,
        };

        let (meta, slot) = pager.read_meta()?;
        ensure!(
            meta.next_page() >= FIRST_DATA_PAGE && meta.next_page() <= pager.page_count(),
            "store file '{}': committed high-water mark {} outside mapped capacity {}",
            path.display(),
            meta.next_page(),
            pager.page_count()
        );

        debug!(
            "opened store '{}' (seq={}, next_page={}, slot={})",
            pager.path.display(),
            meta.sequence(),
            meta.next_page(),
            slot
        );
        Ok(pager)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The mapping currently covering the whole file. Transactions clone the
    /// `Arc` so a later grow cannot pull the region out from under them.
    pub(crate) fn mapping(&self) -> Arc<Mapping> {
        Arc::clone(&self.mapping)
    }

    pub(crate) fn page_count(&self) -> u64 {
        self.mapping.page_count()
    }

    /// Ensure the file and mapping cover at least `min_pages` pages.
    pub(crate) fn grow(&mut self, min_pages: u64) -> Result<()> {
        if min_pages <= self.page_count() {
            return Ok(());
        }

        let new_count = min_pages
            .checked_next_multiple_of(GROW_CHUNK_PAGES)
            .unwrap_or(min_pages);
        let new_size = new_count * PAGE_SIZE as u64;

        // Flush before remapping so nothing already staged into the old
        // mapping can be lost if the process dies mid-grow.
        self.mapping.flush()?;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend store file to {} bytes", new_size))?;

        self.mapping = Arc::new(Mapping::map(&self.file)?);

        debug!(
            "grew store '{}' to {} pages",
            self.path.display(),
            new_count
        );
        Ok(())
    }

    /// Parse both meta slots and adopt the live one.
    pub(crate) fn read_meta(&self) -> Result<(MetaHeader, usize)> {
        let slot0 = self.mapping.page(0)?;
        let slot1 = self.mapping.page(1)?;
        select_live_slot(slot0, slot1)
    }

    /// Write a sealed meta header into `slot` and flush that page. The caller
    /// chooses the slot that is not currently live.
    pub(crate) fn publish_meta(&self, slot: usize, meta: &MetaHeader) -> Result<()> {
        ensure!(slot < META_PAGE_COUNT as usize, "invalid meta slot {}", slot);

        let mut page = vec![0u8; PAGE_SIZE];
        meta.write_to(&mut page)?;

        self.mapping.write_run(slot as u64, &page)?;
        self.mapping.flush_page(slot as u64)
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("path", &self.path)
            .field("page_count", &self.page_count())
            .finish()
    }
}
