//! # Shared Memory Mapping
//!
//! This module implements [`Mapping`], the raw memory-mapped view of the
//! backing file. It is the only place in vellum that touches mapped memory
//! directly; everything above it deals in validated page numbers.
//!
//! ## Design Philosophy
//!
//! Traditional engines copy page data between kernel buffers and a user-space
//! page cache. Memory-mapped I/O eliminates that copy by mapping the file
//! directly into the process address space and letting the OS page cache do
//! the caching.
//!
//! ## Safety Model
//!
//! A mapping is shared between one writer and any number of concurrent
//! readers, so the borrow checker alone cannot rule out aliasing. Instead the
//! mapping is handled as a raw region (`memmap2::MmapRaw`) and safety rests
//! on two invariants maintained by the transaction layer:
//!
//! 1. **Snapshot bounds**: a reader only dereferences pages below its
//!    snapshot's allocation high-water mark, and only pages its snapshot's
//!    free list does not permit reusing.
//! 2. **Copy-on-write publication**: the single writer copies staged buffers
//!    into the mapping only during commit, and only at page numbers either
//!    beyond every snapshot's high-water mark or freed earlier than every
//!    live snapshot. Committed page bytes are never rewritten while any view
//!    of them can exist.
//!
//! Writer and reader therefore never touch the same bytes concurrently, even
//! though both hold the same mapping.
//!
//! ## Growth and Remapping
//!
//! Growing the file invalidates the old mapping address range, so `Mapping`
//! is never grown in place. The pager maps the extended file afresh and swaps
//! the new mapping in behind an `Arc`; transactions that started on the old
//! mapping keep their `Arc` clone alive until they finish, and the old region
//! is unmapped when the last of them drops. Both mappings observe the same
//! file (`MAP_SHARED`), so data written through one is visible through the
//! other.
//!
//! ## Platform Behavior
//!
//! - Linux/macOS: `mmap` with `MAP_SHARED`; `msync` backs [`Mapping::flush`]
//! - Windows: `CreateFileMapping` / `MapViewOfFile`; `FlushViewOfFile`
//!
//! Page faults may block on disk I/O; durability is only guaranteed after a
//! successful flush.

use std::fs::File;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapRaw;

use crate::error::StorageError;

use super::PAGE_SIZE;

pub(crate) struct Mapping {
    raw: MmapRaw,
    page_count: u64,
}

impl Mapping {
    /// Map the whole of `file`. The file length must be a non-zero multiple
    /// of the page size.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = file
            .metadata()
            .wrap_err("failed to read backing file metadata")?
            .len();

        ensure!(len > 0, "cannot map an empty backing file");
        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "backing file size {} is not a multiple of page size {}",
            len,
            PAGE_SIZE
        );

        let raw = MmapRaw::map_raw(file).wrap_err("failed to memory-map backing file")?;

        Ok(Self {
            raw,
            page_count: len / PAGE_SIZE as u64,
        })
    }

    /// Number of whole pages covered by this mapping.
    pub(crate) fn page_count(&self) -> u64 {
        self.page_count
    }

    fn offset_of(&self, page_no: u64, span: u64) -> Result<usize> {
        match page_no.checked_add(span) {
            Some(end) if end <= self.page_count => Ok(page_no as usize * PAGE_SIZE),
            _ => Err(StorageError::PageOutOfBounds {
                page_no,
                page_count: self.page_count,
            }
            .into()),
        }
    }

    /// Borrow the bytes of page `page_no`.
    pub(crate) fn page(&self, page_no: u64) -> Result<&[u8]> {
        let offset = self.offset_of(page_no, 1)?;

        // SAFETY: the range [offset, offset + PAGE_SIZE) is inside the mapped
        // region (bounds-checked above), and the transaction layer guarantees
        // that bytes of a page reachable through a snapshot are not written
        // for as long as that snapshot is live (copy-on-write publication,
        // see the module docs). The returned borrow ties the slice to &self,
        // and transactions keep the mapping alive via Arc.
        Ok(unsafe { std::slice::from_raw_parts(self.raw.as_mut_ptr().add(offset), PAGE_SIZE) })
    }

    /// Copy a staged run of pages into the mapping, starting at `page_no`.
    ///
    /// Only the committing writer calls this, for page numbers no live
    /// snapshot can address.
    pub(crate) fn write_run(&self, page_no: u64, data: &[u8]) -> Result<()> {
        ensure!(
            !data.is_empty() && data.len() % PAGE_SIZE == 0,
            "staged run length {} is not a multiple of page size",
            data.len()
        );

        let span = (data.len() / PAGE_SIZE) as u64;
        let offset = self.offset_of(page_no, span)?;

        // SAFETY: the destination range is inside the mapped region
        // (bounds-checked above). The single-writer discipline means no other
        // thread writes the mapping, and the copy-on-write invariant means no
        // reader holds a view of these particular pages: they are either
        // beyond every snapshot's high-water mark or were freed before the
        // oldest live snapshot. `data` is a private heap buffer, so source
        // and destination cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.raw.as_mut_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    /// Flush the whole mapping to disk.
    pub(crate) fn flush(&self) -> Result<()> {
        self.raw.flush().wrap_err("failed to flush mapping to disk")
    }

    /// Flush a single page to disk.
    pub(crate) fn flush_page(&self, page_no: u64) -> Result<()> {
        let offset = self.offset_of(page_no, 1)?;
        self.raw
            .flush_range(offset, PAGE_SIZE)
            .wrap_err_with(|| format!("failed to flush page {}", page_no))
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("page_count", &self.page_count)
            .finish()
    }
}
