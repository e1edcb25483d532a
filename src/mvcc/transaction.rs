//! Read and write transactions.
//!
//! A [`ReadTransaction`] is a registered snapshot plus a mapping handle; all
//! it can do is resolve page numbers into zero-copy views. A
//! [`WriteTransaction`] owns the allocation cursor, the dirty-page staging
//! area, and a working copy of the free list; nothing it does is observable
//! anywhere until [`WriteTransaction::commit`] publishes the lot.
//!
//! ## Dirty Runs
//!
//! Allocation works in contiguous runs. Each run is staged as one heap
//! buffer keyed by its first page number; only the first page of a run
//! carries a header, and the payload extends through the rest of the run.
//! Commit copies every staged run into the mapping at its final offset,
//! flushes the data, and then flips the meta slot.
//!
//! ## Commit Ordering
//!
//! ```text
//! fold frees ─> serialize free list ─> grow ─> copy runs ─> flush data
//!                                                              │
//!                      publish meta slot (seq+1) <─ flush ─────┘
//! ```
//!
//! The data flush strictly precedes the meta flush. A crash anywhere in
//! between leaves the previous meta slot as the highest valid sequence, so
//! reopening the store surfaces the last fully published state and nothing
//! of the torn commit.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use log::{debug, trace};
use parking_lot::MutexGuard;
use smallvec::SmallVec;

use crate::error::StorageError;
use crate::storage::freelist::{self, FreeList, TRUNK_CAPACITY};
use crate::storage::{
    Mapping, MetaHeader, Page, PageHeader, PageMut, PageType, FIRST_DATA_PAGE, PAGE_HEADER_SIZE,
    PAGE_SIZE,
};
use crate::store::{Committed, Store};

fn ensure_addressable(page_no: u64, limit: u64) -> Result<()> {
    if page_no < FIRST_DATA_PAGE || page_no >= limit {
        return Err(StorageError::PageOutOfBounds {
            page_no,
            page_count: limit,
        }
        .into());
    }
    Ok(())
}

/// A consistent snapshot of the last-committed state.
///
/// Holds the mapping that covered the store at begin time; growing the store
/// afterwards retires that mapping without invalidating this reader's views.
pub struct ReadTransaction<'s> {
    store: &'s Store,
    mapping: Arc<Mapping>,
    sequence: u64,
    next_page: u64,
    slot_idx: usize,
}

impl<'s> ReadTransaction<'s> {
    pub(crate) fn new(
        store: &'s Store,
        mapping: Arc<Mapping>,
        sequence: u64,
        next_page: u64,
        slot_idx: usize,
    ) -> Self {
        Self {
            store,
            mapping,
            sequence,
            next_page,
            slot_idx,
        }
    }

    /// Commit sequence this snapshot observes.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Allocation high-water mark of this snapshot; page numbers at or above
    /// it are not addressable here.
    pub fn next_page(&self) -> u64 {
        self.next_page
    }

    /// Resolve a committed page into a zero-copy view.
    pub fn get_page(&self, page_no: u64) -> Result<Page<'_>> {
        ensure_addressable(page_no, self.next_page)?;
        let bytes = self.mapping.page(page_no)?;
        Ok(Page::new(bytes))
    }
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        self.store.readers().release(self.slot_idx);
    }
}

impl std::fmt::Debug for ReadTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("sequence", &self.sequence)
            .field("next_page", &self.next_page)
            .finish()
    }
}

/// The single active read-write transaction.
///
/// Holds the writer lock for its whole lifetime. All mutation is staged in
/// private buffers; `commit` publishes everything atomically, `rollback`
/// (or dropping the transaction) discards everything.
pub struct WriteTransaction<'s> {
    store: &'s Store,
    _writer: MutexGuard<'s, ()>,
    mapping: Arc<Mapping>,
    base_sequence: u64,
    base_next_page: u64,
    base_trunk_pages: Vec<u64>,
    next_page: u64,
    dirty: BTreeMap<u64, Box<[u8]>>,
    freelist: FreeList,
    pending_free: SmallVec<[u64; 16]>,
    completed: bool,
}

impl<'s> WriteTransaction<'s> {
    pub(crate) fn new(
        store: &'s Store,
        writer: MutexGuard<'s, ()>,
        mapping: Arc<Mapping>,
        committed: &Committed,
    ) -> Self {
        Self {
            store,
            _writer: writer,
            mapping,
            base_sequence: committed.sequence,
            base_next_page: committed.next_page,
            base_trunk_pages: committed.trunk_pages.clone(),
            next_page: committed.next_page,
            dirty: BTreeMap::new(),
            freelist: committed.freelist.clone(),
            pending_free: SmallVec::new(),
            completed: false,
        }
    }

    /// Current allocation cursor. The next fresh allocation starts here.
    pub fn next_page(&self) -> u64 {
        self.next_page
    }

    /// Pages staged (allocated or shadowed) so far.
    pub fn dirty_page_count(&self) -> u64 {
        self.dirty
            .values()
            .map(|buf| (buf.len() / PAGE_SIZE) as u64)
            .sum()
    }

    fn reserve_pages(&mut self, count: u64) -> u64 {
        if count == 1 {
            if let Some(page_no) = self.freelist.pop_reusable(self.store.readers().oldest()) {
                return page_no;
            }
        }
        let page_no = self.next_page;
        self.next_page += count;
        page_no
    }

    /// Reserve `count` contiguous pages and return a mutable view of the run.
    ///
    /// The first page's header is stamped with its own page number before the
    /// view is handed out; there is no observable half-initialized state.
    /// Single-page allocations prefer reusable free pages; multi-page runs
    /// always come from the fresh end of the store so they stay contiguous.
    pub fn allocate_pages(&mut self, count: u64) -> Result<PageMut<'_>> {
        ensure!(count >= 1, "cannot allocate zero pages");
        let len = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(PAGE_SIZE))
            .ok_or_else(|| eyre::eyre!("allocation of {} pages overflows", count))?;

        let page_no = self.reserve_pages(count);

        let mut buf = vec![0u8; len].into_boxed_slice();
        PageHeader::new(page_no, PageType::Free).write_to(&mut buf)?;

        trace!("allocated pages [{}, {})", page_no, page_no + count);

        match self.dirty.entry(page_no) {
            Entry::Vacant(slot) => Ok(PageMut::new(slot.insert(buf))),
            Entry::Occupied(_) => bail!("allocator handed out in-use page {}", page_no),
        }
    }

    fn dirty_slice(&self, page_no: u64) -> Option<&[u8]> {
        let (&start, buf) = self.dirty.range(..=page_no).next_back()?;
        let span = (buf.len() / PAGE_SIZE) as u64;
        if page_no >= start + span {
            return None;
        }
        if page_no == start {
            Some(buf)
        } else {
            let offset = ((page_no - start) as usize) * PAGE_SIZE;
            Some(&buf[offset..offset + PAGE_SIZE])
        }
    }

    fn dirty_slice_mut(&mut self, page_no: u64) -> Option<&mut [u8]> {
        let (&start, buf) = self.dirty.range_mut(..=page_no).next_back()?;
        let span = (buf.len() / PAGE_SIZE) as u64;
        if page_no >= start + span {
            return None;
        }
        if page_no == start {
            Some(buf)
        } else {
            let offset = ((page_no - start) as usize) * PAGE_SIZE;
            Some(&mut buf[offset..offset + PAGE_SIZE])
        }
    }

    /// Resolve a page into a view. Pages staged by this transaction win over
    /// the committed snapshot; asking for the first page of a staged run
    /// returns the whole run.
    pub fn get_page(&self, page_no: u64) -> Result<Page<'_>> {
        ensure_addressable(page_no, self.next_page)?;

        if let Some(bytes) = self.dirty_slice(page_no) {
            return Ok(Page::new(bytes));
        }

        // Not staged: must be committed state. Page numbers at or past the
        // base high-water mark were allocated and freed inside this
        // transaction and address nothing.
        ensure_addressable(page_no, self.base_next_page)?;
        let bytes = self.mapping.page(page_no)?;
        Ok(Page::new(bytes))
    }

    /// Mutable view of a page staged by this transaction. Committed pages
    /// are immutable; take them through [`WriteTransaction::shadow_page`].
    pub fn get_page_mut(&mut self, page_no: u64) -> Result<PageMut<'_>> {
        ensure_addressable(page_no, self.next_page)?;

        match self.dirty_slice_mut(page_no) {
            Some(bytes) => Ok(PageMut::new(bytes)),
            None => bail!(
                "page {} is not writable in this transaction; allocate or shadow it first",
                page_no
            ),
        }
    }

    /// Copy-on-write a committed page: stage a copy of it under a freshly
    /// reserved page number, free the original, and return the copy. The
    /// returned page's header carries the new number; the caller re-links
    /// whatever referenced the old page.
    ///
    /// Shadowing a page this transaction already staged is a no-op that
    /// returns the existing staging.
    pub fn shadow_page(&mut self, page_no: u64) -> Result<PageMut<'_>> {
        ensure_addressable(page_no, self.next_page)?;

        if self.dirty_slice(page_no).is_some() {
            return self.get_page_mut(page_no);
        }

        ensure_addressable(page_no, self.base_next_page)?;
        ensure!(
            !self.pending_free.contains(&page_no),
            "page {} was already freed in this transaction",
            page_no
        );

        let mut buf: Box<[u8]> = self.mapping.page(page_no)?.to_vec().into_boxed_slice();

        let new_no = self.reserve_pages(1);
        PageHeader::from_bytes_mut(&mut buf)?.set_page_number(new_no);
        self.pending_free.push(page_no);

        trace!("shadowed page {} as {}", page_no, new_no);

        match self.dirty.entry(new_no) {
            Entry::Vacant(slot) => Ok(PageMut::new(slot.insert(buf))),
            Entry::Occupied(_) => bail!("allocator handed out in-use page {}", new_no),
        }
    }

    /// Release a page. A committed page is queued for the free list and
    /// becomes reusable once no snapshot can address it; a page staged by
    /// this transaction is discarded outright and its numbers recycle
    /// immediately. Staged runs are freed through their first page.
    pub fn free_page(&mut self, page_no: u64) -> Result<()> {
        ensure_addressable(page_no, self.next_page)?;

        if let Some((&start, buf)) = self.dirty.range(..=page_no).next_back() {
            let span = (buf.len() / PAGE_SIZE) as u64;
            if page_no < start + span {
                ensure!(
                    page_no == start,
                    "page {} is inside the run starting at {}; free the run head",
                    page_no,
                    start
                );
                self.dirty.remove(&start);
                for p in start..start + span {
                    // Never published, so no snapshot gates its reuse.
                    self.freelist.push(p, 0);
                }
                trace!("discarded staged run [{}, {})", start, start + span);
                return Ok(());
            }
        }

        ensure_addressable(page_no, self.base_next_page)?;
        ensure!(
            !self.pending_free.contains(&page_no),
            "page {} was already freed in this transaction",
            page_no
        );
        self.pending_free.push(page_no);
        trace!("freed committed page {}", page_no);
        Ok(())
    }

    /// Publish every staged change atomically, then end the transaction.
    ///
    /// On any error nothing has been published; the transaction is consumed
    /// and its staging discarded, exactly as if it had been rolled back.
    pub fn commit(mut self) -> Result<()> {
        if self.dirty.is_empty() && self.pending_free.is_empty() {
            trace!("commit with no changes (seq stays {})", self.base_sequence);
            self.completed = true;
            return Ok(());
        }

        let mut inner = self.store.inner_lock();
        let sequence = self.base_sequence + 1;

        // Fold this transaction's frees, and the trunk pages of the previous
        // free-list serialization, into the working free list.
        for &page_no in &self.pending_free {
            self.freelist.push(page_no, sequence);
        }
        for &page_no in &self.base_trunk_pages {
            self.freelist.push(page_no, sequence);
        }

        // Serialize the free list into a fresh trunk chain. Trunk pages come
        // off the fresh cursor so the entry set is final before encoding.
        let entries = self.freelist.entries().to_vec();
        let trunk_count = entries.len().div_ceil(TRUNK_CAPACITY);
        let trunk_pages: Vec<u64> = (0..trunk_count)
            .map(|_| {
                let page_no = self.next_page;
                self.next_page += 1;
                page_no
            })
            .collect();

        for (idx, chunk) in entries.chunks(TRUNK_CAPACITY).enumerate() {
            let page_no = trunk_pages[idx];
            let next_trunk = trunk_pages.get(idx + 1).copied().unwrap_or(0);

            let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
            PageHeader::new(page_no, PageType::FreeList).write_to(&mut buf)?;
            freelist::write_trunk(&mut buf[PAGE_HEADER_SIZE..], next_trunk, chunk)?;
            self.dirty.insert(page_no, buf);
        }
        let freelist_head = trunk_pages.first().copied().unwrap_or(0);

        // Make room for the high-water mark, then copy staged runs into the
        // mapping in page order.
        inner.pager.grow(self.next_page)?;
        let mapping = inner.pager.mapping();
        for (&start, buf) in &self.dirty {
            mapping.write_run(start, buf)?;
        }

        // Durability order: all data before any meta.
        mapping.flush()?;

        let meta = MetaHeader::new(
            sequence,
            self.next_page,
            freelist_head,
            self.freelist.len() as u64,
        );
        let slot = 1 - inner.live_slot;
        inner.pager.publish_meta(slot, &meta)?;

        inner.live_slot = slot;
        inner.committed = Committed {
            sequence,
            next_page: self.next_page,
            freelist: std::mem::take(&mut self.freelist),
            trunk_pages,
        };

        debug!(
            "committed seq={} ({} dirty pages, {} freed)",
            sequence,
            self.dirty.len(),
            self.pending_free.len()
        );
        self.completed = true;
        Ok(())
    }

    /// Discard every staged change and end the transaction. No other
    /// transaction, past or future, can tell this one existed.
    pub fn rollback(mut self) {
        trace!(
            "rolled back write transaction (base seq {}, {} staged pages)",
            self.base_sequence,
            self.dirty.len()
        );
        self.completed = true;
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.completed {
            trace!("write transaction dropped without commit; discarding staging");
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("base_sequence", &self.base_sequence)
            .field("next_page", &self.next_page)
            .field("dirty_runs", &self.dirty.len())
            .finish()
    }
}
