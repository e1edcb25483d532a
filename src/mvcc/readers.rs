//! Active-reader accounting.
//!
//! A fixed array of atomic slots, one per active read transaction, each
//! holding the reader's snapshot sequence (0 marks a free slot; sequences
//! start at 1). Slot claim takes a short mutex; reads of the table are
//! lock-free. The minimum over the occupied slots is the oldest snapshot any
//! reader can still address, which is exactly the bound the free list needs
//! before it hands a freed page back to an allocator.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;
use parking_lot::Mutex;

use crate::error::StorageError;

pub(crate) const MAX_READERS: usize = 64;

pub(crate) struct ReaderTable {
    slots: [AtomicU64; MAX_READERS],
    slot_lock: Mutex<()>,
}

impl ReaderTable {
    #[allow(clippy::declare_interior_mutable_const)]
    pub(crate) fn new() -> Self {
        const FREE: AtomicU64 = AtomicU64::new(0);
        Self {
            #[allow(clippy::borrow_interior_mutable_const)]
            slots: [FREE; MAX_READERS],
            slot_lock: Mutex::new(()),
        }
    }

    /// Claim a slot for a reader on snapshot `sequence`. Returns the slot
    /// index to pass to [`ReaderTable::release`].
    pub(crate) fn register(&self, sequence: u64) -> Result<usize> {
        debug_assert!(sequence > 0);

        let _guard = self.slot_lock.lock();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.load(Ordering::Relaxed) == 0 {
                slot.store(sequence, Ordering::SeqCst);
                return Ok(idx);
            }
        }
        Err(StorageError::TooManyReaders { max: MAX_READERS }.into())
    }

    pub(crate) fn release(&self, slot_idx: usize) {
        self.slots[slot_idx].store(0, Ordering::SeqCst);
    }

    /// Oldest snapshot sequence among active readers, `None` when idle.
    pub(crate) fn oldest(&self) -> Option<u64> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .filter(|&seq| seq != 0)
            .min()
    }
}

impl std::fmt::Debug for ReaderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != 0)
            .count();
        f.debug_struct("ReaderTable").field("active", &active).finish()
    }
}
