//! # Free-Space Bookkeeping
//!
//! Pages freed by a write transaction are not handed back to allocators
//! immediately: a reader whose snapshot predates the free may still navigate
//! to them. Every freed page is therefore recorded together with the commit
//! sequence that freed it, and becomes reusable only once every live reader
//! snapshot is at least that new. Pages that were allocated and freed inside
//! the same uncommitted transaction were never visible to anyone and carry
//! sequence 0, which makes them reusable at once.
//!
//! The free list is published atomically with the allocation high-water mark
//! at commit: the in-memory entries are serialized into a chain of trunk
//! pages (written copy-on-write like any other page) and the chain head goes
//! into the meta slot.
//!
//! ## Trunk Page Layout
//!
//! ```text
//! Offset  Size   Description
//! ------  -----  ----------------------------------------
//! 0       16     Standard PageHeader (type = FreeList)
//! 16      8      next_trunk: next trunk page number (0 = last)
//! 24      4      count: entries stored in this trunk
//! 28      4      reserved
//! 32      16*N   entries: (page_no: u64, freed_seq: u64)
//! ```
//!
//! With 4 KiB pages each trunk holds 254 entries.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::PAGE_PAYLOAD_SIZE;

/// One freed page and the commit sequence that freed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeEntry {
    pub page_no: u64,
    pub freed_seq: u64,
}

/// In-memory free list; the persistent form is the trunk chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct FreeList {
    entries: Vec<FreeEntry>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[FreeEntry] {
        &self.entries
    }

    pub(crate) fn push(&mut self, page_no: u64, freed_seq: u64) {
        self.entries.push(FreeEntry { page_no, freed_seq });
    }

    pub(crate) fn extend(&mut self, entries: impl IntoIterator<Item = FreeEntry>) {
        self.entries.extend(entries);
    }

    /// Pop a page that is safe to reuse given the oldest live reader
    /// snapshot (`None` when no readers are active).
    pub(crate) fn pop_reusable(&mut self, oldest_reader_seq: Option<u64>) -> Option<u64> {
        let reusable = |e: &FreeEntry| match oldest_reader_seq {
            None => true,
            Some(oldest) => e.freed_seq <= oldest,
        };

        let idx = self.entries.iter().rposition(reusable)?;
        Some(self.entries.swap_remove(idx).page_no)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct TrunkHeader {
    next_trunk: U64,
    count: U32,
    reserved: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct TrunkEntry {
    page_no: U64,
    freed_seq: U64,
}

const TRUNK_HEADER_SIZE: usize = std::mem::size_of::<TrunkHeader>();
const TRUNK_ENTRY_SIZE: usize = std::mem::size_of::<TrunkEntry>();

/// Entries that fit in one trunk page payload.
pub(crate) const TRUNK_CAPACITY: usize = (PAGE_PAYLOAD_SIZE - TRUNK_HEADER_SIZE) / TRUNK_ENTRY_SIZE;

/// Serialize one trunk's worth of entries into a page payload.
pub(crate) fn write_trunk(payload: &mut [u8], next_trunk: u64, entries: &[FreeEntry]) -> Result<()> {
    ensure!(
        payload.len() >= PAGE_PAYLOAD_SIZE,
        "trunk payload too small: {}",
        payload.len()
    );
    ensure!(
        entries.len() <= TRUNK_CAPACITY,
        "trunk overflow: {} entries, capacity {}",
        entries.len(),
        TRUNK_CAPACITY
    );

    let header = TrunkHeader {
        next_trunk: U64::new(next_trunk),
        count: U32::new(entries.len() as u32),
        reserved: U32::new(0),
    };
    payload[..TRUNK_HEADER_SIZE].copy_from_slice(header.as_bytes());

    let mut offset = TRUNK_HEADER_SIZE;
    for entry in entries {
        let raw = TrunkEntry {
            page_no: U64::new(entry.page_no),
            freed_seq: U64::new(entry.freed_seq),
        };
        payload[offset..offset + TRUNK_ENTRY_SIZE].copy_from_slice(raw.as_bytes());
        offset += TRUNK_ENTRY_SIZE;
    }
    Ok(())
}

/// Decode one trunk page payload into its next pointer and entries.
pub(crate) fn read_trunk(payload: &[u8]) -> Result<(u64, Vec<FreeEntry>)> {
    ensure!(
        payload.len() >= PAGE_PAYLOAD_SIZE,
        "trunk payload too small: {}",
        payload.len()
    );

    let header = TrunkHeader::ref_from_bytes(&payload[..TRUNK_HEADER_SIZE])
        .map_err(|e| eyre::eyre!("failed to read trunk header: {:?}", e))?;

    let count = header.count.get() as usize;
    ensure!(
        count <= TRUNK_CAPACITY,
        "trunk count {} exceeds capacity {}",
        count,
        TRUNK_CAPACITY
    );

    let mut entries = Vec::with_capacity(count);
    let mut offset = TRUNK_HEADER_SIZE;
    for _ in 0..count {
        let raw = TrunkEntry::ref_from_bytes(&payload[offset..offset + TRUNK_ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to read trunk entry: {:?}", e))?;
        entries.push(FreeEntry {
            page_no: raw.page_no.get(),
            freed_seq: raw.freed_seq.get(),
        });
        offset += TRUNK_ENTRY_SIZE;
    }

    Ok((header.next_trunk.get(), entries))
}
