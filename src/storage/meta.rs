//! # Meta Slots
//!
//! Pages 0 and 1 of the backing file each hold a 64-byte meta header. The two
//! slots alternate: a commit always writes the slot that is *not* currently
//! live, stamps it with the next commit sequence, and seals it with a CRC-32.
//! Opening the store parses both slots and adopts the valid one with the
//! highest sequence.
//!
//! This is what makes commit all-or-nothing without a separate durability
//! log: until the new slot's flush completes, the previous slot remains the
//! highest valid sequence, so a crash at any point exposes either the old
//! state or the new state, never a mixture. A torn write inside the new slot
//! fails its CRC and the old slot wins.
//!
//! ## Slot Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  ----------------------------------------
//! 0       16    magic          "vellum store v1\0"
//! 16      4     version        Format version
//! 20      4     page_size      Must match the build's PAGE_SIZE
//! 24      8     sequence       Commit sequence, monotonically increasing
//! 32      8     next_page      Allocation high-water mark
//! 40      8     freelist_head  First free-list trunk page (0 = empty)
//! 48      8     freelist_len   Total free pages recorded
//! 56      4     reserved       Zero
//! 60      4     checksum       CRC-32 (iSCSI) over bytes 0..60
//! ```

use crc::{Crc, CRC_32_ISCSI};
use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::PAGE_SIZE;

pub(crate) const META_MAGIC: &[u8; 16] = b"vellum store v1\x00";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const META_HEADER_SIZE: usize = 64;

const META_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct MetaHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    sequence: U64,
    next_page: U64,
    freelist_head: U64,
    freelist_len: U64,
    reserved: [u8; 4],
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<MetaHeader>() == META_HEADER_SIZE);

impl MetaHeader {
    /// Build a sealed header ready to be written to a slot.
    pub(crate) fn new(sequence: u64, next_page: u64, freelist_head: u64, freelist_len: u64) -> Self {
        let mut header = Self {
            magic: *META_MAGIC,
            version: U32::new(FORMAT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            sequence: U64::new(sequence),
            next_page: U64::new(next_page),
            freelist_head: U64::new(freelist_head),
            freelist_len: U64::new(freelist_len),
            reserved: [0; 4],
            checksum: U32::new(0),
        };
        header.checksum = U32::new(header.compute_checksum());
        header
    }

    fn compute_checksum(&self) -> u32 {
        let bytes = self.as_bytes();
        META_CRC.checksum(&bytes[..META_HEADER_SIZE - 4])
    }

    /// Parse a slot without judging validity; use [`MetaHeader::is_valid`].
    pub(crate) fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= META_HEADER_SIZE,
            "buffer too small for MetaHeader: {} < {}",
            data.len(),
            META_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..META_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read MetaHeader: {:?}", e))
    }

    pub(crate) fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= META_HEADER_SIZE,
            "buffer too small for MetaHeader: {} < {}",
            data.len(),
            META_HEADER_SIZE
        );

        data[..META_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    /// Magic, version, page size, and checksum all line up.
    pub(crate) fn is_valid(&self) -> bool {
        self.magic == *META_MAGIC
            && self.version.get() == FORMAT_VERSION
            && self.page_size.get() == PAGE_SIZE as u32
            && self.checksum.get() == self.compute_checksum()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.get()
    }

    pub(crate) fn next_page(&self) -> u64 {
        self.next_page.get()
    }

    pub(crate) fn freelist_head(&self) -> u64 {
        self.freelist_head.get()
    }

    pub(crate) fn freelist_len(&self) -> u64 {
        self.freelist_len.get()
    }
}

/// Pick the live slot out of the two meta pages: valid, highest sequence.
/// Returns the adopted header and its slot index (0 or 1).
pub(crate) fn select_live_slot(slot0: &[u8], slot1: &[u8]) -> Result<(MetaHeader, usize)> {
    let parse = |data: &[u8]| -> Option<MetaHeader> {
        MetaHeader::from_bytes(data)
            .ok()
            .filter(|h| h.is_valid())
            .copied()
    };

    match (parse(slot0), parse(slot1)) {
        (Some(a), Some(b)) => {
            if a.sequence() >= b.sequence() {
                Ok((a, 0))
            } else {
                Ok((b, 1))
            }
        }
        (Some(a), None) => Ok((a, 0)),
        (None, Some(b)) => Ok((b, 1)),
        (None, None) => bail!("no valid meta slot: not a vellum store, or both slots corrupt"),
    }
}
