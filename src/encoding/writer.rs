//! # Bounded Key Encoding
//!
//! This module implements [`SliceWriter`], the cursor used to build ordered
//! binary keys. A writer is bound to a fixed-capacity buffer, encodes
//! primitive fields sequentially, and finally freezes a prefix of the buffer
//! into an immutable [`Slice`].
//!
//! ## Why Big-Endian
//!
//! Slices are compared byte-wise (see [`super::slice`]). Big-endian is the
//! only fixed-width integer encoding where the most significant byte comes
//! first, so the byte order of two encodings matches the numeric order of the
//! values. That is the property that lets an index layer answer range queries
//! with plain byte comparison.
//!
//! Signed integers are written as their two's-complement big-endian bytes:
//! byte order matches numeric order for values of the same sign. Index
//! layers that mix signs in one field bias the value into unsigned range
//! before writing.
//!
//! ## Encoding Widths
//!
//! | Method        | Width (bytes) |
//! |---------------|---------------|
//! | `write_u8`    | 1             |
//! | `write_u16`   | 2             |
//! | `write_i32`   | 4             |
//! | `write_i64`   | 8             |
//! | `write_char`  | 4 (scalar)    |
//! | `write_str`   | UTF-8 length  |
//! | `write_bytes` | input length  |
//!
//! ## Bounds Contract
//!
//! Every write checks the remaining capacity first. A write that would run
//! past the end of the buffer fails with
//! [`StorageError::BufferOverflow`](crate::StorageError::BufferOverflow) and
//! leaves the buffer and cursor untouched; no byte outside the buffer is ever
//! modified.
//!
//! ## Usage
//!
//! ```
//! use vellum::encoding::SliceWriter;
//!
//! let mut writer = SliceWriter::new(16);
//! writer.write_str("user-").unwrap();
//! writer.write_i64(42).unwrap();
//!
//! let written = writer.position();
//! let key = writer.create_slice(written).unwrap();
//! assert_eq!(key.len(), 13);
//! ```

use eyre::{ensure, Result};

use super::slice::Slice;
use crate::error::StorageError;

/// A mutable cursor over a fixed-capacity buffer, scoped to encoding one key.
#[derive(Debug)]
pub struct SliceWriter {
    buf: Box<[u8]>,
    pos: usize,
}

impl SliceWriter {
    /// Create a writer backed by a fresh zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
        }
    }

    /// Bind the writer to a caller-supplied buffer. The cursor starts at 0;
    /// existing contents past the written prefix are ignored.
    pub fn with_buffer(buf: impl Into<Box<[u8]>>) -> Self {
        Self {
            buf: buf.into(),
            pos: 0,
        }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The written prefix of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn reserve(&mut self, additional: usize) -> Result<&mut [u8]> {
        let end = match self.pos.checked_add(additional) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                return Err(StorageError::BufferOverflow {
                    requested: self.pos.saturating_add(additional),
                    capacity: self.buf.len(),
                }
                .into())
            }
        };

        let chunk = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    /// Append the UTF-8 bytes of `s`.
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Append raw bytes verbatim.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.reserve(1)?[0] = v;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.reserve(2)?.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.reserve(4)?.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.reserve(8)?.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Append the character's Unicode scalar value as 4 big-endian bytes.
    pub fn write_char(&mut self, c: char) -> Result<()> {
        self.reserve(4)?.copy_from_slice(&(c as u32).to_be_bytes());
        Ok(())
    }

    /// Freeze the first `required_len` bytes of the buffer as an immutable
    /// [`Slice`]. `required_len` must not exceed the bytes actually written.
    pub fn create_slice(self, required_len: usize) -> Result<Slice> {
        ensure!(
            required_len <= self.pos,
            "slice length {} exceeds the {} bytes written",
            required_len,
            self.pos
        );

        let mut data = Vec::from(self.buf);
        data.truncate(required_len);
        Ok(Slice::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn string_advances_cursor_by_utf8_length() {
        let mut w = SliceWriter::new(32);
        w.write_str("héllo").unwrap();

        assert_eq!(w.position(), "héllo".len());
        assert_eq!(w.written(), "héllo".as_bytes());
    }

    #[test]
    fn fixed_width_encodings() {
        let mut w = SliceWriter::new(32);
        w.write_u8(0xAB).unwrap();
        w.write_u16(0x0102).unwrap();
        w.write_i32(0x0A0B0C0D).unwrap();
        w.write_i64(0x0102030405060708).unwrap();
        w.write_char('A').unwrap();

        assert_eq!(w.position(), 1 + 2 + 4 + 8 + 4);
        assert_eq!(
            w.written(),
            [
                0xAB, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
                0x07, 0x08, 0x00, 0x00, 0x00, 0x41
            ]
        );
    }

    #[test]
    fn bytes_append_at_cursor_not_at_start() {
        let mut w = SliceWriter::new(8);
        w.write_bytes(&[1, 2]).unwrap();
        w.write_bytes(&[3, 4]).unwrap();

        assert_eq!(w.written(), [1, 2, 3, 4]);
    }

    #[test]
    fn overflow_is_detected_and_buffer_untouched() {
        let mut w = SliceWriter::new(4);
        w.write_u16(0xFFEE).unwrap();

        let err = w.write_i32(1).unwrap_err();
        let storage = err.downcast_ref::<crate::StorageError>().unwrap();
        assert_eq!(
            *storage,
            crate::StorageError::BufferOverflow {
                requested: 6,
                capacity: 4
            }
        );

        // The failed write moved nothing.
        assert_eq!(w.position(), 2);
        assert_eq!(w.written(), [0xFF, 0xEE]);
    }

    #[test]
    fn exact_fit_succeeds() {
        let mut w = SliceWriter::new(4);
        w.write_i32(7).unwrap();

        assert_eq!(w.position(), 4);
        assert!(w.write_u8(0).is_err());
    }

    #[test]
    fn create_slice_freezes_prefix() {
        let mut w = SliceWriter::new(16);
        w.write_str("user-42").unwrap();
        w.write_i32(42).unwrap();
        let written = w.position();

        let key = w.create_slice(written).unwrap();
        assert_eq!(&key.as_bytes()[..7], b"user-42");
        assert_eq!(&key.as_bytes()[7..], [0, 0, 0, 42]);
    }

    #[test]
    fn create_slice_rejects_length_beyond_written() {
        let mut w = SliceWriter::new(16);
        w.write_u8(1).unwrap();

        assert!(w.create_slice(2).is_err());
    }

    #[test]
    fn caller_supplied_buffer() {
        let mut w = SliceWriter::with_buffer(vec![0u8; 3]);
        w.write_u8(9).unwrap();

        assert_eq!(w.capacity(), 3);
        assert!(w.write_i32(1).is_err());
    }

    proptest! {
        #[test]
        fn u16_order_matches_byte_order(a: u16, b: u16) {
            let mut wa = SliceWriter::new(2);
            wa.write_u16(a).unwrap();
            let sa = wa.create_slice(2).unwrap();

            let mut wb = SliceWriter::new(2);
            wb.write_u16(b).unwrap();
            let sb = wb.create_slice(2).unwrap();

            prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        }

        #[test]
        fn non_negative_i64_order_matches_byte_order(a in 0i64.., b in 0i64..) {
            let mut wa = SliceWriter::new(8);
            wa.write_i64(a).unwrap();
            let sa = wa.create_slice(8).unwrap();

            let mut wb = SliceWriter::new(8);
            wb.write_i64(b).unwrap();
            let sb = wb.create_slice(8).unwrap();

            prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        }

        #[test]
        fn negative_i32_order_matches_byte_order(a in i32::MIN..0, b in i32::MIN..0) {
            let mut wa = SliceWriter::new(4);
            wa.write_i32(a).unwrap();
            let sa = wa.create_slice(4).unwrap();

            let mut wb = SliceWriter::new(4);
            wb.write_i32(b).unwrap();
            let sb = wb.create_slice(4).unwrap();

            prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        }
    }
}
