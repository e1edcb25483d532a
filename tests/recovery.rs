//! # Recovery Integration Tests
//!
//! Simulates torn commits and corruption by editing the store file between
//! sessions, then verifies that reopening adopts the last fully published
//! state and nothing newer.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vellum::{PageType, Store, PAGE_SIZE};

fn store_path() -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.vel");
    (dir, path)
}

fn commit_marker_page(store: &Store, fill: u8) -> u64 {
    let mut tx = store.begin_write().unwrap();
    let page_no = {
        let mut page = tx.allocate_pages(1).unwrap();
        page.header_mut().unwrap().set_page_type(PageType::Leaf);
        page.payload_mut().fill(fill);
        page.header().unwrap().page_number()
    };
    tx.commit().unwrap();
    page_no
}

/// Meta slots live in pages 0 and 1; the commit sequence is the u64 at
/// offset 24 of each slot. Returns (slot offset, sequence) of the live slot.
fn live_slot(raw: &[u8]) -> (usize, u64) {
    let seq_at = |offset: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&raw[offset + 24..offset + 32]);
        u64::from_le_bytes(buf)
    };

    let seq0 = seq_at(0);
    let seq1 = seq_at(PAGE_SIZE);
    if seq0 >= seq1 {
        (0, seq0)
    } else {
        (PAGE_SIZE, seq1)
    }
}

fn corrupt_live_slot(path: &Path) {
    let mut raw = fs::read(path).unwrap();
    let (offset, _) = live_slot(&raw);
    for byte in &mut raw[offset + 24..offset + 40] {
        *byte ^= 0xFF;
    }
    fs::write(path, raw).unwrap();
}

#[test]
fn test_torn_meta_write_falls_back_to_previous_commit() {
    let (_dir, path) = store_path();

    let (page_a, page_b, seq_after_first) = {
        let store = Store::create(&path).unwrap();
        let page_a = commit_marker_page(&store, 0xA1);
        let seq_after_first = store.committed_sequence();
        let page_b = commit_marker_page(&store, 0xB2);
        (page_a, page_b, seq_after_first)
    };

    // Tear the newest meta slot, as a crash between the data flush and the
    // meta flush would leave it.
    corrupt_live_slot(&path);

    let store = Store::open(&path).unwrap();
    assert_eq!(store.committed_sequence(), seq_after_first);

    let reader = store.begin_read().unwrap();
    assert_eq!(reader.get_page(page_a).unwrap().payload()[0], 0xA1);

    // The second commit is gone wholesale.
    assert!(reader.get_page(page_b).is_err());
}

#[test]
fn test_recovered_store_accepts_new_commits() {
    let (_dir, path) = store_path();

    {
        let store = Store::create(&path).unwrap();
        commit_marker_page(&store, 0xA1);
        commit_marker_page(&store, 0xB2);
    }
    corrupt_live_slot(&path);

    let store = Store::open(&path).unwrap();
    let page_c = commit_marker_page(&store, 0xC3);

    let reader = store.begin_read().unwrap();
    assert_eq!(reader.get_page(page_c).unwrap().payload()[0], 0xC3);
}

#[test]
fn test_free_list_survives_reopen() {
    let (_dir, path) = store_path();

    let page_a = {
        let store = Store::create(&path).unwrap();
        let page_a = commit_marker_page(&store, 0xAA);
        let mut tx = store.begin_write().unwrap();
        tx.free_page(page_a).unwrap();
        tx.commit().unwrap();
        page_a
    };

    let store = Store::open(&path).unwrap();
    assert!(store.free_page_count() >= 1);

    // With no readers pinning it, the freed page is the first reused.
    let mut tx = store.begin_write().unwrap();
    let allocated = {
        let page = tx.allocate_pages(1).unwrap();
        page.header().unwrap().page_number()
    };
    assert_eq!(allocated, page_a);
}

#[test]
fn test_open_rejects_foreign_file() {
    let (_dir, path) = store_path();
    fs::write(&path, vec![0x5Au8; PAGE_SIZE * 4]).unwrap();

    assert!(Store::open(&path).is_err());
}

#[test]
fn test_open_rejects_truncated_file() {
    let (_dir, path) = store_path();

    {
        let store = Store::create(&path).unwrap();
        commit_marker_page(&store, 0x11);
    }

    let raw = fs::read(&path).unwrap();
    fs::write(&path, &raw[..PAGE_SIZE + 100]).unwrap();

    assert!(Store::open(&path).is_err());
}

#[test]
fn test_fresh_store_reopens_empty() {
    let (_dir, path) = store_path();

    drop(Store::create(&path).unwrap());

    let store = Store::open(&path).unwrap();
    assert_eq!(store.committed_sequence(), 1);
    assert_eq!(store.free_page_count(), 0);

    let reader = store.begin_read().unwrap();
    assert!(reader.get_page(vellum::FIRST_DATA_PAGE).is_err());
}
