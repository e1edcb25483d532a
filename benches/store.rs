//! Storage engine benchmarks.
//!
//! Measures the hot paths: key encoding, page allocation with commit, and
//! snapshot reads through the mapping.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vellum::{PageType, SliceWriter, Store};

fn bench_slice_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice_writer");

    group.bench_function("encode_str_i64", |b| {
        b.iter(|| {
            let mut writer = SliceWriter::new(32);
            writer.write_str(black_box("user-42")).unwrap();
            writer.write_i64(black_box(42)).unwrap();
            let len = writer.position();
            black_box(writer.create_slice(len).unwrap())
        });
    });

    group.bench_function("encode_fixed_width_run", |b| {
        b.iter(|| {
            let mut writer = SliceWriter::new(64);
            for i in 0..4u8 {
                writer.write_u8(black_box(i)).unwrap();
                writer.write_u16(black_box(i as u16 * 7)).unwrap();
                writer.write_i32(black_box(i as i32 * 1001)).unwrap();
                writer.write_i64(black_box(i as i64 * 100_003)).unwrap();
            }
            black_box(writer.position())
        });
    });

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.sample_size(20);

    for pages in [1u64, 8, 64] {
        group.bench_with_input(
            BenchmarkId::new("allocate_pages", pages),
            &pages,
            |b, &pages| {
                let dir = tempfile::tempdir().unwrap();
                let store = Store::create(dir.path().join("bench.vel")).unwrap();

                b.iter(|| {
                    let mut tx = store.begin_write().unwrap();
                    {
                        let mut page = tx.allocate_pages(pages).unwrap();
                        page.header_mut().unwrap().set_page_type(PageType::Leaf);
                        page.payload_mut()[0] = 0xAB;
                    }
                    tx.commit().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_snapshot_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path().join("bench.vel")).unwrap();

    let mut page_numbers = Vec::new();
    let mut tx = store.begin_write().unwrap();
    for _ in 0..256 {
        let page = tx.allocate_pages(1).unwrap();
        page_numbers.push(page.header().unwrap().page_number());
    }
    tx.commit().unwrap();

    let mut group = c.benchmark_group("snapshot_read");

    group.bench_function("get_page", |b| {
        let reader = store.begin_read().unwrap();
        let mut idx = 0usize;
        b.iter(|| {
            let page_no = page_numbers[idx % page_numbers.len()];
            idx += 1;
            black_box(reader.get_page(black_box(page_no)).unwrap().payload()[0])
        });
    });

    group.bench_function("begin_read", |b| {
        b.iter(|| black_box(store.begin_read().unwrap().sequence()));
    });

    group.finish();
}

criterion_group!(benches, bench_slice_writer, bench_commit, bench_snapshot_read);
criterion_main!(benches);
