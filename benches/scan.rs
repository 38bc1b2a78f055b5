//! Benchmarks for dvr-drill scanning
//!
//! Run: cargo bench
//! Run specific: cargo bench -- parse_scr
//! Compare: cargo bench -- --save-baseline v1 && cargo bench -- --baseline v1

use std::path::Path;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

use dvr_drill::scan::header::{encode_scr, parse_scr};
use dvr_drill::{CheckpointStore, ChunkScanner, ScanOptions, VirtualBlockStream};

const BLOCK_SIZE: usize = 2048;

// ============================================================================
// Header parsing
// ============================================================================

fn benchmark_parse_scr(c: &mut Criterion) {
    let mut block = vec![0u8; BLOCK_SIZE];
    block[..9].copy_from_slice(&encode_scr(123_456_789));
    let junk = vec![0x5Au8; BLOCK_SIZE];

    c.bench_function("parse_scr_header", |b| {
        b.iter(|| black_box(parse_scr(black_box(&block))))
    });
    c.bench_function("parse_scr_no_header", |b| {
        b.iter(|| black_box(parse_scr(black_box(&junk))))
    });
}

// ============================================================================
// Block scanning (throughput-oriented)
// ============================================================================

/// Recordings of 400 blocks separated by 16 blocks of filler
fn write_image(path: &Path, blocks: usize) {
    let mut data = Vec::with_capacity(blocks * BLOCK_SIZE);
    let mut clock = 0u64;
    for i in 0..blocks {
        let mut block = vec![0x5Au8; BLOCK_SIZE];
        if i % 416 < 400 {
            block[..9].copy_from_slice(&encode_scr(clock));
            clock += 3_600;
        } else {
            clock += 10_000_000;
        }
        data.extend_from_slice(&block);
    }
    std::fs::write(path, data).unwrap();
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_scan");
    group.sample_size(10);

    for blocks in [4_096usize, 32_768] {
        let dir = tempdir().unwrap();
        let image = dir.path().join("disk.img");
        write_image(&image, blocks);

        group.throughput(Throughput::Bytes((blocks * BLOCK_SIZE) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(blocks), &blocks, |b, _| {
            b.iter(|| {
                let store_path = dir.path().join("state.json");
                let _ = std::fs::remove_file(&store_path);

                let mut stream = VirtualBlockStream::open(&[&image]).unwrap();
                let mut store = CheckpointStore::open(&store_path).unwrap();
                let mut scanner = ChunkScanner::new(ScanOptions {
                    block_size: BLOCK_SIZE as u64,
                    min_chunk_size: 100,
                    checkpoint_interval: Duration::from_secs(3600),
                    ..Default::default()
                });
                black_box(scanner.scan(&mut stream, &mut store).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse_scr, benchmark_scan);
criterion_main!(benches);
