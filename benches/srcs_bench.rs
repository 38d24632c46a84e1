//! Performance benchmarks for srcs
//!
//! Tracks snapshot cost on growing trees, line delta computation, segment
//! framing and replay speed.

#![cfg_attr(feature = "quick-bench", allow(dead_code))]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use srcs::delta::compute_line_delta;
use srcs::format::encode_segment;
use srcs::{
    ContainerReader, ContainerWriter, EngineConfig, Segment, SnapshotEngine, SnapshotType,
    SnapshotTypeHint, TreeReplayer,
};
use std::fs;
use std::hint::black_box;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn populate(dir: &Path, file_count: usize, rng: &mut StdRng) {
    for i in 0..file_count {
        let sub = dir.join(format!("dir_{}", i % 8));
        fs::create_dir_all(&sub).unwrap();
        let lines = rng.random_range(10..200);
        let content: String = (0..lines)
            .map(|l| format!("let value_{} = {};\n", l, rng.random::<u32>()))
            .collect();
        fs::write(sub.join(format!("file_{}.rs", i)), content).unwrap();
    }
}

/// Benchmark a key snapshot followed by a one-file patch
fn bench_take_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("take_snapshot");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for file_count in [10, 100, 500].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, &file_count| {
                let tracked = TempDir::new().unwrap();
                let mut rng = StdRng::seed_from_u64(42);
                populate(tracked.path(), file_count, &mut rng);

                b.iter(|| {
                    let mut engine = SnapshotEngine::new(
                        tracked.path().to_path_buf(),
                        EngineConfig::default(),
                    )
                    .unwrap();
                    let key = engine.take_snapshot(SnapshotTypeHint::Any).unwrap();
                    fs::write(tracked.path().join("dir_0/file_0.rs"), "changed\n").unwrap();
                    let patch = engine.take_snapshot(SnapshotTypeHint::Any).unwrap();
                    black_box((key, patch));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark line deltas on files with a handful of edits
fn bench_line_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_delta");
    group.measurement_time(Duration::from_secs(2));

    for lines in [100, 1_000, 10_000].iter() {
        let old: String = (0..*lines).map(|i| format!("line {}\n", i)).collect();
        let new: String = (0..*lines)
            .map(|i| {
                if i % 97 == 0 {
                    format!("edited {}\n", i)
                } else {
                    format!("line {}\n", i)
                }
            })
            .collect();
        group.throughput(Throughput::Bytes(new.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| black_box(compute_line_delta(old.as_bytes(), new.as_bytes())));
        });
    }

    group.finish();
}

/// Benchmark segment framing and reading a container back
fn bench_container_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_codec");
    let mut rng = StdRng::seed_from_u64(7);
    let payload: Vec<u8> = (0..64 * 1024).map(|_| rng.random()).collect();

    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_segment_64k", |b| {
        b.iter(|| black_box(encode_segment(SnapshotType::Key, 1, &payload)));
    });

    let mut writer = ContainerWriter::new(Vec::new(), 0).unwrap();
    for i in 0..32 {
        writer
            .append(&Segment::new(SnapshotType::Patch, i, "", payload.clone()))
            .unwrap();
    }
    let container = writer.finish().unwrap();
    group.throughput(Throughput::Bytes(container.len() as u64));
    group.bench_function("read_32_segments", |b| {
        b.iter(|| {
            let reader = ContainerReader::new(Cursor::new(&container)).unwrap();
            black_box(reader.read_all().unwrap())
        });
    });

    group.finish();
}

/// Benchmark replaying a recorded history
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    let tracked = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    populate(tracked.path(), 100, &mut rng);
    let mut engine =
        SnapshotEngine::new(tracked.path().to_path_buf(), EngineConfig::default()).unwrap();
    let mut segments = Vec::new();
    for i in 0..20u64 {
        let file = tracked.path().join(format!("dir_{}/file_{}.rs", i % 8, i));
        fs::write(file, format!("rewritten {}\n", i)).unwrap();
        let encoded = engine.take_snapshot(SnapshotTypeHint::Any).unwrap();
        segments.push(Segment::new(encoded.snapshot_type, i, "", encoded.body));
    }

    group.bench_function("20_segments_100_files", |b| {
        b.iter(|| {
            let target = TempDir::new().unwrap();
            let mut replayer = TreeReplayer::new(target.path());
            replayer.apply_all(segments.iter().cloned().map(Ok)).unwrap();
            black_box(replayer.applied())
        });
    });

    group.finish();
}

#[cfg(feature = "quick-bench")]
criterion_group!(benches, bench_line_delta, bench_container_codec);

#[cfg(not(feature = "quick-bench"))]
criterion_group!(
    benches,
    bench_take_snapshot,
    bench_line_delta,
    bench_container_codec,
    bench_replay
);

criterion_main!(benches);
