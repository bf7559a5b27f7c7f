//! Window store benchmark: record windows and load training rows.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowscore::features::FeatureSchema;
use flowscore::storage::{RowSource, WindowRecord, WindowStore};
use tempfile::tempdir;

fn window(i: usize) -> WindowRecord {
    WindowRecord {
        ip: format!("172.16.{}.{}", i / 250, i % 250),
        window_start: i as f64 * 60.0,
        dst_port: 443,
        proto: 0,
        total_bytes: 4096.0,
        total_packets: 32.0,
        unique_src_ports: 2.0,
        flow_count: 3.0,
        avg_pkt_size: 128.0,
        bytes_per_flow: 1365.0,
        pkts_per_flow: 10.7,
        burstiness: 0.4,
        is_new_dst: false,
        is_rare_dst: false,
        score: Some(0.1),
    }
}

fn bench_record_window(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = WindowStore::open(&dir.path().join("windows.sqlite")).unwrap();
    let w = window(1);

    c.bench_function("storage_record_window", |b| {
        b.iter(|| store.record_window(black_box(&w)).unwrap())
    });
}

fn bench_load_rows(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = WindowStore::open(&dir.path().join("windows.sqlite")).unwrap();
    for i in 0..2000 {
        store.record_window(&window(i)).unwrap();
    }
    let schema = FeatureSchema::network();

    c.bench_function("storage_load_2000_rows", |b| {
        b.iter(|| store.load_rows(black_box(&schema)).unwrap())
    });
}

criterion_group!(benches, bench_record_window, bench_load_rows);
criterion_main!(benches);
