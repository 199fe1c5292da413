use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use parking_lot::Mutex;
use rowsync_core::{
    share, AdapterConfig, CollectingSink, FieldRef, FieldTable, KeyAddressedEncoder, ChangeEncoder,
    MemoryTable, Protocol, RowBasedEncoder, RowKeyCache, SyncAdapter,
};
use serde_json::{json, Value};

fn table(rows: usize) -> MemoryTable {
    let rows: Vec<Vec<Value>> = (0..rows)
        .map(|i| vec![json!(format!("row-{i}")), json!(format!("name {i}")), json!(i)])
        .collect();
    MemoryTable::from_rows(vec!["id", "name", "value"], rows)
}

fn bench_cache_resolve(c: &mut Criterion) {
    let table = table(10_000);

    c.bench_function("cache_resolve_cold_10k", |b| {
        b.iter(|| {
            let mut cache = RowKeyCache::new(FieldRef::Column(0));
            black_box(cache.resolve(&table, black_box("row-9999")));
        })
    });

    let mut warm = RowKeyCache::new(FieldRef::Column(0));
    warm.resolve(&table, "row-9999");
    c.bench_function("cache_resolve_hit_10k", |b| {
        b.iter(|| black_box(warm.resolve(&table, black_box("row-5000"))))
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let table = table(1_000);
    let fields = FieldTable::new(&table, FieldRef::Column(0), true);

    c.bench_function("snapshot_keyed_1k", |b| {
        b.iter(|| black_box(KeyAddressedEncoder.snapshot(&table, &fields).to_json().unwrap()))
    });
    c.bench_function("snapshot_rows_1k", |b| {
        b.iter(|| black_box(RowBasedEncoder.snapshot(&table, &fields).to_json().unwrap()))
    });
}

fn bench_change_data(c: &mut Criterion) {
    let source: Arc<Mutex<MemoryTable>> = share(table(1_000));
    let sink = Arc::new(CollectingSink::new());
    let adapter = SyncAdapter::new(AdapterConfig::default().with_protocol(Protocol::KeyAddressed), sink.clone());
    adapter.bind(source);

    let mut flip = false;
    c.bench_function("receive_change_data", |b| {
        b.iter(|| {
            flip = !flip;
            let msg = json!({"operation": "changeData", "items": {"row-500": {"value": flip}}});
            black_box(adapter.receive_message(&msg.to_string()).unwrap());
            sink.take_raw();
        })
    });
}

criterion_group!(benches, bench_cache_resolve, bench_snapshot_encode, bench_change_data);
criterion_main!(benches);
