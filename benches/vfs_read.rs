use bzz_vfs::{
    register_vfs_with, ChunkStore, ChunkStoreConfig, MemoryBlobStore, StorageBridge, VfsConfig,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tempfile::TempDir;

/// Build a database image with `rows` rows of 256-byte blobs
fn build_image(rows: i64) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.db");
    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE hello (id INTEGER PRIMARY KEY, val BLOB NOT NULL);
         CREATE INDEX hello_val ON hello(val);",
    )
    .unwrap();
    let tx = conn.transaction().unwrap();
    for i in 0..rows {
        tx.execute(
            "INSERT INTO hello (id, val) VALUES (?1, ?2)",
            params![i, vec![(i % 251) as u8; 256]],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    drop(conn);
    std::fs::read(&path).unwrap()
}

/// Point lookups and full scans through the VFS over the memory store
fn bench_vfs_selects(c: &mut Criterion) {
    let mut group = c.benchmark_group("vfs_selects");

    for rows in [100i64, 1_000, 10_000] {
        let store = Arc::new(MemoryBlobStore::new());
        let id = store.put(&build_image(rows)).to_hex();
        let name = format!("bzz-bench-{}", rows);
        register_vfs_with(VfsConfig::builder().name(name.as_str()).build(), store).unwrap();

        let conn =
            Connection::open_with_flags_and_vfs(&id, OpenFlags::SQLITE_OPEN_READ_ONLY, &name)
                .unwrap();

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("scan", rows), &rows, |b, _| {
            b.iter(|| {
                let total: i64 = conn
                    .query_row("SELECT sum(length(val)) FROM hello", [], |r| r.get(0))
                    .unwrap();
                black_box(total);
            });
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("lookup", rows), &rows, |b, &rows| {
            let mut i = 0i64;
            b.iter(|| {
                i = (i + 7919) % rows;
                let val: Vec<u8> = conn
                    .query_row("SELECT val FROM hello WHERE id = ?1", [i], |r| r.get(0))
                    .unwrap();
                black_box(val);
            });
        });
    }

    group.finish();
}

/// Raw bridge reads from the chunk store, cold and cached
fn bench_chunk_store_reads(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();

    let mut group = c.benchmark_group("chunk_store_reads");
    group.throughput(Throughput::Bytes(4096));

    for cache in [1usize, 1024] {
        let config = ChunkStoreConfig::new(dir.path().join(format!("cache-{}", cache)))
            .with_cache_capacity(cache);
        let store = ChunkStore::open(config).unwrap();
        let id = store.store_bytes(&data).unwrap();
        let handle = store.open(&id.to_hex()).unwrap();

        group.bench_with_input(BenchmarkId::new("page", cache), &cache, |b, _| {
            let mut buf = vec![0u8; 4096];
            let mut offset = 0u64;
            b.iter(|| {
                offset = (offset + 7 * 4096) % data.len() as u64;
                black_box(store.read(handle, &mut buf, offset).unwrap());
            });
        });

        store.close(handle);
    }

    group.finish();
}

criterion_group!(benches, bench_vfs_selects, bench_chunk_store_reads);
criterion_main!(benches);
