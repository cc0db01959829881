#![no_main]
use bzz_vfs::{ChunkStore, ChunkStoreConfig, StorageBridge};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Debug, Arbitrary)]
struct Input {
    chunk_size: u16,
    data: Vec<u8>,
    reads: Vec<(u32, u16)>,
}

// Chunked reads must match the source bytes for any layout and range
fuzz_target!(|input: Input| {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let chunk_size = input.chunk_size.max(1) as usize;
    let store = match ChunkStore::open(ChunkStoreConfig::new(dir.path()).with_chunk_size(chunk_size)) {
        Ok(store) => store,
        Err(_) => return,
    };

    let id = store.store_bytes(&input.data).expect("store");
    let handle = store.open(&id.to_hex()).expect("open");
    assert_eq!(store.size(handle).expect("size"), input.data.len() as u64);

    for (offset, len) in input.reads.into_iter().take(16) {
        let mut buf = vec![0u8; len as usize];
        let n = store.read(handle, &mut buf, offset as u64).expect("read");
        let start = (offset as usize).min(input.data.len());
        let end = (start + len as usize).min(input.data.len());
        assert_eq!(&buf[..n], &input.data[start..end]);
    }

    store.close(handle);
});
