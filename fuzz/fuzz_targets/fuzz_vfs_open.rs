#![no_main]
use bzz_vfs::{register_vfs_with, BlobDatabase, MemoryBlobStore, VfsConfig};
use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, OnceLock};

const VFS: &str = "bzz-fuzz-open";

fn store() -> &'static Arc<MemoryBlobStore> {
    static STORE: OnceLock<Arc<MemoryBlobStore>> = OnceLock::new();
    STORE.get_or_init(|| {
        let store = Arc::new(MemoryBlobStore::new());
        register_vfs_with(VfsConfig::builder().name(VFS).build(), store.clone())
            .expect("register fuzz VFS");
        store
    })
}

// Arbitrary bytes served as a database image must never crash the VFS
fuzz_target!(|data: &[u8]| {
    let store = store();
    let id = store.put(data).to_hex();

    if let Ok(db) = BlobDatabase::open_with_vfs(&id, VFS) {
        let _ = db.query_rows("SELECT rowid, * FROM sqlite_master");
        let _ = db
            .connection()
            .query_row("PRAGMA quick_check", [], |r| r.get::<_, String>(0));
    }

    store.remove(&id);
    assert_eq!(store.open_handles(), 0);
});
