//! In-process blob store

use super::{BlobHandle, BridgeError, BridgeResult, ContentId, StorageBridge};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Blobs kept in memory, addressed by arbitrary names or by their digest
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<AHashMap<String, Arc<[u8]>>>,
    handles: Mutex<AHashMap<BlobHandle, Arc<[u8]>>>,
    next_handle: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under its digest and return the identifier
    pub fn put(&self, data: &[u8]) -> ContentId {
        let id = ContentId::digest(data);
        self.insert(id.to_hex(), data.to_vec());
        id
    }

    /// Store `data` under an explicit name, replacing any previous blob
    pub fn insert(&self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        debug!("Storing {} bytes under {}", data.len(), name);
        self.blobs.write().insert(name, Arc::from(data));
    }

    /// Forget a named blob. Handles already open keep their snapshot.
    pub fn remove(&self, name: &str) -> bool {
        self.blobs.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.read().contains_key(name)
    }

    /// Number of handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    fn blob(&self, handle: BlobHandle) -> BridgeResult<Arc<[u8]>> {
        self.handles
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("handle {}", handle)))
    }
}

impl StorageBridge for MemoryBlobStore {
    fn open(&self, name: &str) -> BridgeResult<BlobHandle> {
        let blob = self
            .blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(handle, blob);
        Ok(handle)
    }

    fn read(&self, handle: BlobHandle, buf: &mut [u8], offset: u64) -> BridgeResult<usize> {
        let blob = self.blob(handle)?;
        if offset >= blob.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(blob.len() - start);
        buf[..n].copy_from_slice(&blob[start..start + n]);
        Ok(n)
    }

    fn size(&self, handle: BlobHandle) -> BridgeResult<u64> {
        Ok(self.blob(handle)?.len() as u64)
    }

    fn close(&self, handle: BlobHandle) {
        self.handles.lock().remove(&handle);
    }
}
