//! On-disk content-addressed chunk store
//!
//! Blobs are split into fixed-size chunks. Each chunk is written to
//! `<root>/<hex digest>`; a manifest chunk lists the total size and the
//! ordered chunk digests, and the manifest's own digest is the blob's
//! content identifier. Reads reassemble ranges across chunk boundaries and
//! keep recently used chunks in an LRU cache.

use super::{BlobHandle, BridgeError, BridgeResult, ContentId, StorageBridge};
use crate::core::config::ChunkStoreConfig;
use crate::core::error::{BzzVfsError, Result};
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const MANIFEST_MAGIC: &[u8; 4] = b"BZZM";

/// Index of a chunked blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Total blob length in bytes
    pub size: u64,
    /// Length of every chunk except possibly the last
    pub chunk_size: u32,
    /// Chunk digests in blob order
    pub chunks: Vec<[u8; 32]>,
}

impl ChunkManifest {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = MANIFEST_MAGIC.to_vec();
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    fn decode(data: &[u8]) -> BridgeResult<Self> {
        let body = data
            .strip_prefix(MANIFEST_MAGIC.as_slice())
            .ok_or_else(|| BridgeError::NotFound("chunk is not a manifest".into()))?;
        let manifest: ChunkManifest = bincode::deserialize(body)
            .map_err(|e| BridgeError::Transport(format!("corrupt manifest: {}", e)))?;
        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> BridgeResult<()> {
        if self.chunk_size == 0 {
            return Err(BridgeError::Transport("manifest chunk size is zero".into()));
        }
        let expected = self.size.div_ceil(self.chunk_size as u64);
        if expected != self.chunks.len() as u64 {
            return Err(BridgeError::Transport(format!(
                "manifest lists {} chunks for {} bytes",
                self.chunks.len(),
                self.size
            )));
        }
        Ok(())
    }

    /// Expected length of chunk `index`
    fn chunk_len(&self, index: usize) -> usize {
        let start = index as u64 * self.chunk_size as u64;
        (self.size - start).min(self.chunk_size as u64) as usize
    }
}

/// Directory-backed chunk store that doubles as a storage bridge
pub struct ChunkStore {
    config: ChunkStoreConfig,
    cache: Mutex<LruCache<ContentId, Arc<Vec<u8>>>>,
    handles: Mutex<AHashMap<BlobHandle, Arc<ChunkManifest>>>,
    next_handle: AtomicU64,
}

impl ChunkStore {
    /// Open (creating if needed) the store rooted at `config.root`
    pub fn open(config: ChunkStoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root)?;
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| BzzVfsError::Config("cache_capacity must be non-zero".into()))?;

        info!("Opening chunk store at {:?}", config.root);
        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            handles: Mutex::new(AHashMap::new()),
            next_handle: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &ChunkStoreConfig {
        &self.config
    }

    /// Split everything `reader` yields into chunks and return the blob id
    pub fn store<R: Read>(&self, mut reader: R) -> Result<ContentId> {
        let chunk_size = self.config.chunk_size;
        let manifest_chunk_size = u32::try_from(chunk_size).map_err(|_| {
            BzzVfsError::Config(format!("chunk_size {} does not fit a manifest", chunk_size))
        })?;
        let mut chunks = Vec::new();
        let mut size = 0u64;
        let mut buf = Vec::with_capacity(chunk_size);

        loop {
            buf.clear();
            (&mut reader).take(chunk_size as u64).read_to_end(&mut buf)?;
            if buf.is_empty() {
                break;
            }
            size += buf.len() as u64;
            chunks.push(*self.write_chunk(&buf)?.as_bytes());
            if buf.len() < chunk_size {
                break;
            }
        }

        let manifest = ChunkManifest {
            size,
            chunk_size: manifest_chunk_size,
            chunks,
        };
        let id = self.write_chunk(&manifest.encode()?)?;
        info!(
            "Stored blob {} ({} bytes in {} chunks)",
            id,
            size,
            manifest.chunks.len()
        );
        Ok(id)
    }

    pub fn store_bytes(&self, data: &[u8]) -> Result<ContentId> {
        self.store(data)
    }

    /// Load and validate the manifest behind `id`
    pub fn manifest(&self, id: &ContentId) -> BridgeResult<ChunkManifest> {
        let data = self.load_chunk(id)?;
        ChunkManifest::decode(&data)
    }

    /// Number of handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    fn chunk_path(&self, id: &ContentId) -> PathBuf {
        self.config.root.join(id.to_hex())
    }

    fn write_chunk(&self, data: &[u8]) -> Result<ContentId> {
        let id = ContentId::digest(data);
        let path = self.chunk_path(&id);
        if path.exists() {
            return Ok(id);
        }

        // Each writer gets its own temp file; racing writers persist the same bytes
        let mut tmp = NamedTempFile::new_in(&self.config.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(id)
    }

    fn load_chunk(&self, id: &ContentId) -> BridgeResult<Arc<Vec<u8>>> {
        if let Some(chunk) = self.cache.lock().get(id) {
            return Ok(Arc::clone(chunk));
        }

        let data = match fs::read(self.chunk_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BridgeError::NotFound(id.to_hex()));
            }
            Err(e) => {
                warn!("Chunk {} unreadable: {}", id, e);
                return Err(BridgeError::Transport(e.to_string()));
            }
        };

        if self.config.verify_chunks && ContentId::digest(&data) != *id {
            warn!("Chunk {} failed digest verification", id);
            return Err(BridgeError::Transport(format!("chunk {} is corrupt", id)));
        }

        let chunk = Arc::new(data);
        self.cache.lock().put(*id, Arc::clone(&chunk));
        Ok(chunk)
    }

    fn manifest_for(&self, handle: BlobHandle) -> BridgeResult<Arc<ChunkManifest>> {
        self.handles
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("handle {}", handle)))
    }
}

impl StorageBridge for ChunkStore {
    fn open(&self, name: &str) -> BridgeResult<BlobHandle> {
        let id = ContentId::parse_prefix(name)
            .ok_or_else(|| BridgeError::NotFound(format!("not a content id: {:?}", name)))?;
        let manifest = self.manifest(&id)?;
        debug!("Resolved {} to {} bytes", id, manifest.size);

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(handle, Arc::new(manifest));
        Ok(handle)
    }

    fn read(&self, handle: BlobHandle, buf: &mut [u8], offset: u64) -> BridgeResult<usize> {
        let manifest = self.manifest_for(handle)?;
        if offset >= manifest.size {
            return Ok(0);
        }

        let chunk_size = manifest.chunk_size as u64;
        let want = (buf.len() as u64).min(manifest.size - offset) as usize;
        let mut copied = 0usize;

        while copied < want {
            let pos = offset + copied as u64;
            let index = (pos / chunk_size) as usize;
            let within = (pos % chunk_size) as usize;

            let chunk = self.load_chunk(&ContentId::from_bytes(manifest.chunks[index]))?;
            if chunk.len() != manifest.chunk_len(index) {
                return Err(BridgeError::Transport(format!(
                    "chunk {} has {} bytes, expected {}",
                    index,
                    chunk.len(),
                    manifest.chunk_len(index)
                )));
            }

            let n = (chunk.len() - within).min(want - copied);
            buf[copied..copied + n].copy_from_slice(&chunk[within..within + n]);
            copied += n;
        }

        Ok(copied)
    }

    fn size(&self, handle: BlobHandle) -> BridgeResult<u64> {
        Ok(self.manifest_for(handle)?.size)
    }

    fn close(&self, handle: BlobHandle) {
        self.handles.lock().remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, chunk_size: usize) -> ChunkStore {
        ChunkStore::open(
            ChunkStoreConfig::new(dir.path())
                .with_chunk_size(chunk_size)
                .with_cache_capacity(4),
        )
        .unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_concurrent_stores_of_same_blob() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir, 64));
        let data = Arc::new(pattern(4096));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let data = Arc::clone(&data);
                std::thread::spawn(move || store.store_bytes(&data).unwrap())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        // Every file left behind is a finished chunk or the manifest
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| n.parse::<ContentId>().is_ok()), "{:?}", names);

        let h = store.open(&ids[0].to_hex()).unwrap();
        let mut buf = vec![0u8; data.len()];
        assert_eq!(store.read(h, &mut buf, 0).unwrap(), data.len());
        assert_eq!(&buf, &*data);
        store.close(h);
    }

    #[test]
    fn test_store_and_read_across_chunks() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);
        let data = pattern(100);
        let id = store.store_bytes(&data).unwrap();

        let manifest = store.manifest(&id).unwrap();
        assert_eq!(manifest.size, 100);
        assert_eq!(manifest.chunks.len(), 7);

        let h = store.open(&id.to_hex()).unwrap();
        assert_eq!(store.size(h).unwrap(), 100);

        let mut buf = vec![0u8; 40];
        assert_eq!(store.read(h, &mut buf, 10).unwrap(), 40);
        assert_eq!(&buf[..], &data[10..50]);

        // Tail read comes back short
        assert_eq!(store.read(h, &mut buf, 90).unwrap(), 10);
        assert_eq!(&buf[..10], &data[90..]);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 32);
        let data = pattern(64);
        let id = store.store_bytes(&data).unwrap();
        assert_eq!(store.manifest(&id).unwrap().chunks.len(), 2);

        let h = store.open(&id.to_hex()).unwrap();
        let mut buf = vec![0u8; 64];
        assert_eq!(store.read(h, &mut buf, 0).unwrap(), 64);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_empty_blob() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);
        let id = store.store_bytes(&[]).unwrap();
        let h = store.open(&id.to_hex()).unwrap();
        assert_eq!(store.size(h).unwrap(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(store.read(h, &mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_identical_chunks_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 8);
        store.store_bytes(&[0xAA; 64]).unwrap();

        // One data chunk plus one manifest
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn test_unknown_and_malformed_ids() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);

        let missing = ContentId::digest(b"never stored");
        assert!(matches!(
            store.open(&missing.to_hex()),
            Err(BridgeError::NotFound(_))
        ));
        assert!(matches!(store.open("deadbeef"), Err(BridgeError::NotFound(_))));
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn test_data_chunk_is_not_a_manifest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);
        let data = pattern(16);
        store.store_bytes(&data).unwrap();

        let chunk_id = ContentId::digest(&data);
        assert!(matches!(
            store.open(&chunk_id.to_hex()),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_chunk_is_transport_failure() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);
        let data = pattern(48);
        let id = store.store_bytes(&data).unwrap();
        let h = store.open(&id.to_hex()).unwrap();

        let second = ContentId::from_bytes(store.manifest(&id).unwrap().chunks[1]);
        fs::write(dir.path().join(second.to_hex()), [0u8; 16]).unwrap();

        // Fresh store so the cache does not hide the corruption
        let reopened = store_in(&dir, 16);
        let h2 = reopened.open(&id.to_hex()).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            reopened.read(h2, &mut buf, 16),
            Err(BridgeError::Transport(_))
        ));

        // First chunk is still fine
        assert_eq!(store.read(h, &mut buf, 0).unwrap(), 16);
    }

    #[test]
    fn test_name_with_trailing_bytes_resolves() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 16);
        let id = store.store_bytes(b"abc").unwrap();
        let h = store.open(&format!("{}\u{0}junk", id)).unwrap();
        assert_eq!(store.size(h).unwrap(), 3);
        store.close(h);
        assert_eq!(store.open_handles(), 0);
    }
}
