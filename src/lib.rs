//! # bzz-vfs - SQLite over a content-addressed blob store
//!
//! `bzz-vfs` lets SQLite open database images that live in an immutable,
//! content-addressed store. The database "file name" is the blob's content
//! identifier and every page is fetched on demand through a
//! [`StorageBridge`]:
//!
//! - **Read-only VFS**: writes, truncation and sync are refused
//! - **Pluggable stores**: in-memory, on-disk chunk store, or C-ABI callbacks
//! - **Faithful errors**: missing blobs and transport failures keep distinct codes
//! - **Diagnostics**: optional per-callback tracing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bzz_vfs::{register_vfs, BlobDatabase, MemoryBlobStore, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let store = Arc::new(MemoryBlobStore::new());
//! let id = store.put(&std::fs::read("hello.db")?);
//!
//! register_vfs(store)?;
//!
//! let db = BlobDatabase::open(&id.to_hex())?;
//! for row in db.query_rows("SELECT id, data FROM hello ORDER BY id")? {
//!     println!("{}", row);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Chunk store
//!
//! ```rust,no_run
//! use bzz_vfs::{register_vfs_with, ChunkStore, ChunkStoreConfig, VfsConfig, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let store = Arc::new(ChunkStore::open(ChunkStoreConfig::new("/data/chunks"))?);
//! let id = store.store(std::fs::File::open("hello.db")?)?;
//!
//! register_vfs_with(VfsConfig::builder().name("bzz-disk").build(), store)?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod database;

pub use crate::core::{
    bridge::{
        BlobHandle, BridgeError, BridgeResult, ChunkManifest, ChunkStore, ContentId,
        ForeignBridge, ForeignOpenFn, ForeignReadFn, ForeignSizeFn, MemoryBlobStore,
        StorageBridge,
    },
    capabilities::{Capabilities, Operation, Support, CAPABILITIES},
    config::{ChunkStoreConfig, Settings, VfsConfig},
    diag::{DiagnosticRecord, DiagnosticSink, RecordingSink, SilentSink, VerboseSink},
    error::{BzzVfsError, Result},
    vfs::{
        is_registered, register_vfs, register_vfs_with, unregister_vfs, with_vfs, BlobFile,
        BzzVfs, VFS_NAME,
    },
};
pub use crate::database::{BlobDatabase, RowSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
