//! Storage bridge
//!
//! The narrow interface between the VFS and the content-addressed store:
//! resolve a name to a handle, read a byte range through a handle, query a
//! handle's total size. Every call may fail and every call blocks until the
//! store answers.

mod chunked;
mod foreign;
mod memory;

pub use chunked::{ChunkManifest, ChunkStore};
pub use foreign::{ForeignBridge, ForeignOpenFn, ForeignReadFn, ForeignSizeFn};
pub use memory::MemoryBlobStore;

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Token naming one resolved blob inside a bridge
pub type BlobHandle = u64;

/// Failure reported by a storage bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Name or handle does not resolve in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// The store could not be reached or returned garbage
    #[error("transport: {0}")]
    Transport(String),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Content-addressed blob store as seen by the VFS
pub trait StorageBridge: Send + Sync {
    /// Resolve a content identifier to a handle
    fn open(&self, name: &str) -> BridgeResult<BlobHandle>;

    /// Copy bytes starting at `offset` into `buf`. Returns the number of
    /// bytes written, which is less than `buf.len()` at end of blob.
    fn read(&self, handle: BlobHandle, buf: &mut [u8], offset: u64) -> BridgeResult<usize>;

    /// Total length of the blob behind `handle`
    fn size(&self, handle: BlobHandle) -> BridgeResult<u64>;

    /// Release a handle. Unknown handles are ignored.
    fn close(&self, _handle: BlobHandle) {}
}

/// Length of a content identifier in hex characters
pub const CONTENT_ID_HEX_LEN: usize = 64;

/// SHA-256 digest naming an immutable blob
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Digest of `data`
    pub fn digest(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the first 64 hex characters of `name`, after an optional `0x`.
    /// Anything past them is ignored since SQLite may append bytes to names.
    pub fn parse_prefix(name: &str) -> Option<Self> {
        let name = name.strip_prefix("0x").unwrap_or(name);
        let hex_part = name.get(..CONTENT_ID_HEX_LEN)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_part, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = BridgeError;

    fn from_str(s: &str) -> BridgeResult<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        if trimmed.len() != CONTENT_ID_HEX_LEN {
            return Err(BridgeError::NotFound(format!(
                "content id must be {} hex characters: {:?}",
                CONTENT_ID_HEX_LEN, s
            )));
        }
        Self::parse_prefix(trimmed)
            .ok_or_else(|| BridgeError::NotFound(format!("content id is not hex: {:?}", s)))
    }
}
