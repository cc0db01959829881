//! Configuration for the bzz VFS and the chunk store
//!
//! Both configs have sensible defaults, a builder, and can be loaded from a
//! TOML file with a `[vfs]` and a `[store]` table.

use crate::core::error::{BzzVfsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name the VFS registers under unless configured otherwise
pub const DEFAULT_VFS_NAME: &str = "bzz";

/// Longest pathname the VFS advertises to SQLite
pub const DEFAULT_MAX_PATHNAME: usize = 512;

/// Sector size reported for every open file
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

/// Chunk size used when splitting blobs into the chunk store
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Number of decoded chunks kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// VFS registration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Identifier the VFS registers under
    pub name: String,

    /// Value of `mxPathname`; content identifiers longer than this are truncated
    pub max_pathname: usize,

    /// Sector size reported by `xSectorSize`
    pub sector_size: u32,

    /// Make this VFS the process default
    pub make_default: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_VFS_NAME.to_string(),
            max_pathname: DEFAULT_MAX_PATHNAME,
            sector_size: DEFAULT_SECTOR_SIZE,
            make_default: false,
        }
    }
}

impl VfsConfig {
    pub fn builder() -> VfsConfigBuilder {
        VfsConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('\0') {
            return Err(BzzVfsError::Config(format!(
                "invalid VFS name {:?}",
                self.name
            )));
        }
        if self.max_pathname == 0 || self.max_pathname > i32::MAX as usize {
            return Err(BzzVfsError::Config(format!(
                "max_pathname out of range: {}",
                self.max_pathname
            )));
        }
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(BzzVfsError::Config(format!(
                "sector_size must be a power of two, got {}",
                self.sector_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`VfsConfig`]
#[derive(Debug, Default)]
pub struct VfsConfigBuilder {
    config: VfsConfig,
}

impl VfsConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_pathname(mut self, max: usize) -> Self {
        self.config.max_pathname = max;
        self
    }

    pub fn sector_size(mut self, size: u32) -> Self {
        self.config.sector_size = size;
        self
    }

    pub fn make_default(mut self, yes: bool) -> Self {
        self.config.make_default = yes;
        self
    }

    pub fn build(self) -> VfsConfig {
        self.config
    }
}

/// On-disk chunk store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkStoreConfig {
    /// Directory holding one file per chunk
    pub root: PathBuf,

    /// Bytes per data chunk
    pub chunk_size: usize,

    /// Decoded chunks kept in the LRU cache
    pub cache_capacity: usize,

    /// Re-hash every chunk read from disk
    pub verify_chunks: bool,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./chunks"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            verify_chunks: true,
        }
    }
}

impl ChunkStoreConfig {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_chunks = verify;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BzzVfsError::Config("chunk_size must be non-zero".into()));
        }
        if u32::try_from(self.chunk_size).is_err() {
            return Err(BzzVfsError::Config(format!(
                "chunk_size {} does not fit a manifest",
                self.chunk_size
            )));
        }
        if self.cache_capacity == 0 {
            return Err(BzzVfsError::Config(
                "cache_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Combined settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vfs: VfsConfig,
    pub store: ChunkStoreConfig,
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| BzzVfsError::Config(e.to_string()))?;
        settings.vfs.validate()?;
        settings.store.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}
