//! SQLite VFS (Virtual File System) over a content-addressed blob store
//!
//! This module provides a read-only SQLite VFS that serves database images
//! straight out of a [`StorageBridge`](crate::core::bridge::StorageBridge):
//!
//! - Content identifiers double as file names
//! - Byte ranges are fetched on demand, nothing is cached in the adapter
//! - Writes, truncation and sync are refused; locking is inert
//! - Store failures map onto SQLite's result codes

mod file;
mod vfs;


pub use file::{BlobFile, BzzFile, DEVICE_CHARACTERISTICS};
pub use vfs::{
    is_registered, register_vfs, register_vfs_with, unregister_vfs, with_vfs, BzzVfs, LastError,
    VFS_NAME,
};

use crate::core::capabilities::Operation;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Run a callback body, turning a panic into `fallback` so it never
/// unwinds into SQLite
pub(crate) fn guard<T>(op: Operation, fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!("Panic inside VFS operation {}", op);
            fallback
        }
    }
}
