//! Read-only query helper
//!
//! Opens a database image through a registered bzz VFS and runs statements
//! over it. Engine failures come back as [`BzzVfsError::Engine`] carrying
//! the engine's own error text, bounded to a configurable number of bytes.

use crate::core::error::{BzzVfsError, Result};
use crate::core::translate::{bounded_last_error, utf8_prefix};
use crate::core::vfs::VFS_NAME;
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use std::fmt;
use std::io::Write;
use tracing::{debug, info};

/// Default bound on captured engine error text
pub const DEFAULT_ERROR_CAPACITY: usize = 1024;

/// One result row: 1-based index, integer id, hex of the first four blob bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSummary {
    pub index: usize,
    pub id: i64,
    pub prefix: String,
}

impl fmt::Display for RowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">>>> row {}: {} -> {}", self.index, self.id, self.prefix)
    }
}

/// Render the first four bytes of `blob` as eight hex digits
/// (little-endian u32, zero padded when shorter)
pub fn blob_prefix(blob: &[u8]) -> String {
    let mut word = [0u8; 4];
    let n = blob.len().min(4);
    word[..n].copy_from_slice(&blob[..n]);
    format!("{:08x}", u32::from_le_bytes(word))
}

/// A read-only connection to a blob served by the bzz VFS
pub struct BlobDatabase {
    conn: Connection,
    id: String,
    error_capacity: usize,
}

impl BlobDatabase {
    /// Open `id` through the default VFS
    pub fn open(id: &str) -> Result<Self> {
        Self::open_with_vfs(id, VFS_NAME)
    }

    /// Open `id` through the VFS registered as `vfs`
    pub fn open_with_vfs(id: &str, vfs: &str) -> Result<Self> {
        info!("Opening {} via VFS {}", id, vfs);
        let conn = Connection::open_with_flags_and_vfs(
            id,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            vfs,
        )
        .map_err(|e| engine_error(e, None, DEFAULT_ERROR_CAPACITY))?;

        Ok(Self {
            conn,
            id: id.to_string(),
            error_capacity: DEFAULT_ERROR_CAPACITY,
        })
    }

    /// Bound captured error text to `capacity` bytes
    pub fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `sql`, reading column 0 as an integer and column 1 as a blob
    pub fn query_rows(&self, sql: &str) -> Result<Vec<RowSummary>> {
        debug!("Executing {}", sql);
        let mut stmt = self.conn.prepare(sql).map_err(|e| self.fail(e))?;
        let mut rows = stmt.query([]).map_err(|e| self.fail(e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| self.fail(e))? {
            let id: i64 = row.get(0).map_err(|e| self.fail(e))?;
            let prefix = match row.get_ref(1).map_err(|e| self.fail(e))? {
                ValueRef::Blob(b) | ValueRef::Text(b) => blob_prefix(b),
                _ => blob_prefix(&[]),
            };
            out.push(RowSummary {
                index: out.len() + 1,
                id,
                prefix,
            });
        }
        Ok(out)
    }

    /// Run `sql` and write one line per row to `out`
    pub fn exec<W: Write>(&self, sql: &str, out: &mut W) -> Result<usize> {
        let rows = self.query_rows(sql)?;
        for row in &rows {
            writeln!(out, "{}", row)?;
        }
        Ok(rows.len())
    }

    fn fail(&self, err: rusqlite::Error) -> BzzVfsError {
        engine_error(err, Some(&self.conn), self.error_capacity)
    }
}

fn engine_error(err: rusqlite::Error, conn: Option<&Connection>, capacity: usize) -> BzzVfsError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(e, _) => e.extended_code,
        _ => rusqlite::ffi::SQLITE_ERROR,
    };
    let message = match conn {
        Some(conn) => bounded_last_error(conn, capacity),
        None => utf8_prefix(err.to_string().as_bytes(), capacity),
    };
    BzzVfsError::Engine { code, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_prefix() {
        assert_eq!(blob_prefix(&[0x78, 0x56, 0x34, 0x12, 0xff]), "12345678");
        assert_eq!(blob_prefix(&[0xab]), "000000ab");
        assert_eq!(blob_prefix(&[]), "00000000");
    }

    #[test]
    fn test_row_display() {
        let row = RowSummary {
            index: 1,
            id: 99,
            prefix: "0badf00d".into(),
        };
        assert_eq!(row.to_string(), ">>>> row 1: 99 -> 0badf00d");
    }

    #[test]
    fn test_engine_error_without_connection_is_bounded() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTFOUND),
            Some("unknown operation".into()),
        );
        match engine_error(err, None, 4) {
            BzzVfsError::Engine { code, message } => {
                assert_eq!(code, rusqlite::ffi::SQLITE_NOTFOUND);
                assert!(message.len() <= 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_engine_error_non_ascii_text_is_bounded() {
        let conn = Connection::open_in_memory().unwrap();
        let full = "no such table: h\u{e9}llo";

        for cap in [15usize, 16, 17, 18, 64] {
            let err = conn.prepare("SELECT * FROM h\u{e9}llo").unwrap_err();
            match engine_error(err, Some(&conn), cap) {
                BzzVfsError::Engine { message, .. } => {
                    assert!(message.len() <= cap, "{:?} over {}", message, cap);
                    assert!(full.starts_with(&message));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        // Without a connection the rendered error is bounded the same way
        for cap in 0..40 {
            let err = rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(full.into()),
            );
            match engine_error(err, None, cap) {
                BzzVfsError::Engine { message, .. } => assert!(message.len() <= cap),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
