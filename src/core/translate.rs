//! Result and error translation
//!
//! Maps storage bridge outcomes onto [`BzzVfsError`] and those onto SQLite
//! result codes, and copies engine error text into bounded buffers.

use crate::core::bridge::{BlobHandle, BridgeError, BridgeResult};
use crate::core::capabilities::Operation;
use crate::core::error::BzzVfsError;
use libsqlite3_sys as ffi;
use rusqlite::Connection;
use std::ffi::CStr;
use std::os::raw::c_int;

/// Outcome of an open against the bridge
pub fn open_outcome(name: &str, res: BridgeResult<BlobHandle>) -> Result<BlobHandle, BzzVfsError> {
    res.map_err(|e| match e {
        BridgeError::NotFound(_) => BzzVfsError::NotFound(name.to_string()),
        BridgeError::Transport(msg) => BzzVfsError::Transport(msg),
    })
}

/// Outcome of a read of `requested` bytes. Any bridge failure is an I/O
/// failure here; a count below `requested` is a short read.
pub fn read_outcome(requested: usize, res: BridgeResult<usize>) -> Result<(), BzzVfsError> {
    match res {
        Ok(got) if got == requested => Ok(()),
        Ok(got) if got < requested => Err(BzzVfsError::ShortRead { requested, got }),
        Ok(got) => Err(BzzVfsError::Transport(format!(
            "store returned {} bytes for a {} byte read",
            got, requested
        ))),
        Err(BridgeError::NotFound(msg)) | Err(BridgeError::Transport(msg)) => {
            Err(BzzVfsError::Transport(msg))
        }
    }
}

/// Outcome of a size query; an unresolvable handle is not found
pub fn size_outcome(res: BridgeResult<u64>) -> Result<u64, BzzVfsError> {
    res.map_err(|e| match e {
        BridgeError::NotFound(msg) => BzzVfsError::NotFound(msg),
        BridgeError::Transport(msg) => BzzVfsError::Transport(msg),
    })
}

/// SQLite result code for an error crossing back into the engine
pub fn result_code(err: &BzzVfsError) -> c_int {
    match err {
        BzzVfsError::NotFound(_) => ffi::SQLITE_NOTFOUND,
        BzzVfsError::ShortRead { .. } => ffi::SQLITE_IOERR_SHORT_READ,
        BzzVfsError::Transport(_) => ffi::SQLITE_IOERR,
        BzzVfsError::Unsupported(op) => unsupported_code(*op),
        BzzVfsError::EngineInit(rc) | BzzVfsError::RegistrationFailed(rc) => *rc,
        BzzVfsError::Engine { code, .. } => *code,
        BzzVfsError::InvalidName(_) => ffi::SQLITE_CANTOPEN,
        BzzVfsError::Config(_) => ffi::SQLITE_MISUSE,
        BzzVfsError::Io(_) | BzzVfsError::Serialization(_) => ffi::SQLITE_IOERR,
    }
}

fn unsupported_code(op: Operation) -> c_int {
    match op {
        Operation::Write => ffi::SQLITE_IOERR_WRITE,
        Operation::Truncate => ffi::SQLITE_IOERR_TRUNCATE,
        Operation::Sync => ffi::SQLITE_IOERR_FSYNC,
        Operation::Lock | Operation::Unlock | Operation::CheckReservedLock => {
            ffi::SQLITE_IOERR_LOCK
        }
        Operation::FileControl => ffi::SQLITE_NOTFOUND,
        Operation::Open => ffi::SQLITE_CANTOPEN,
        _ => ffi::SQLITE_IOERR,
    }
}

/// Copy `min(src.len(), dst.len())` bytes; returns the count copied
pub fn copy_bounded(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

/// Copy as much of `src` as fits while leaving room for a NUL terminator.
/// Writes nothing into an empty buffer.
pub fn copy_c_string(src: &[u8], dst: &mut [u8]) -> usize {
    let Some(room) = dst.len().checked_sub(1) else {
        return 0;
    };
    let n = copy_bounded(&src[..src.len().min(room)], dst);
    dst[n] = 0;
    n
}

/// Copy the connection's last error message into `out`, truncating to
/// `out.len()` bytes. Returns the number of bytes copied.
pub fn last_error_message(conn: &Connection, out: &mut [u8]) -> usize {
    // SAFETY: the handle stays valid for the borrow of `conn`, and
    // sqlite3_errmsg always returns a NUL-terminated string it owns.
    let msg = unsafe {
        let ptr = ffi::sqlite3_errmsg(conn.handle());
        if ptr.is_null() {
            return 0;
        }
        CStr::from_ptr(ptr)
    };
    copy_bounded(msg.to_bytes(), out)
}

/// Last error message as an owned string bounded to `capacity` bytes
pub fn bounded_last_error(conn: &Connection, capacity: usize) -> String {
    let mut buf = vec![0u8; capacity];
    let n = last_error_message(conn, &mut buf);
    utf8_prefix(&buf[..n], capacity)
}

/// Decode at most `capacity` bytes of `bytes` into a string that is itself
/// no longer than `capacity`. A character cut by the bound is dropped and
/// each invalid sequence becomes a single `?`.
pub fn utf8_prefix(bytes: &[u8], capacity: usize) -> String {
    let mut rest = &bytes[..bytes.len().min(capacity)];
    let mut out = String::with_capacity(rest.len());
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        out.push('?');
                        rest = &after[len..];
                    }
                    None => return out,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_outcomes() {
        assert!(read_outcome(10, Ok(10)).is_ok());
        assert!(matches!(
            read_outcome(10, Ok(6)),
            Err(BzzVfsError::ShortRead { requested: 10, got: 6 })
        ));
        assert!(matches!(
            read_outcome(10, Ok(11)),
            Err(BzzVfsError::Transport(_))
        ));
        assert!(matches!(
            read_outcome(10, Err(BridgeError::Transport("down".into()))),
            Err(BzzVfsError::Transport(_))
        ));
        assert!(matches!(
            read_outcome(10, Err(BridgeError::NotFound("h".into()))),
            Err(BzzVfsError::Transport(_))
        ));
    }

    #[test]
    fn test_size_and_open_outcomes() {
        assert_eq!(size_outcome(Ok(4096)).unwrap(), 4096);
        assert!(matches!(
            size_outcome(Err(BridgeError::NotFound("h".into()))),
            Err(BzzVfsError::NotFound(_))
        ));
        assert!(matches!(
            open_outcome("x", Err(BridgeError::NotFound("x".into()))),
            Err(BzzVfsError::NotFound(name)) if name == "x"
        ));
    }

    #[test]
    fn test_result_codes() {
        let code = |e: BzzVfsError| result_code(&e);
        assert_eq!(code(BzzVfsError::NotFound("x".into())), ffi::SQLITE_NOTFOUND);
        assert_eq!(
            code(BzzVfsError::ShortRead { requested: 2, got: 1 }),
            ffi::SQLITE_IOERR_SHORT_READ
        );
        assert_eq!(code(BzzVfsError::Transport("x".into())), ffi::SQLITE_IOERR);
        assert_eq!(code(BzzVfsError::Unsupported(Operation::Write)), ffi::SQLITE_IOERR_WRITE);
        assert_eq!(
            code(BzzVfsError::Unsupported(Operation::Truncate)),
            ffi::SQLITE_IOERR_TRUNCATE
        );
        assert_eq!(code(BzzVfsError::Unsupported(Operation::Sync)), ffi::SQLITE_IOERR_FSYNC);
        assert_eq!(code(BzzVfsError::EngineInit(ffi::SQLITE_NOMEM)), ffi::SQLITE_NOMEM);
    }

    #[test]
    fn test_copy_bounded_never_overflows() {
        let msg = b"no such table: hello";
        for cap in 0..msg.len() + 8 {
            let mut buf = vec![0xFFu8; cap + 4];
            let n = copy_bounded(msg, &mut buf[..cap]);
            assert_eq!(n, cap.min(msg.len()));
            assert_eq!(&buf[..n], &msg[..n]);
            assert!(buf[cap..].iter().all(|&b| b == 0xFF), "overflow at cap {}", cap);
        }
    }

    #[test]
    fn test_copy_c_string() {
        let mut empty: [u8; 0] = [];
        assert_eq!(copy_c_string(b"abc", &mut empty), 0);

        let mut one = [0xFFu8; 1];
        assert_eq!(copy_c_string(b"abc", &mut one), 0);
        assert_eq!(one, [0]);

        let mut small = [0xFFu8; 3];
        assert_eq!(copy_c_string(b"abc", &mut small), 2);
        assert_eq!(&small, b"ab\0");

        let mut big = [0xFFu8; 8];
        assert_eq!(copy_c_string(b"abc", &mut big), 3);
        assert_eq!(&big[..4], b"abc\0");
    }

    #[test]
    fn test_last_error_message_bounded() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(conn.prepare("SELECT * FROM missing_table").is_err());

        let full = bounded_last_error(&conn, 1024);
        assert!(full.contains("missing_table"), "{}", full);

        for cap in [0usize, 1, 5, full.len(), full.len() + 10] {
            let mut buf = vec![0xAAu8; cap + 2];
            let n = last_error_message(&conn, &mut buf[..cap]);
            assert_eq!(n, cap.min(full.len()));
            assert_eq!(&buf[cap..], &[0xAA, 0xAA]);
        }
    }

    #[test]
    fn test_bounded_last_error_respects_char_boundaries() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(conn.prepare("SELECT * FROM h\u{e9}llo").is_err());

        let full = bounded_last_error(&conn, 1024);
        assert!(full.ends_with("h\u{e9}llo"), "{}", full);

        for cap in 0..full.len() + 4 {
            let text = bounded_last_error(&conn, cap);
            assert!(text.len() <= cap, "{} bytes exceeds capacity {}", text.len(), cap);
            assert!(full.starts_with(&text), "{:?} is not a prefix", text);
        }

        // Cutting inside the two-byte character drops it
        let cut = full.find('\u{e9}').unwrap() + 1;
        assert_eq!(bounded_last_error(&conn, cut), full[..cut - 1]);
    }

    #[test]
    fn test_utf8_prefix() {
        assert_eq!(utf8_prefix("abc".as_bytes(), 8), "abc");
        assert_eq!(utf8_prefix("h\u{e9}".as_bytes(), 2), "h");
        assert_eq!(utf8_prefix("\u{1f600}x".as_bytes(), 3), "");
        assert_eq!(utf8_prefix(&[b'a', 0xff, b'b'], 3), "a?b");
        assert_eq!(utf8_prefix(&[0xff, 0xfe], 2).len(), 2);
    }
}
