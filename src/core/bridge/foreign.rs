//! Storage bridge over C-ABI callbacks
//!
//! Wraps a store client living on the other side of a language boundary
//! that exposes three exported functions with primitive arguments:
//! open-by-name writing a descriptor, read into a caller buffer, and size.
//! Negative lengths mean failure.

use super::{BlobHandle, BridgeError, BridgeResult, StorageBridge};
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use tracing::warn;

/// `open(name, *fd) -> status`; zero status means `*fd` is valid
pub type ForeignOpenFn = unsafe extern "C" fn(name: *const c_char, fd: *mut c_int) -> c_int;

/// `read(fd, buf, amount, offset) -> bytes read or negative`
pub type ForeignReadFn =
    unsafe extern "C" fn(fd: c_int, buf: *mut c_void, amount: c_int, offset: i64) -> i64;

/// `size(fd) -> total length or negative`
pub type ForeignSizeFn = unsafe extern "C" fn(fd: c_int) -> i64;

/// Bridge calling out through raw function pointers
#[derive(Clone, Copy)]
pub struct ForeignBridge {
    open_fn: ForeignOpenFn,
    read_fn: ForeignReadFn,
    size_fn: ForeignSizeFn,
}

impl ForeignBridge {
    /// # Safety
    ///
    /// The callbacks must be safe to call from any thread, must not retain
    /// the pointers they are given, and `read_fn` must write at most
    /// `amount` bytes into `buf`.
    pub unsafe fn new(open_fn: ForeignOpenFn, read_fn: ForeignReadFn, size_fn: ForeignSizeFn) -> Self {
        Self {
            open_fn,
            read_fn,
            size_fn,
        }
    }

    fn fd(handle: BlobHandle) -> BridgeResult<c_int> {
        c_int::try_from(handle).map_err(|_| BridgeError::NotFound(format!("handle {}", handle)))
    }
}

impl StorageBridge for ForeignBridge {
    fn open(&self, name: &str) -> BridgeResult<BlobHandle> {
        let c_name = CString::new(name)
            .map_err(|_| BridgeError::NotFound(format!("name contains NUL: {:?}", name)))?;
        let mut fd: c_int = -1;

        let status = unsafe { (self.open_fn)(c_name.as_ptr(), &mut fd) };
        if status != 0 || fd < 0 {
            return Err(BridgeError::NotFound(format!(
                "{} (status {})",
                name, status
            )));
        }
        Ok(fd as BlobHandle)
    }

    fn read(&self, handle: BlobHandle, buf: &mut [u8], offset: u64) -> BridgeResult<usize> {
        let fd = Self::fd(handle)?;
        let amount = c_int::try_from(buf.len())
            .map_err(|_| BridgeError::Transport(format!("read of {} bytes too large", buf.len())))?;
        let offset = i64::try_from(offset)
            .map_err(|_| BridgeError::Transport(format!("offset {} out of range", offset)))?;

        let n = unsafe { (self.read_fn)(fd, buf.as_mut_ptr() as *mut c_void, amount, offset) };
        if n < 0 {
            return Err(BridgeError::Transport(format!("read on fd {} returned {}", fd, n)));
        }
        if n > amount as i64 {
            warn!("Bridge reported {} bytes for a {} byte read", n, amount);
            return Err(BridgeError::Transport(format!(
                "read on fd {} claimed {} bytes, asked for {}",
                fd, n, amount
            )));
        }
        Ok(n as usize)
    }

    fn size(&self, handle: BlobHandle) -> BridgeResult<u64> {
        let fd = Self::fd(handle)?;
        let n = unsafe { (self.size_fn)(fd) };
        if n < 0 {
            return Err(BridgeError::NotFound(format!("size of fd {} returned {}", fd, n)));
        }
        Ok(n as u64)
    }
}
