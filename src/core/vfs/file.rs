//! SQLite file I/O methods implementation
//!
//! [`BlobFile`] is the per-open state: a resolved bridge handle plus the
//! bridge to call through. Its methods are the read-only policy of the
//! backend in safe Rust; the `extern "C"` functions below only unpack the
//! engine's arguments, call them, and translate the result.

use super::guard;
use super::vfs::{BzzVfs, LastError};
use crate::core::bridge::{BlobHandle, StorageBridge};
use crate::core::capabilities::{Operation, CAPABILITIES};
use crate::core::diag::diag;
use crate::core::error::{BzzVfsError, Result};
use crate::core::translate::{read_outcome, result_code, size_outcome};
use libsqlite3_sys as ffi;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Device characteristics reported for every blob
pub const DEVICE_CHARACTERISTICS: c_int =
    ffi::SQLITE_IOCAP_ATOMIC4K | ffi::SQLITE_IOCAP_SEQUENTIAL | ffi::SQLITE_IOCAP_IMMUTABLE;

/// An open blob
pub struct BlobFile {
    handle: BlobHandle,
    bridge: Arc<dyn StorageBridge>,
    sector_size: u32,
    last_error: Arc<LastError>,
}

impl BlobFile {
    pub(crate) fn new(
        handle: BlobHandle,
        bridge: Arc<dyn StorageBridge>,
        sector_size: u32,
        last_error: Arc<LastError>,
    ) -> Self {
        Self {
            handle,
            bridge,
            sector_size,
            last_error,
        }
    }

    pub fn handle(&self) -> BlobHandle {
        self.handle
    }

    /// Fill `buf` from `offset`. Succeeds only if every byte was delivered.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let res = self.bridge.read(self.handle, buf, offset);
        read_outcome(buf.len(), res).map_err(|e| self.noted(e))
    }

    /// Total blob length as reported by the store
    pub fn file_size(&self) -> Result<u64> {
        size_outcome(self.bridge.size(self.handle)).map_err(|e| self.noted(e))
    }

    pub fn write(&self, _data: &[u8], _offset: u64) -> Result<()> {
        Err(refuse(Operation::Write))
    }

    pub fn truncate(&self, _size: u64) -> Result<()> {
        Err(refuse(Operation::Truncate))
    }

    pub fn sync(&self, _flags: c_int) -> Result<()> {
        Err(refuse(Operation::Sync))
    }

    /// Locks are never contended: one reader, immutable objects
    pub fn lock(&self, _level: c_int) -> Result<()> {
        Ok(())
    }

    pub fn unlock(&self, _level: c_int) -> Result<()> {
        Ok(())
    }

    /// Always reports a reserved lock as held so the engine never assumes
    /// exclusive access
    pub fn check_reserved_lock(&self) -> Result<bool> {
        Ok(true)
    }

    pub fn file_control(&self, _op: c_int) -> Result<()> {
        Err(refuse(Operation::FileControl))
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn device_characteristics(&self) -> c_int {
        DEVICE_CHARACTERISTICS
    }

    /// Release the bridge handle
    pub fn close(self) {
        debug!("Closing blob handle {}", self.handle);
        self.bridge.close(self.handle);
    }

    fn noted(&self, err: BzzVfsError) -> BzzVfsError {
        self.last_error.set(&err);
        err
    }
}

fn refuse(op: Operation) -> BzzVfsError {
    debug_assert!(CAPABILITIES.unsupported().any(|o| o == op));
    BzzVfsError::Unsupported(op)
}

fn code_of(res: Result<()>) -> c_int {
    match res {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => result_code(&e),
    }
}

/// Engine-visible file record, laid out as SQLite expects
#[repr(C)]
pub struct BzzFile {
    /// Base sqlite3_file structure (MUST be first field)
    pub base: ffi::sqlite3_file,
    /// Present between a successful open and close
    pub blob: Option<BlobFile>,
}

unsafe fn blob_of<'a>(file: *mut ffi::sqlite3_file) -> Option<&'a BlobFile> {
    if file.is_null() {
        return None;
    }
    (*(file as *mut BzzFile)).blob.as_ref()
}

// File I/O method implementations

unsafe extern "C" fn file_close(file: *mut ffi::sqlite3_file) -> c_int {
    diag!("close");
    if file.is_null() {
        return ffi::SQLITE_OK;
    }
    let bzz_file = &mut *(file as *mut BzzFile);
    if let Some(blob) = bzz_file.blob.take() {
        guard(Operation::Close, (), || blob.close());
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    diag!("read", "amount={} offset={}", amt, offset);
    let Some(blob) = blob_of(file) else {
        return ffi::SQLITE_IOERR_READ;
    };
    if offset < 0 || amt < 0 || (buf.is_null() && amt > 0) {
        return ffi::SQLITE_IOERR_READ;
    }
    if amt == 0 {
        return ffi::SQLITE_OK;
    }

    let out = std::slice::from_raw_parts_mut(buf as *mut u8, amt as usize);
    let res = guard(
        Operation::Read,
        Err(BzzVfsError::Transport("storage bridge panicked".into())),
        || blob.read(&mut out[..], offset as u64),
    );

    match res {
        Ok(()) => ffi::SQLITE_OK,
        Err(BzzVfsError::ShortRead { requested, got }) => {
            diag!("read", "short: {} of {} bytes", got, requested);
            // The engine requires the unread tail to be zeroed on a short read
            out[got.min(requested)..].fill(0);
            ffi::SQLITE_IOERR_SHORT_READ
        }
        Err(e) => {
            warn!("Read of {} bytes at {} failed: {}", amt, offset, e);
            result_code(&e)
        }
    }
}

unsafe extern "C" fn file_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    diag!("write", "amount={} offset={}", amt, offset);
    match blob_of(file) {
        Some(blob) if !buf.is_null() && amt >= 0 => {
            let data = std::slice::from_raw_parts(buf as *const u8, amt as usize);
            code_of(blob.write(data, offset.max(0) as u64))
        }
        _ => ffi::SQLITE_IOERR_WRITE,
    }
}

unsafe extern "C" fn file_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    diag!("truncate", "size={}", size);
    match blob_of(file) {
        Some(blob) => code_of(blob.truncate(size.max(0) as u64)),
        None => ffi::SQLITE_IOERR_TRUNCATE,
    }
}

unsafe extern "C" fn file_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    diag!("sync", "flags={}", flags);
    match blob_of(file) {
        Some(blob) => code_of(blob.sync(flags)),
        None => ffi::SQLITE_IOERR_FSYNC,
    }
}

unsafe extern "C" fn file_file_size(
    file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    diag!("file_size");
    let Some(blob) = blob_of(file) else {
        return ffi::SQLITE_NOTFOUND;
    };
    let res = guard(
        Operation::FileSize,
        Err(BzzVfsError::Transport("storage bridge panicked".into())),
        || blob.file_size(),
    );

    match res {
        Ok(size) => match ffi::sqlite3_int64::try_from(size) {
            Ok(size) if !p_size.is_null() => {
                *p_size = size;
                ffi::SQLITE_OK
            }
            _ => ffi::SQLITE_IOERR_FSTAT,
        },
        Err(e) => {
            warn!("Size query failed: {}", e);
            result_code(&e)
        }
    }
}

unsafe extern "C" fn file_lock(file: *mut ffi::sqlite3_file, lock_type: c_int) -> c_int {
    diag!("lock", "level={}", lock_type);
    blob_of(file).map_or(ffi::SQLITE_OK, |blob| code_of(blob.lock(lock_type)))
}

unsafe extern "C" fn file_unlock(file: *mut ffi::sqlite3_file, lock_type: c_int) -> c_int {
    diag!("unlock", "level={}", lock_type);
    blob_of(file).map_or(ffi::SQLITE_OK, |blob| code_of(blob.unlock(lock_type)))
}

unsafe extern "C" fn file_check_reserved_lock(
    file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    diag!("check_reserved_lock");
    let locked = blob_of(file).map_or(Ok(true), |blob| blob.check_reserved_lock());
    match locked {
        Ok(locked) => {
            if !p_res_out.is_null() {
                *p_res_out = locked as c_int;
            }
            ffi::SQLITE_OK
        }
        Err(e) => result_code(&e),
    }
}

unsafe extern "C" fn file_file_control(
    file: *mut ffi::sqlite3_file,
    op: c_int,
    _p_arg: *mut c_void,
) -> c_int {
    diag!("file_control", "op={}", op);
    blob_of(file).map_or(ffi::SQLITE_NOTFOUND, |blob| code_of(blob.file_control(op)))
}

unsafe extern "C" fn file_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    diag!("sector_size");
    blob_of(file).map_or(crate::core::config::DEFAULT_SECTOR_SIZE as c_int, |blob| {
        blob.sector_size() as c_int
    })
}

unsafe extern "C" fn file_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    diag!("device_characteristics");
    blob_of(file).map_or(DEVICE_CHARACTERISTICS, |blob| blob.device_characteristics())
}

// Shared memory and memory-mapped paths: accept and hand back nothing, so
// SQLite stays on its regular read path.

unsafe extern "C" fn file_shm_map(
    _file: *mut ffi::sqlite3_file,
    region: c_int,
    size: c_int,
    extend: c_int,
    pp: *mut *mut c_void,
) -> c_int {
    diag!("shm_map", "region={} size={} extend={}", region, size, extend);
    if !pp.is_null() {
        *pp = ptr::null_mut();
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_shm_lock(
    _file: *mut ffi::sqlite3_file,
    offset: c_int,
    n: c_int,
    flags: c_int,
) -> c_int {
    diag!("shm_lock", "offset={} n={} flags={}", offset, n, flags);
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_shm_barrier(_file: *mut ffi::sqlite3_file) {
    diag!("shm_barrier");
}

unsafe extern "C" fn file_shm_unmap(_file: *mut ffi::sqlite3_file, delete_flag: c_int) -> c_int {
    diag!("shm_unmap", "delete={}", delete_flag);
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_fetch(
    _file: *mut ffi::sqlite3_file,
    offset: ffi::sqlite3_int64,
    amt: c_int,
    pp: *mut *mut c_void,
) -> c_int {
    diag!("fetch", "amount={} offset={}", amt, offset);
    if !pp.is_null() {
        *pp = ptr::null_mut();
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_unfetch(
    _file: *mut ffi::sqlite3_file,
    offset: ffi::sqlite3_int64,
    _p: *mut c_void,
) -> c_int {
    diag!("unfetch", "offset={}", offset);
    ffi::SQLITE_OK
}

pub(crate) static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 3,
    xClose: Some(file_close),
    xRead: Some(file_read),
    xWrite: Some(file_write),
    xTruncate: Some(file_truncate),
    xSync: Some(file_sync),
    xFileSize: Some(file_file_size),
    xLock: Some(file_lock),
    xUnlock: Some(file_unlock),
    xCheckReservedLock: Some(file_check_reserved_lock),
    xFileControl: Some(file_file_control),
    xSectorSize: Some(file_sector_size),
    xDeviceCharacteristics: Some(file_device_characteristics),
    xShmMap: Some(file_shm_map),
    xShmLock: Some(file_shm_lock),
    xShmBarrier: Some(file_shm_barrier),
    xShmUnmap: Some(file_shm_unmap),
    xFetch: Some(file_fetch),
    xUnfetch: Some(file_unfetch),
};

// VFS open callback

pub unsafe extern "C" fn file_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    if file.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }

    // SQLite hands over uninitialized memory; make it a closed file first so
    // an early return never leaves xClose reachable.
    ptr::write(
        file as *mut BzzFile,
        BzzFile {
            base: ffi::sqlite3_file {
                pMethods: ptr::null(),
            },
            blob: None,
        },
    );

    let app_data = if vfs.is_null() {
        ptr::null_mut()
    } else {
        (*vfs).pAppData as *mut BzzVfs
    };
    if app_data.is_null() {
        return ffi::SQLITE_ERROR;
    }
    let vfs_impl = &*app_data;

    if z_name.is_null() {
        diag!("open", "anonymous flags={:#x}", flags);
        return ffi::SQLITE_CANTOPEN;
    }
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(n) => n,
        Err(_) => return ffi::SQLITE_CANTOPEN,
    };
    diag!("open", "name={} flags={:#x}", name, flags);

    let opened = guard(
        Operation::Open,
        Err(BzzVfsError::Transport("storage bridge panicked".into())),
        || vfs_impl.open(name),
    );
    let blob = match opened {
        Ok(blob) => blob,
        Err(e) => return result_code(&e),
    };

    let bzz_file = &mut *(file as *mut BzzFile);
    bzz_file.blob = Some(blob);
    bzz_file.base.pMethods = &IO_METHODS;

    if !p_out_flags.is_null() {
        *p_out_flags = (flags & !(ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE))
            | ffi::SQLITE_OPEN_READONLY;
    }

    ffi::SQLITE_OK
}
