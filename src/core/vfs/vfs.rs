//! SQLite VFS implementation
//!
//! Implements the sqlite3_vfs interface on top of a [`StorageBridge`]. The
//! VFS is read-only and non-persistent: deletes are accepted and ignored,
//! existence checks always answer yes, and dynamic loading and system-call
//! overrides are reported as absent.

use super::file::{BlobFile, BzzFile};
use super::guard;
use crate::core::bridge::StorageBridge;
use crate::core::capabilities::Operation;
use crate::core::config::VfsConfig;
use crate::core::diag::diag;
use crate::core::error::{BzzVfsError, Result};
use crate::core::translate::{copy_c_string, open_outcome};
use libsqlite3_sys as ffi;
use parking_lot::{const_mutex, Mutex, RwLock};
use rand::RngCore;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the bzz VFS as registered with SQLite by default
pub const VFS_NAME: &str = crate::core::config::DEFAULT_VFS_NAME;

/// Julian day number of the Unix epoch
const UNIX_EPOCH_JULIAN_DAY: f64 = 2440587.5;

/// Unix epoch in Julian-day milliseconds
const UNIX_EPOCH_JULIAN_MS: i64 = 210866760000000;

const DL_UNSUPPORTED: &[u8] = b"dynamic loading not supported";

/// Text of the most recent store failure seen by a VFS
#[derive(Debug, Default)]
pub struct LastError(Mutex<Option<String>>);

impl LastError {
    pub fn set(&self, err: &BzzVfsError) {
        *self.0.lock() = Some(err.to_string());
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }
}

/// bzz VFS instance
pub struct BzzVfs {
    /// VFS name (C string)
    name: CString,
    config: VfsConfig,
    bridge: RwLock<Arc<dyn StorageBridge>>,
    last_error: Arc<LastError>,
}

impl BzzVfs {
    pub fn new(config: VfsConfig, bridge: Arc<dyn StorageBridge>) -> Result<Self> {
        config.validate()?;
        let name = CString::new(config.name.as_str())
            .map_err(|e| BzzVfsError::InvalidName(format!("Invalid VFS name: {}", e)))?;

        Ok(Self {
            name,
            config,
            bridge: RwLock::new(bridge),
            last_error: Arc::new(LastError::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn bridge(&self) -> Arc<dyn StorageBridge> {
        Arc::clone(&self.bridge.read())
    }

    fn rebind(&self, bridge: Arc<dyn StorageBridge>) {
        *self.bridge.write() = bridge;
    }

    /// Resolve `name` in the store. Nothing is allocated on failure.
    pub fn open(&self, name: &str) -> Result<BlobFile> {
        let bridge = self.bridge();
        let handle = open_outcome(name, bridge.open(name)).map_err(|e| {
            warn!("Cannot resolve {}: {}", name, e);
            self.last_error.set(&e);
            e
        })?;

        debug!("Opened {} as handle {}", name, handle);
        Ok(BlobFile::new(
            handle,
            bridge,
            self.config.sector_size,
            Arc::clone(&self.last_error),
        ))
    }

    /// The store is immutable from here; deleting is a successful no-op
    pub fn delete(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Always affirms. SQLite only asks about names it is about to open,
    /// and the answer is not checked against the store.
    pub fn access(&self, _name: &str, _flags: c_int) -> bool {
        true
    }

    /// Copy `name` unchanged into `out`, truncated to fit with its NUL
    pub fn full_pathname(&self, name: &[u8], out: &mut [u8]) -> usize {
        copy_c_string(name, out)
    }

    /// Fill `out` with random bytes; returns the count written
    pub fn randomness(&self, out: &mut [u8]) -> usize {
        rand::thread_rng().fill_bytes(out);
        out.len()
    }

    /// Block for roughly `micros` and return the microseconds actually slept
    pub fn sleep(&self, micros: u64) -> u64 {
        let start = Instant::now();
        std::thread::sleep(Duration::from_micros(micros));
        start.elapsed().as_micros().min(u64::MAX as u128) as u64
    }

    /// Current time as a Julian day number
    pub fn current_time(&self) -> f64 {
        let millis = chrono::Utc::now().timestamp_millis();
        UNIX_EPOCH_JULIAN_DAY + millis as f64 / 86_400_000.0
    }

    /// Current time in Julian-day milliseconds
    pub fn current_time_int64(&self) -> i64 {
        UNIX_EPOCH_JULIAN_MS + chrono::Utc::now().timestamp_millis()
    }

    /// Copy the latest store failure into `out`; returns bytes copied
    pub fn last_error(&self, out: &mut [u8]) -> usize {
        match self.last_error.get() {
            Some(msg) => copy_c_string(msg.as_bytes(), out),
            None => copy_c_string(b"", out),
        }
    }

    pub fn last_error_text(&self) -> Option<String> {
        self.last_error.get()
    }
}

/// A VFS this process registered with SQLite
struct Registered {
    name: String,
    vfs: *mut ffi::sqlite3_vfs,
}

// Pointers are only dereferenced under the registry lock or by SQLite
unsafe impl Send for Registered {}

static REGISTRY: Mutex<Vec<Registered>> = const_mutex(Vec::new());

/// Register the bzz VFS under its default name
pub fn register_vfs(bridge: Arc<dyn StorageBridge>) -> Result<()> {
    register_vfs_with(VfsConfig::default(), bridge)
}

/// Register a bzz VFS described by `config`.
///
/// Registering a name that this process already registered keeps the
/// existing VFS and rebinds it to `bridge`; files already open keep the
/// bridge they were opened through.
pub fn register_vfs_with(config: VfsConfig, bridge: Arc<dyn StorageBridge>) -> Result<()> {
    config.validate()?;

    let rc = unsafe { ffi::sqlite3_initialize() };
    if rc != ffi::SQLITE_OK {
        return Err(BzzVfsError::EngineInit(rc));
    }

    let mut registry = REGISTRY.lock();
    if let Some(existing) = registry.iter().find(|r| r.name == config.name) {
        // SAFETY: pAppData was set from a live Box<BzzVfs> at registration
        // and is only freed after removal from the registry.
        let vfs_impl = unsafe { &*((*existing.vfs).pAppData as *const BzzVfs) };
        vfs_impl.rebind(bridge);
        debug!("VFS {} already registered, bridge rebound", config.name);
        return Ok(());
    }

    let make_default = config.make_default;
    let vfs_impl = BzzVfs::new(config, bridge)?;
    if !unsafe { ffi::sqlite3_vfs_find(vfs_impl.name.as_ptr()) }.is_null() {
        // Name belongs to some other VFS (e.g. "unix")
        return Err(BzzVfsError::RegistrationFailed(ffi::SQLITE_MISUSE));
    }

    let max_pathname = vfs_impl.config.max_pathname as c_int;
    let name = vfs_impl.config.name.clone();
    let vfs_ptr = Box::into_raw(Box::new(vfs_impl));

    // Create the sqlite3_vfs structure
    let sqlite_vfs = Box::new(ffi::sqlite3_vfs {
        iVersion: 3,
        szOsFile: std::mem::size_of::<BzzFile>() as c_int,
        mxPathname: max_pathname,
        pNext: ptr::null_mut(),
        zName: unsafe { (*vfs_ptr).name.as_ptr() },
        pAppData: vfs_ptr as *mut c_void,
        xOpen: Some(vfs_open),
        xDelete: Some(vfs_delete),
        xAccess: Some(vfs_access),
        xFullPathname: Some(vfs_full_pathname),
        xDlOpen: Some(vfs_dl_open),
        xDlError: Some(vfs_dl_error),
        xDlSym: Some(vfs_dl_sym),
        xDlClose: Some(vfs_dl_close),
        xRandomness: Some(vfs_randomness),
        xSleep: Some(vfs_sleep),
        xCurrentTime: Some(vfs_current_time),
        xGetLastError: Some(vfs_get_last_error),
        xCurrentTimeInt64: Some(vfs_current_time_int64),
        xSetSystemCall: Some(vfs_set_system_call),
        xGetSystemCall: Some(vfs_get_system_call),
        xNextSystemCall: Some(vfs_next_system_call),
    });

    let vfs_box_ptr = Box::into_raw(sqlite_vfs);

    unsafe {
        let rc = ffi::sqlite3_vfs_register(vfs_box_ptr, make_default as c_int);
        if rc != ffi::SQLITE_OK {
            // Clean up on failure
            drop(Box::from_raw(vfs_box_ptr));
            drop(Box::from_raw(vfs_ptr));
            return Err(BzzVfsError::RegistrationFailed(rc));
        }
    }

    info!("Registered VFS {}", name);
    registry.push(Registered {
        name,
        vfs: vfs_box_ptr,
    });
    Ok(())
}

/// Unregister a bzz VFS and free it.
///
/// Every connection opened through the VFS must be closed first.
pub fn unregister_vfs(name: &str) -> Result<()> {
    let mut registry = REGISTRY.lock();
    let Some(pos) = registry.iter().position(|r| r.name == name) else {
        return Ok(()); // Already unregistered
    };

    let entry = registry.remove(pos);
    unsafe {
        let rc = ffi::sqlite3_vfs_unregister(entry.vfs);
        if rc != ffi::SQLITE_OK {
            registry.push(entry);
            return Err(BzzVfsError::RegistrationFailed(rc));
        }

        // Clean up allocated memory
        let app_data = (*entry.vfs).pAppData;
        if !app_data.is_null() {
            drop(Box::from_raw(app_data as *mut BzzVfs));
        }
        drop(Box::from_raw(entry.vfs));
    }

    info!("Unregistered VFS {}", name);
    Ok(())
}

/// True if SQLite knows a VFS named `name`
pub fn is_registered(name: &str) -> bool {
    let Ok(c_name) = CString::new(name) else {
        return false;
    };
    !unsafe { ffi::sqlite3_vfs_find(c_name.as_ptr()) }.is_null()
}

/// Run `f` against a VFS this process registered
pub fn with_vfs<T>(name: &str, f: impl FnOnce(&BzzVfs) -> T) -> Option<T> {
    let registry = REGISTRY.lock();
    let entry = registry.iter().find(|r| r.name == name)?;
    // SAFETY: the registry lock keeps the entry alive for the call
    let vfs_impl = unsafe { &*((*entry.vfs).pAppData as *const BzzVfs) };
    Some(f(vfs_impl))
}

unsafe fn vfs_of<'a>(vfs: *mut ffi::sqlite3_vfs) -> Option<&'a BzzVfs> {
    if vfs.is_null() {
        return None;
    }
    ((*vfs).pAppData as *const BzzVfs).as_ref()
}

unsafe fn name_of<'a>(z_name: *const c_char) -> &'a [u8] {
    if z_name.is_null() {
        &[]
    } else {
        CStr::from_ptr(z_name).to_bytes()
    }
}

unsafe fn out_buffer<'a>(z_out: *mut c_char, n: c_int) -> &'a mut [u8] {
    if z_out.is_null() || n <= 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(z_out as *mut u8, n as usize)
    }
}

// VFS callback functions

pub(super) unsafe extern "C" fn vfs_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    super::file::file_open(vfs, z_name, file, flags, p_out_flags)
}

pub(super) unsafe extern "C" fn vfs_delete(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    let name = String::from_utf8_lossy(name_of(z_name));
    diag!("delete", "name={}", name);
    match vfs_of(vfs) {
        Some(vfs_impl) => match vfs_impl.delete(&name) {
            Ok(()) => ffi::SQLITE_OK,
            Err(_) => ffi::SQLITE_IOERR_DELETE,
        },
        None => ffi::SQLITE_OK,
    }
}

pub(super) unsafe extern "C" fn vfs_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    let name = String::from_utf8_lossy(name_of(z_name));
    diag!("access", "name={} flags={}", name, flags);
    let exists = vfs_of(vfs).map_or(true, |v| v.access(&name, flags));
    if !p_res_out.is_null() {
        *p_res_out = exists as c_int;
    }
    ffi::SQLITE_OK
}

pub(super) unsafe extern "C" fn vfs_full_pathname(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    diag!("full_pathname", "capacity={}", n_out);
    let name = name_of(z_name);
    let out = out_buffer(z_out, n_out);
    match vfs_of(vfs) {
        Some(vfs_impl) => vfs_impl.full_pathname(name, out),
        None => copy_c_string(name, out),
    };
    ffi::SQLITE_OK
}

pub(super) unsafe extern "C" fn vfs_dl_open(_vfs: *mut ffi::sqlite3_vfs, _z_filename: *const c_char) -> *mut c_void {
    diag!("dl_open");
    ptr::null_mut()
}

pub(super) unsafe extern "C" fn vfs_dl_error(_vfs: *mut ffi::sqlite3_vfs, n_byte: c_int, z_err_msg: *mut c_char) {
    diag!("dl_error");
    copy_c_string(DL_UNSUPPORTED, out_buffer(z_err_msg, n_byte));
}

/// Symbol pointer type `xDlSym` hands back
type DlSymbol = unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char);

pub(super) unsafe extern "C" fn vfs_dl_sym(
    _vfs: *mut ffi::sqlite3_vfs,
    _handle: *mut c_void,
    _z_symbol: *const c_char,
) -> Option<DlSymbol> {
    diag!("dl_sym");
    None
}

pub(super) unsafe extern "C" fn vfs_dl_close(_vfs: *mut ffi::sqlite3_vfs, _handle: *mut c_void) {
    diag!("dl_close");
}

pub(super) unsafe extern "C" fn vfs_randomness(vfs: *mut ffi::sqlite3_vfs, n_byte: c_int, z_out: *mut c_char) -> c_int {
    diag!("randomness", "n={}", n_byte);
    let out = out_buffer(z_out, n_byte);
    match vfs_of(vfs) {
        Some(vfs_impl) => guard(Operation::Randomness, 0, || vfs_impl.randomness(out)) as c_int,
        None => 0,
    }
}

pub(super) unsafe extern "C" fn vfs_sleep(vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    diag!("sleep", "us={}", microseconds);
    let micros = microseconds.max(0) as u64;
    let slept = match vfs_of(vfs) {
        Some(vfs_impl) => vfs_impl.sleep(micros),
        None => {
            std::thread::sleep(Duration::from_micros(micros));
            micros
        }
    };
    slept.min(c_int::MAX as u64) as c_int
}

pub(super) unsafe extern "C" fn vfs_current_time(vfs: *mut ffi::sqlite3_vfs, p_time_out: *mut f64) -> c_int {
    diag!("current_time");
    let Some(vfs_impl) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    if p_time_out.is_null() {
        return ffi::SQLITE_MISUSE;
    }
    *p_time_out = vfs_impl.current_time();
    ffi::SQLITE_OK
}

pub(super) unsafe extern "C" fn vfs_current_time_int64(
    vfs: *mut ffi::sqlite3_vfs,
    p_time_out: *mut ffi::sqlite3_int64,
) -> c_int {
    diag!("current_time_int64");
    let Some(vfs_impl) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    if p_time_out.is_null() {
        return ffi::SQLITE_MISUSE;
    }
    *p_time_out = vfs_impl.current_time_int64();
    ffi::SQLITE_OK
}

pub(super) unsafe extern "C" fn vfs_get_last_error(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_err_msg: *mut c_char,
) -> c_int {
    diag!("get_last_error", "capacity={}", n_byte);
    if let Some(vfs_impl) = vfs_of(vfs) {
        vfs_impl.last_error(out_buffer(z_err_msg, n_byte));
    }
    // No OS error number behind store failures
    0
}

pub(super) unsafe extern "C" fn vfs_set_system_call(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    _p_call: ffi::sqlite3_syscall_ptr,
) -> c_int {
    diag!("set_system_call");
    ffi::SQLITE_NOTFOUND
}

pub(super) unsafe extern "C" fn vfs_get_system_call(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
) -> ffi::sqlite3_syscall_ptr {
    diag!("get_system_call");
    None
}

pub(super) unsafe extern "C" fn vfs_next_system_call(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
) -> *const c_char {
    diag!("next_system_call");
    ptr::null()
}
