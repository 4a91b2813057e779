// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite VFS registration and the `extern "C"` callbacks.
//!
//! Every callback resolves the [`FileSystemCore`] from `pAppData` (or from
//! the open file) and forwards to it. No callback blocks on I/O.

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use std::{mem, ptr, slice};

use rand::RngCore;
use rusqlite::ffi;
use tracing::debug;

use thunder_core::BLOCK_SIZE;

use crate::canonical_path;
use crate::error::VfsError;
use crate::lock::LockLevel;
use crate::state::{FileSystemCore, HandleId, OpenOptions};

const MAX_PATHNAME: c_int = 512;

/// Julian day number of the Unix epoch, in milliseconds.
const UNIX_EPOCH_JULIAN_MS: i64 = 210_866_760_000_000;

/// The engine-allocated file object. `base` must come first.
#[repr(C)]
struct BridgeFile {
    base: ffi::sqlite3_file,
    core: *const FileSystemCore,
    handle: HandleId,
}

static IO_METHODS: OnceLock<ffi::sqlite3_io_methods> = OnceLock::new();

fn io_methods() -> *const ffi::sqlite3_io_methods {
    IO_METHODS.get_or_init(|| {
        // SAFETY: the struct holds only integers and optional fn pointers.
        let mut methods: ffi::sqlite3_io_methods = unsafe { mem::zeroed() };
        methods.iVersion = 1;
        methods.xClose = Some(x_close);
        methods.xRead = Some(x_read);
        methods.xWrite = Some(x_write);
        methods.xTruncate = Some(x_truncate);
        methods.xSync = Some(x_sync);
        methods.xFileSize = Some(x_file_size);
        methods.xLock = Some(x_lock);
        methods.xUnlock = Some(x_unlock);
        methods.xCheckReservedLock = Some(x_check_reserved_lock);
        methods.xFileControl = Some(x_file_control);
        methods.xSectorSize = Some(x_sector_size);
        methods.xDeviceCharacteristics = Some(x_device_characteristics);
        methods
    })
}

/// Keeps a VFS registered with SQLite; unregisters it on drop.
///
/// Every connection opened through the VFS must be closed before this is dropped.
pub(crate) struct VfsRegistration {
    vfs: *mut ffi::sqlite3_vfs,
    name: CString,
}

// SAFETY: the registered struct is never mutated after registration and the
// core it points to is itself thread-safe.
unsafe impl Send for VfsRegistration {}
unsafe impl Sync for VfsRegistration {}

impl VfsRegistration {
    pub(crate) fn register(name: &str, core: Arc<FileSystemCore>) -> Result<Self, VfsError> {
        let name = CString::new(name)
            .map_err(|_| VfsError::Io(format!("VFS name `{name}` contains a NUL byte")))?;

        // SAFETY: name is a valid C string.
        if !unsafe { ffi::sqlite3_vfs_find(name.as_ptr()) }.is_null() {
            return Err(VfsError::Io(format!(
                "a VFS named `{}` is already registered",
                name.to_string_lossy()
            )));
        }

        // SAFETY: all-zero is a valid sqlite3_vfs (null pointers, no callbacks).
        let mut vfs: ffi::sqlite3_vfs = unsafe { mem::zeroed() };
        vfs.iVersion = 2;
        vfs.szOsFile = mem::size_of::<BridgeFile>() as c_int;
        vfs.mxPathname = MAX_PATHNAME;
        vfs.zName = name.as_ptr();
        vfs.pAppData = Arc::into_raw(core) as *mut c_void;
        vfs.xOpen = Some(x_open);
        vfs.xDelete = Some(x_delete);
        vfs.xAccess = Some(x_access);
        vfs.xFullPathname = Some(x_full_pathname);
        vfs.xRandomness = Some(x_randomness);
        vfs.xSleep = Some(x_sleep);
        vfs.xCurrentTime = Some(x_current_time);
        vfs.xGetLastError = Some(x_get_last_error);
        vfs.xCurrentTimeInt64 = Some(x_current_time_int64);

        let vfs = Box::into_raw(Box::new(vfs));
        // SAFETY: vfs points to a fully initialized struct that outlives the registration.
        let rc = unsafe { ffi::sqlite3_vfs_register(vfs, 0) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: both pointers come from into_raw above and were not shared.
            unsafe {
                drop(Arc::from_raw((*vfs).pAppData as *const FileSystemCore));
                drop(Box::from_raw(vfs));
            }
            return Err(VfsError::Io(format!("sqlite3_vfs_register failed with {rc}")));
        }
        debug!(vfs = %name.to_string_lossy(), "VFS registered");
        Ok(Self { vfs, name })
    }
}

impl Drop for VfsRegistration {
    fn drop(&mut self) {
        // SAFETY: self.vfs was registered in `register` and is released exactly once.
        unsafe {
            ffi::sqlite3_vfs_unregister(self.vfs);
            drop(Arc::from_raw((*self.vfs).pAppData as *const FileSystemCore));
            drop(Box::from_raw(self.vfs));
        }
        debug!(vfs = %self.name.to_string_lossy(), "VFS unregistered");
    }
}

unsafe fn core_of<'a>(vfs: *mut ffi::sqlite3_vfs) -> &'a FileSystemCore {
    unsafe { &*((*vfs).pAppData as *const FileSystemCore) }
}

unsafe fn bridge_of<'a>(file: *mut ffi::sqlite3_file) -> (&'a FileSystemCore, HandleId) {
    unsafe {
        let bridge = &*(file as *const BridgeFile);
        (&*bridge.core, bridge.handle)
    }
}

unsafe fn name_of<'a>(z_name: *const c_char) -> Option<&'a str> {
    if z_name.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(z_name) }.to_str().ok()
    }
}

fn result_code(result: Result<(), VfsError>) -> c_int {
    match result {
        Ok(()) => ffi::SQLITE_OK,
        Err(err @ (VfsError::ShortRead | VfsError::Busy)) => err.code(),
        Err(err) => {
            debug!(error = %err, "VFS callback failed");
            err.code()
        }
    }
}

fn offset_of(offset: ffi::sqlite3_int64) -> Result<u64, VfsError> {
    u64::try_from(offset).map_err(|_| VfsError::Io(format!("negative offset {offset}")))
}

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    let core = unsafe { core_of(vfs) };
    // SQLite calls xClose only when pMethods is set.
    unsafe { (*file).pMethods = ptr::null() };

    let name = unsafe { name_of(z_name) };
    if !z_name.is_null() && name.is_none() {
        return ffi::SQLITE_CANTOPEN;
    }
    let options = OpenOptions {
        create: flags & ffi::SQLITE_OPEN_CREATE != 0,
        read_only: flags & ffi::SQLITE_OPEN_READONLY != 0,
        delete_on_close: flags & ffi::SQLITE_OPEN_DELETEONCLOSE != 0,
    };
    match core.open(name, options) {
        Ok(handle) => {
            let bridge = BridgeFile {
                base: ffi::sqlite3_file {
                    pMethods: io_methods(),
                },
                core: core as *const FileSystemCore,
                handle,
            };
            unsafe {
                ptr::write(file as *mut BridgeFile, bridge);
                if !out_flags.is_null() {
                    *out_flags = flags;
                }
            }
            ffi::SQLITE_OK
        }
        Err(err) => {
            debug!(file = ?name, error = %err, "open refused");
            err.code()
        }
    }
}

unsafe extern "C" fn x_delete(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    let core = unsafe { core_of(vfs) };
    match unsafe { name_of(z_name) } {
        Some(name) => match core.delete(name) {
            Ok(()) => ffi::SQLITE_OK,
            Err(err) => err.code(),
        },
        None => ffi::SQLITE_IOERR_DELETE,
    }
}

unsafe extern "C" fn x_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _flags: c_int,
    res_out: *mut c_int,
) -> c_int {
    let core = unsafe { core_of(vfs) };
    let exists = match unsafe { name_of(z_name) } {
        Some(name) => match core.exists(name) {
            Ok(exists) => exists,
            Err(err) => return err.code(),
        },
        None => false,
    };
    unsafe { *res_out = c_int::from(exists) };
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    let Some(name) = (unsafe { name_of(z_name) }) else {
        return ffi::SQLITE_CANTOPEN;
    };
    let full = canonical_path(name);
    let bytes = full.as_bytes();
    if bytes.len() + 1 > usize::try_from(n_out).unwrap_or(0) {
        return ffi::SQLITE_CANTOPEN;
    }
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), z_out as *mut u8, bytes.len());
        *z_out.add(bytes.len()) = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_randomness(
    _vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    let len = usize::try_from(n_byte).unwrap_or(0);
    let buf = unsafe { slice::from_raw_parts_mut(z_out as *mut u8, len) };
    rand::thread_rng().fill_bytes(buf);
    n_byte
}

unsafe extern "C" fn x_sleep(_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    std::thread::sleep(Duration::from_micros(u64::try_from(microseconds).unwrap_or(0)));
    microseconds
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

unsafe extern "C" fn x_current_time(_vfs: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    let julian_ms = UNIX_EPOCH_JULIAN_MS + unix_millis();
    unsafe { *out = julian_ms as f64 / 86_400_000.0 };
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_current_time_int64(
    _vfs: *mut ffi::sqlite3_vfs,
    out: *mut ffi::sqlite3_int64,
) -> c_int {
    unsafe { *out = UNIX_EPOCH_JULIAN_MS + unix_millis() };
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_get_last_error(
    _vfs: *mut ffi::sqlite3_vfs,
    _n_byte: c_int,
    _z_out: *mut c_char,
) -> c_int {
    0
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    result_code(core.close(handle))
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    let len = usize::try_from(amount).unwrap_or(0);
    let buf = unsafe { slice::from_raw_parts_mut(buf as *mut u8, len) };
    result_code(offset_of(offset).and_then(|offset| core.read(handle, buf, offset)))
}

unsafe extern "C" fn x_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    let len = usize::try_from(amount).unwrap_or(0);
    let bytes = unsafe { slice::from_raw_parts(buf as *const u8, len) };
    result_code(offset_of(offset).and_then(|offset| core.write(handle, bytes, offset)))
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    result_code(offset_of(size).and_then(|size| core.truncate(handle, size)))
}

unsafe extern "C" fn x_sync(_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    // Durability comes from the flush after each operation.
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_size(
    file: *mut ffi::sqlite3_file,
    size_out: *mut ffi::sqlite3_int64,
) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    match core.size(handle) {
        Ok(size) => {
            unsafe { *size_out = i64::try_from(size).unwrap_or(i64::MAX) };
            ffi::SQLITE_OK
        }
        Err(err) => err.code(),
    }
}

unsafe extern "C" fn x_lock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    match LockLevel::from_raw(level) {
        Some(level) => result_code(core.lock(handle, level)),
        None => ffi::SQLITE_IOERR_LOCK,
    }
}

unsafe extern "C" fn x_unlock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    match LockLevel::from_raw(level) {
        Some(level) => result_code(core.unlock(handle, level)),
        None => ffi::SQLITE_IOERR_UNLOCK,
    }
}

unsafe extern "C" fn x_check_reserved_lock(
    file: *mut ffi::sqlite3_file,
    res_out: *mut c_int,
) -> c_int {
    let (core, handle) = unsafe { bridge_of(file) };
    match core.check_reserved(handle) {
        Ok(reserved) => {
            unsafe { *res_out = c_int::from(reserved) };
            ffi::SQLITE_OK
        }
        Err(err) => err.code(),
    }
}

unsafe extern "C" fn x_file_control(
    _file: *mut ffi::sqlite3_file,
    _op: c_int,
    _arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(_file: *mut ffi::sqlite3_file) -> c_int {
    BLOCK_SIZE as c_int
}

unsafe extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    0
}
