//! Shared VFS trait machinery used by both the SAHPool (Strategy A) and
//! Async-Proxy (Strategy B) implementations.
//!
//! Grounded on `sqlite-wasm-rs/src/vfs/utils.rs`'s `VfsFile`/`VfsStore`/
//! `SQLiteVfs`/`SQLiteIoMethods`/`VfsAppData` family, generalized with an
//! `OsCallback` trait (sleep/random/current-time injection) in the shape
//! used by `crates/sqlite-wasm-vfs/src/sahpool.rs` so both strategies can
//! share one time/randomness source instead of each hardcoding calls into
//! `js_sys::Math`/`Date`.

pub mod header;
pub mod proxy;
pub mod sahpool;
pub mod sanity;

use crate::libsqlite3::*;
use fragile::Fragile;
use js_sys::{Math, Number, Uint8Array, WebAssembly};
use std::{
    ffi::{CStr, CString},
    ops::Deref,
    time::Duration,
};
use wasm_bindgen::JsCast;

/// Byte prefix every well-formed SQLite database file starts with.
pub const SQLITE3_HEADER: &str = "SQLite format 3\0";

/// Wraps a non-`Send`/`Sync` value so it can be handed to APIs that require
/// `Send + Sync` (the SQLite C core calls back into our vtables from
/// whatever thread it runs on). Access off the thread that created the value
/// panics, via `fragile::Fragile`'s own guard -- that's the point: it lets us
/// assert "single-threaded in practice" instead of unsafely pretending the
/// data really is thread-safe.
pub struct FragileComfirmed<T> {
    fragile: Fragile<T>,
}

unsafe impl<T> Send for FragileComfirmed<T> {}
unsafe impl<T> Sync for FragileComfirmed<T> {}

impl<T> FragileComfirmed<T> {
    pub fn new(t: T) -> Self {
        FragileComfirmed {
            fragile: Fragile::new(t),
        }
    }
}

impl<T> Deref for FragileComfirmed<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.fragile.get()
    }
}

/// Random name used when `xOpen` is asked to open an anonymous (temp) file.
pub fn get_random_name() -> String {
    let random = Number::from(Math::random()).to_string(36).unwrap();
    random.slice(2, random.length()).as_string().unwrap()
}

/// Random OPFS-safe filename for a pool slot's backing file, seeded from the
/// injected `OsCallback::random`.
pub fn random_name(random: fn(&mut [u8])) -> String {
    let mut bytes = [0u8; 16];
    random(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[wasm_bindgen::prelude::wasm_bindgen(inline_js = "
export function toSlice(memory, buffer, dst, len) {
    new Uint8Array(memory.buffer, dst, len).set(buffer);
}
export function toUint8Array(memory, src, len, dst) {
    dst.set(new Uint8Array(memory.buffer, src, len));
}
")]
extern "C" {
    #[wasm_bindgen(js_name = toSlice)]
    fn js_to_slice(memory: &WebAssembly::Memory, buffer: &Uint8Array, dst: *mut u8, len: usize);

    #[wasm_bindgen(js_name = toUint8Array)]
    fn js_to_uint8_array(
        memory: &WebAssembly::Memory,
        src: *const u8,
        len: usize,
        dst: &Uint8Array,
    );
}

/// Copy a `Uint8Array` into a freshly allocated `Vec<u8>`.
///
/// Implemented through a small JS shim rather than wasm-bindgen's direct
/// `copy_to`, because a growing WASM heap can detach the backing buffer
/// mid-copy on some engines -- doing the copy entirely on the JS side avoids
/// observing a detached view. See rustwasm/wasm-bindgen#4392/#4395.
pub fn copy_to_vec(src: &Uint8Array) -> Vec<u8> {
    let mut vec = vec![0u8; src.length() as usize];
    copy_to_slice(src, vec.as_mut_slice());
    vec
}

pub fn copy_to_slice(src: &Uint8Array, dst: &mut [u8]) {
    assert_eq!(src.length() as usize, dst.len());
    let mem = wasm_bindgen::memory().unchecked_into::<WebAssembly::Memory>();
    js_to_slice(&mem, src, dst.as_mut_ptr(), dst.len());
}

pub fn copy_to_uint8_array(src: &[u8]) -> Uint8Array {
    let dst = Uint8Array::new_with_length(src.len() as u32);
    let mem = wasm_bindgen::memory().unchecked_into::<WebAssembly::Memory>();
    js_to_uint8_array(&mem, src.as_ptr(), src.len(), &dst);
    dst
}

/// Return an error code if `expr` is true. Default code is `SQLITE_ERROR`.
#[macro_export]
macro_rules! bail {
    ($ex:expr) => {
        $crate::bail!($ex, $crate::libsqlite3::SQLITE_ERROR);
    };
    ($ex:expr, $code:expr) => {
        if $ex {
            return $code;
        }
    };
}

/// Unpack `Option<T>`, returning an error code on `None`.
#[macro_export]
macro_rules! check_option {
    ($ex:expr) => {
        $crate::check_option!($ex, $crate::libsqlite3::SQLITE_ERROR)
    };
    ($ex:expr, $code:expr) => {
        if let Some(v) = $ex {
            v
        } else {
            return $code;
        }
    };
}

/// Unpack `Result<T, _>`, returning an error code on `Err`.
#[macro_export]
macro_rules! check_result {
    ($ex:expr) => {
        $crate::check_result!($ex, $crate::libsqlite3::SQLITE_ERROR)
    };
    ($ex:expr, $code:expr) => {
        if let Ok(v) = $ex {
            v
        } else {
            return $code;
        }
    };
}

#[macro_export]
macro_rules! unused {
    ($ex:expr) => {
        let _ = $ex;
    };
}

/// The concrete `pFile` layout both VFS flavors use. `szOsFile` must be set
/// to `size_of::<SQLiteVfsFile>()`.
#[repr(C)]
pub struct SQLiteVfsFile {
    /// Must be the first field: in C layout, a pointer to `SQLiteVfsFile` is
    /// a pointer to `io_methods`.
    pub io_methods: sqlite3_file,
    pub vfs: *mut sqlite3_vfs,
    pub flags: i32,
    pub name_ptr: *const u8,
    pub name_length: usize,
}

impl SQLiteVfsFile {
    /// # Safety
    /// `file` must actually point at a `SQLiteVfsFile`.
    pub unsafe fn from_file(file: *mut sqlite3_file) -> &'static SQLiteVfsFile {
        &*file.cast::<Self>()
    }

    /// # Safety
    /// The returned name is only valid until `xClose` frees it with
    /// `drop(Box::from_raw(...))`.
    pub unsafe fn name(&self) -> &'static mut str {
        std::str::from_utf8_unchecked_mut(std::slice::from_raw_parts_mut(
            self.name_ptr.cast_mut(),
            self.name_length,
        ))
    }

    pub fn sqlite3_file(&'static self) -> *mut sqlite3_file {
        self as *const SQLiteVfsFile as *mut sqlite3_file
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegisterVfsError {
    #[error("vfs name contains an interior NUL and is not representable as a CStr")]
    ToCStr,
    #[error("sqlite3_vfs_register rejected the vfs")]
    RegisterVfs,
}

#[derive(thiserror::Error, Debug)]
pub enum ImportDbError {
    #[error("database byte array has an invalid length for a SQLite file")]
    InvalidLength,
    #[error("input does not start with the SQLite database header")]
    BadHeader,
}

/// Minimal structural check run before accepting imported database bytes.
pub fn check_import_db(bytes: &[u8]) -> Result<(), ImportDbError> {
    let len = bytes.len();
    if len < 512 || len % 512 != 0 {
        return Err(ImportDbError::InvalidLength);
    }
    if !bytes.starts_with(SQLITE3_HEADER.as_bytes()) {
        return Err(ImportDbError::BadHeader);
    }
    Ok(())
}

/// Register `vfs_name`, leaking the name and app data into the C vtable.
/// Ownership is handed to SQLite: we only reclaim these allocations if
/// registration itself fails, via a [`crate::structbinder::StructBinder`]
/// that unwinds them in the reverse order they were bound.
pub fn register_vfs<IO: SQLiteIoMethods, V: SQLiteVfs<IO>>(
    vfs_name: &str,
    app_data: IO::AppData,
    default_vfs: bool,
) -> Result<*mut sqlite3_vfs, RegisterVfsError> {
    let name = CString::new(vfs_name).map_err(|_| RegisterVfsError::ToCStr)?;
    let name_ptr = name.into_raw();

    let mut binder = crate::structbinder::StructBinder::new();
    binder.defer(move || unsafe { drop(CString::from_raw(name_ptr)) });

    let app_data = VfsAppData::new(app_data).leak();
    binder.defer(move || unsafe { drop(VfsAppData::<IO::AppData>::from_raw(app_data)) });

    let vfs = Box::leak(Box::new(V::vfs(name_ptr, app_data.cast())));
    let vfs_ptr: *mut sqlite3_vfs = vfs;
    binder.defer(move || unsafe { drop(Box::from_raw(vfs_ptr)) });

    crate::structbinder::trace_bind(vfs_name, vfs_ptr);
    let ret = unsafe { sqlite3_vfs_register(vfs, i32::from(default_vfs)) };

    if ret != SQLITE_OK {
        binder.dispose();
        return Err(RegisterVfsError::RegisterVfs);
    }

    // Registration succeeded: SQLite now owns these allocations for the
    // life of the process, so let the binder go without running its
    // cleanups.
    std::mem::forget(binder);
    Ok(vfs as *mut sqlite3_vfs)
}

/// Look up an already-registered vfs by name.
pub fn registered_vfs(vfs_name: &str) -> Result<Option<*mut sqlite3_vfs>, RegisterVfsError> {
    let name = CString::new(vfs_name).map_err(|_| RegisterVfsError::ToCStr)?;
    let vfs = unsafe { sqlite3_vfs_find(name.as_ptr()) };
    Ok((!vfs.is_null()).then_some(vfs))
}

/// Used to log and retrieve the most recent VFS error, surfaced through
/// `xGetLastError`.
pub struct VfsError {
    code: i32,
    message: String,
}

impl VfsError {
    pub fn new(code: i32, message: String) -> Self {
        VfsError { code, message }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Wrapper for `pAppData`, also holding the last error reported by any VFS
/// call so `xGetLastError` has something to report.
pub struct VfsAppData<T> {
    data: T,
    last_err: crate::lock_api::Mutex<Option<(i32, String)>>,
}

impl<T> VfsAppData<T> {
    pub fn new(t: T) -> Self {
        VfsAppData {
            data: t,
            last_err: crate::lock_api::Mutex::new(None),
        }
    }

    pub fn leak(self) -> *mut Self {
        Box::into_raw(Box::new(self))
    }

    /// # Safety
    /// `t` must be a pointer previously returned by `leak`.
    pub unsafe fn from_raw(t: *mut Self) -> VfsAppData<T> {
        *Box::from_raw(t)
    }

    pub fn pop_err(&self) -> Option<(i32, String)> {
        self.last_err.lock().take()
    }

    pub fn store_err(&self, err: VfsError) -> i32 {
        let VfsError { code, message } = err;
        self.last_err.lock().replace((code, message));
        code
    }
}

impl<T> Deref for VfsAppData<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Basic file capabilities a VFS's backing storage must provide.
pub trait VfsFile {
    /// Returns `Ok(true)` on a full read, `Ok(false)` on a short read (the
    /// implementation must still zero-fill the unread tail of `buf`).
    fn read(&self, buf: &mut [u8], offset: usize) -> VfsResult<bool>;
    fn write(&mut self, buf: &[u8], offset: usize) -> VfsResult<()>;
    fn truncate(&mut self, size: usize) -> VfsResult<()>;
    fn flush(&mut self) -> VfsResult<()>;
    fn size(&self) -> VfsResult<usize>;
}

/// Backs the file-name -> file-object mapping a VFS maintains.
pub trait VfsStore<File, AppData> {
    /// # Safety
    /// Only safe if `vfs.pAppData` was set through `register_vfs`.
    unsafe fn app_data(vfs: *mut sqlite3_vfs) -> &'static VfsAppData<AppData> {
        &*(*vfs).pAppData.cast()
    }
    fn name2path(vfs: *mut sqlite3_vfs, file: &str) -> VfsResult<String> {
        unused!(vfs);
        Ok(file.into())
    }
    fn add_file(vfs: *mut sqlite3_vfs, file: &str, flags: i32) -> VfsResult<()>;
    fn contains_file(vfs: *mut sqlite3_vfs, file: &str) -> VfsResult<bool>;
    fn delete_file(vfs: *mut sqlite3_vfs, file: &str) -> VfsResult<()>;
    fn with_file<F: Fn(&File) -> VfsResult<i32>>(vfs_file: &SQLiteVfsFile, f: F) -> VfsResult<i32>;
    fn with_file_mut<F: Fn(&mut File) -> VfsResult<i32>>(
        vfs_file: &SQLiteVfsFile,
        f: F,
    ) -> VfsResult<i32>;
}

/// Injects a VFS's source of sleep/randomness/wall-clock time, so Strategy A
/// and Strategy B can share one implementation instead of each reaching for
/// `js_sys::Math`/`Date` directly.
pub trait OsCallback: 'static {
    fn sleep(dur: Duration);
    fn random(buf: &mut [u8]);
    /// Milliseconds since the Unix epoch.
    fn epoch_timestamp_in_ms() -> i64;
}

/// `OsCallback` backed by browser APIs: `Math.random`, `Date.now`, and (only
/// with `atomics` enabled) `std::thread::sleep`.
pub struct BrowserOsCallback;

impl OsCallback for BrowserOsCallback {
    #[cfg(target_feature = "atomics")]
    fn sleep(dur: Duration) {
        std::thread::sleep(dur);
    }

    #[cfg(not(target_feature = "atomics"))]
    fn sleep(_dur: Duration) {}

    fn random(buf: &mut [u8]) {
        for b in buf {
            *b = (Math::random() * 255_000.0) as u8;
        }
    }

    fn epoch_timestamp_in_ms() -> i64 {
        js_sys::Date::new_0().get_time() as i64
    }
}

/// Julian-day epoch offset SQLite's default VFS uses for `xCurrentTime`.
const JULIAN_DAY_UNIX_EPOCH: f64 = 2440587.5;

/// Abstraction of `sqlite3_vfs`. Default method bodies are generic over the
/// injected `OsCallback`, and over `SQLiteIoMethods` for the per-file
/// method table.
#[allow(clippy::missing_safety_doc)]
pub trait SQLiteVfs<IO: SQLiteIoMethods> {
    const VERSION: ::std::os::raw::c_int;
    const MAX_PATH_SIZE: ::std::os::raw::c_int = 1024;

    type Os: OsCallback;

    fn vfs(
        vfs_name: *const ::std::os::raw::c_char,
        app_data: *mut VfsAppData<IO::AppData>,
    ) -> sqlite3_vfs {
        sqlite3_vfs {
            iVersion: Self::VERSION,
            szOsFile: std::mem::size_of::<SQLiteVfsFile>() as i32,
            mxPathname: Self::MAX_PATH_SIZE,
            pNext: std::ptr::null_mut(),
            zName: vfs_name,
            pAppData: app_data.cast(),
            xOpen: Some(Self::xOpen),
            xDelete: Some(Self::xDelete),
            xAccess: Some(Self::xAccess),
            xFullPathname: Some(Self::xFullPathname),
            xDlOpen: None,
            xDlError: None,
            xDlSym: None,
            xDlClose: None,
            xRandomness: Some(Self::xRandomness),
            xSleep: Some(Self::xSleep),
            xCurrentTime: Some(Self::xCurrentTime),
            xGetLastError: Some(Self::xGetLastError),
            xCurrentTimeInt64: Some(Self::xCurrentTimeInt64),
            xSetSystemCall: None,
            xGetSystemCall: None,
            xNextSystemCall: None,
        }
    }

    unsafe extern "C" fn xOpen(
        pVfs: *mut sqlite3_vfs,
        zName: sqlite3_filename,
        pFile: *mut sqlite3_file,
        flags: ::std::os::raw::c_int,
        pOutFlags: *mut ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        Self::xOpenImpl(pVfs, zName, pFile, flags, pOutFlags)
    }

    /// Shared `xOpen` body, split out from `xOpen` so a flavor that needs to
    /// observe every open (e.g. tracking which virtual paths are live) can
    /// override `xOpen` and still call back into the base logic.
    unsafe fn xOpenImpl(
        pVfs: *mut sqlite3_vfs,
        zName: sqlite3_filename,
        pFile: *mut sqlite3_file,
        flags: ::std::os::raw::c_int,
        pOutFlags: *mut ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        let app_data = IO::Store::app_data(pVfs);

        let name = if zName.is_null() {
            get_random_name()
        } else {
            check_result!(CStr::from_ptr(zName).to_str()).into()
        };

        let name = match IO::Store::name2path(pVfs, &name) {
            Ok(name) => name,
            Err(err) => return app_data.store_err(err),
        };

        let exist = match IO::Store::contains_file(pVfs, &name) {
            Ok(exist) => exist,
            Err(err) => return app_data.store_err(err),
        };

        if !exist {
            if flags & SQLITE_OPEN_CREATE == 0 {
                return app_data.store_err(VfsError::new(
                    SQLITE_CANTOPEN,
                    format!("file not found: {name}"),
                ));
            }
            if let Err(err) = IO::Store::add_file(pVfs, &name, flags) {
                return app_data.store_err(err);
            }
        }

        let leak: &'static str = name.leak();
        let vfs_file = pFile.cast::<SQLiteVfsFile>();
        (*vfs_file).vfs = pVfs;
        (*vfs_file).flags = flags;
        (*vfs_file).name_ptr = leak.as_ptr();
        (*vfs_file).name_length = leak.len();

        (*pFile).pMethods = &IO::METHODS;

        if !pOutFlags.is_null() {
            *pOutFlags = flags;
        }

        SQLITE_OK
    }

    unsafe extern "C" fn xDelete(
        pVfs: *mut sqlite3_vfs,
        zName: *const ::std::os::raw::c_char,
        syncDir: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!(syncDir);
        let app_data = IO::Store::app_data(pVfs);
        bail!(zName.is_null(), SQLITE_IOERR_DELETE);
        let s = check_result!(CStr::from_ptr(zName).to_str());
        match IO::Store::delete_file(pVfs, s) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xAccess(
        pVfs: *mut sqlite3_vfs,
        zName: *const ::std::os::raw::c_char,
        flags: ::std::os::raw::c_int,
        pResOut: *mut ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!(flags);
        *pResOut = if zName.is_null() {
            0
        } else {
            let app_data = IO::Store::app_data(pVfs);
            let file = check_result!(CStr::from_ptr(zName).to_str());
            match IO::Store::contains_file(pVfs, file) {
                Ok(exist) => i32::from(exist),
                Err(err) => return app_data.store_err(err),
            }
        };
        SQLITE_OK
    }

    unsafe extern "C" fn xFullPathname(
        pVfs: *mut sqlite3_vfs,
        zName: *const ::std::os::raw::c_char,
        nOut: ::std::os::raw::c_int,
        zOut: *mut ::std::os::raw::c_char,
    ) -> ::std::os::raw::c_int {
        unused!(pVfs);
        bail!(zName.is_null() || zOut.is_null(), SQLITE_CANTOPEN);
        let len = CStr::from_ptr(zName).count_bytes() + 1;
        bail!(len > nOut as usize, SQLITE_CANTOPEN);
        zName.copy_to(zOut, len);
        SQLITE_OK
    }

    unsafe extern "C" fn xGetLastError(
        pVfs: *mut sqlite3_vfs,
        nOut: ::std::os::raw::c_int,
        zOut: *mut ::std::os::raw::c_char,
    ) -> ::std::os::raw::c_int {
        let app_data = IO::Store::app_data(pVfs);
        let Some((code, msg)) = app_data.pop_err() else {
            return SQLITE_OK;
        };
        if !zOut.is_null() {
            let nOut = nOut as usize;
            let count = msg.len().min(nOut);
            msg.as_ptr().copy_to(zOut.cast(), count);
            let zero = match nOut.cmp(&msg.len()) {
                std::cmp::Ordering::Less | std::cmp::Ordering::Equal => nOut,
                std::cmp::Ordering::Greater => msg.len() + 1,
            };
            if zero > 0 {
                std::ptr::write(zOut.add(zero - 1), 0);
            }
        }
        code
    }

    unsafe extern "C" fn xRandomness(
        _pVfs: *mut sqlite3_vfs,
        nByte: ::std::os::raw::c_int,
        zOut: *mut ::std::os::raw::c_char,
    ) -> ::std::os::raw::c_int {
        let mut buf = vec![0u8; nByte.max(0) as usize];
        Self::Os::random(&mut buf);
        std::ptr::copy_nonoverlapping(buf.as_ptr(), zOut.cast(), buf.len());
        nByte
    }

    unsafe extern "C" fn xSleep(
        _pVfs: *mut sqlite3_vfs,
        microseconds: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        Self::Os::sleep(Duration::from_micros(microseconds.max(0) as u64));
        SQLITE_OK
    }

    unsafe extern "C" fn xCurrentTime(
        _pVfs: *mut sqlite3_vfs,
        pTimeOut: *mut f64,
    ) -> ::std::os::raw::c_int {
        *pTimeOut = JULIAN_DAY_UNIX_EPOCH + (Self::Os::epoch_timestamp_in_ms() as f64 / 86_400_000.0);
        SQLITE_OK
    }

    unsafe extern "C" fn xCurrentTimeInt64(
        _pVfs: *mut sqlite3_vfs,
        pOut: *mut sqlite3_int64,
    ) -> ::std::os::raw::c_int {
        *pOut = (JULIAN_DAY_UNIX_EPOCH * 86_400_000.0) as sqlite3_int64
            + Self::Os::epoch_timestamp_in_ms();
        SQLITE_OK
    }
}

/// Abstraction of `sqlite3_io_methods`.
#[allow(clippy::missing_safety_doc)]
pub trait SQLiteIoMethods {
    type File: VfsFile;
    type AppData: 'static;
    type Store: VfsStore<Self::File, Self::AppData>;

    const VERSION: ::std::os::raw::c_int;

    const METHODS: sqlite3_io_methods = sqlite3_io_methods {
        iVersion: Self::VERSION,
        xClose: Some(Self::xClose),
        xRead: Some(Self::xRead),
        xWrite: Some(Self::xWrite),
        xTruncate: Some(Self::xTruncate),
        xSync: Some(Self::xSync),
        xFileSize: Some(Self::xFileSize),
        xLock: Some(Self::xLock),
        xUnlock: Some(Self::xUnlock),
        xCheckReservedLock: Some(Self::xCheckReservedLock),
        xFileControl: Some(Self::xFileControl),
        xSectorSize: Some(Self::xSectorSize),
        xDeviceCharacteristics: Some(Self::xDeviceCharacteristics),
        xShmMap: None,
        xShmLock: None,
        xShmBarrier: None,
        xShmUnmap: None,
        xFetch: None,
        xUnfetch: None,
    };

    unsafe extern "C" fn xClose(pFile: *mut sqlite3_file) -> ::std::os::raw::c_int {
        Self::xCloseImpl(pFile)
    }

    /// Shared `xClose` body, split out so a flavor that tracks extra
    /// per-file state (e.g. which virtual paths are currently open) can
    /// override `xClose`, update its own bookkeeping, and still call back
    /// into the base close logic.
    unsafe fn xCloseImpl(pFile: *mut sqlite3_file) -> ::std::os::raw::c_int {
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        if vfs_file.flags & SQLITE_OPEN_DELETEONCLOSE != 0 {
            if let Err(err) = Self::Store::delete_file(vfs_file.vfs, vfs_file.name()) {
                return app_data.store_err(err);
            }
        }

        drop(Box::from_raw(vfs_file.name()));
        SQLITE_OK
    }

    unsafe extern "C" fn xRead(
        pFile: *mut sqlite3_file,
        zBuf: *mut ::std::os::raw::c_void,
        iAmt: ::std::os::raw::c_int,
        iOfst: sqlite3_int64,
    ) -> ::std::os::raw::c_int {
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        let f = |file: &Self::File| {
            let slice = std::slice::from_raw_parts_mut(zBuf.cast::<u8>(), iAmt as usize);
            match file.read(slice, iOfst as usize) {
                Ok(true) => Ok(SQLITE_OK),
                Ok(false) => Ok(SQLITE_IOERR_SHORT_READ),
                Err(err) => Err(err),
            }
        };

        match Self::Store::with_file(vfs_file, f) {
            Ok(code) => code,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xWrite(
        pFile: *mut sqlite3_file,
        zBuf: *const ::std::os::raw::c_void,
        iAmt: ::std::os::raw::c_int,
        iOfst: sqlite3_int64,
    ) -> ::std::os::raw::c_int {
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        let f = |file: &mut Self::File| {
            let slice = std::slice::from_raw_parts(zBuf.cast::<u8>(), iAmt as usize);
            file.write(slice, iOfst as usize).map(|()| SQLITE_OK)
        };

        match Self::Store::with_file_mut(vfs_file, f) {
            Ok(code) => code,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xTruncate(
        pFile: *mut sqlite3_file,
        size: sqlite3_int64,
    ) -> ::std::os::raw::c_int {
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        let f = |file: &mut Self::File| file.truncate(size as usize).map(|()| SQLITE_OK);

        match Self::Store::with_file_mut(vfs_file, f) {
            Ok(code) => code,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xSync(
        pFile: *mut sqlite3_file,
        flags: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!(flags);
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        let f = |file: &mut Self::File| file.flush().map(|()| SQLITE_OK);

        match Self::Store::with_file_mut(vfs_file, f) {
            Ok(code) => code,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xFileSize(
        pFile: *mut sqlite3_file,
        pSize: *mut sqlite3_int64,
    ) -> ::std::os::raw::c_int {
        let vfs_file = SQLiteVfsFile::from_file(pFile);
        let app_data = Self::Store::app_data(vfs_file.vfs);

        let f = |file: &Self::File| {
            file.size().map(|size| {
                *pSize = size as sqlite3_int64;
                SQLITE_OK
            })
        };

        match Self::Store::with_file(vfs_file, f) {
            Ok(code) => code,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xLock(
        pFile: *mut sqlite3_file,
        eLock: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!((pFile, eLock));
        SQLITE_OK
    }

    unsafe extern "C" fn xUnlock(
        pFile: *mut sqlite3_file,
        eLock: ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!((pFile, eLock));
        SQLITE_OK
    }

    unsafe extern "C" fn xCheckReservedLock(
        pFile: *mut sqlite3_file,
        pResOut: *mut ::std::os::raw::c_int,
    ) -> ::std::os::raw::c_int {
        unused!(pFile);
        *pResOut = 0;
        SQLITE_OK
    }

    unsafe extern "C" fn xFileControl(
        pFile: *mut sqlite3_file,
        op: ::std::os::raw::c_int,
        pArg: *mut ::std::os::raw::c_void,
    ) -> ::std::os::raw::c_int {
        unused!((pFile, op, pArg));
        SQLITE_NOTFOUND
    }

    unsafe extern "C" fn xSectorSize(pFile: *mut sqlite3_file) -> ::std::os::raw::c_int {
        unused!(pFile);
        512
    }

    unsafe extern "C" fn xDeviceCharacteristics(pFile: *mut sqlite3_file) -> ::std::os::raw::c_int {
        unused!(pFile);
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{check_import_db, ImportDbError, SQLITE3_HEADER};

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            check_import_db(&[0u8; 10]),
            Err(ImportDbError::InvalidLength)
        ));
    }

    #[test]
    fn rejects_bad_header() {
        let mut bytes = vec![0u8; 512];
        bytes[0] = b'X';
        assert!(matches!(
            check_import_db(&bytes),
            Err(ImportDbError::BadHeader)
        ));
    }

    #[test]
    fn accepts_well_formed_header() {
        let mut bytes = vec![0u8; 512];
        bytes[..SQLITE3_HEADER.len()].copy_from_slice(SQLITE3_HEADER.as_bytes());
        assert!(check_import_db(&bytes).is_ok());
    }
}
