//! Sanity-check harness (spec.md §6.3 `opfs-sanity-check`, SPEC_FULL.md §4.7).
//!
//! Exercises a freshly installed vfs with a basic create/insert/select/drop
//! cycle before handing control back to the caller, so a broken pool is
//! caught at startup rather than on the first real query. Grounded on the
//! `create_foo_table`/`drop_foo_table`/`test_vfs` pattern used throughout
//! `sqlite-wasm-rs/tests/tests/*.rs`, repackaged as a library-internal,
//! non-panicking harness that reports through `tracing` instead of
//! `assert!`.

use crate::libsqlite3::{
    sqlite3, sqlite3_close, sqlite3_errmsg, sqlite3_exec, sqlite3_open_v2, SQLITE_OK,
    SQLITE_OPEN_CREATE, SQLITE_OPEN_READWRITE,
};
use std::ffi::{CStr, CString};
use tracing::{error, info};

#[derive(thiserror::Error, Debug)]
pub enum SanityError {
    #[error("failed to open sanity-check database: {0}")]
    Open(String),
    #[error("statement {0:?} failed: {1}")]
    Exec(&'static str, String),
}

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS opfs_vfs_sanity (id INTEGER PRIMARY KEY, val TEXT NOT NULL)",
    "INSERT INTO opfs_vfs_sanity (val) VALUES ('probe')",
    "SELECT val FROM opfs_vfs_sanity",
    "DELETE FROM opfs_vfs_sanity",
    "DROP TABLE opfs_vfs_sanity",
];

/// Runs a short CRUD cycle against `vfs_name`, using a throwaway database
/// named `path`. Returns `Ok(())` if every statement round-trips; logs each
/// failure through `tracing` before returning `Err`.
pub fn run(vfs_name: &str, path: &str) -> Result<(), SanityError> {
    info!(vfs_name, path, "running vfs sanity check");

    let vfs_c = CString::new(vfs_name).expect("vfs name has no interior NUL");
    let path_c = CString::new(path).expect("path has no interior NUL");

    let mut db: *mut sqlite3 = std::ptr::null_mut();
    let ret = unsafe {
        sqlite3_open_v2(
            path_c.as_ptr(),
            &mut db,
            SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE,
            vfs_c.as_ptr(),
        )
    };
    if ret != SQLITE_OK {
        let msg = unsafe { db_errmsg(db) };
        unsafe { sqlite3_close(db) };
        error!(vfs_name, code = ret, %msg, "sanity check could not open database");
        return Err(SanityError::Open(msg));
    }

    for stmt in STATEMENTS {
        let sql = CString::new(*stmt).expect("statement has no interior NUL");
        let ret = unsafe {
            sqlite3_exec(db, sql.as_ptr(), None, std::ptr::null_mut(), std::ptr::null_mut())
        };
        if ret != SQLITE_OK {
            let msg = unsafe { db_errmsg(db) };
            unsafe { sqlite3_close(db) };
            error!(vfs_name, statement = *stmt, %msg, "sanity check statement failed");
            return Err(SanityError::Exec(stmt, msg));
        }
    }

    unsafe { sqlite3_close(db) };
    info!(vfs_name, "vfs sanity check passed");
    Ok(())
}

unsafe fn db_errmsg(db: *mut sqlite3) -> String {
    if db.is_null() {
        return "sqlite3_open_v2 returned a null handle".into();
    }
    let ptr = sqlite3_errmsg(db);
    if ptr.is_null() {
        return "<no message>".into();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
