//! End-to-end scenarios for Strategy A (spec.md §8), driven through the real
//! `sqlite3_*` C entry points against a freshly installed `opfs-sahpool`.

use super::cstr;
use opfs_vfs::export::*;
use opfs_vfs::vfs::sahpool::{install, SAHPoolConfigBuilder};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::wasm_bindgen_test;
use web_sys::{
    FileSystemDirectoryHandle, FileSystemFileHandle, FileSystemGetDirectoryOptions,
    FileSystemReadWriteOptions, FileSystemSyncAccessHandle, WorkerGlobalScope,
};

fn cfg(vfs_name: &str) -> opfs_vfs::vfs::sahpool::SAHPoolConfig {
    SAHPoolConfigBuilder::new()
        .vfs_name(vfs_name)
        .directory(&format!(".{vfs_name}"))
        .clear_on_init(true)
        .default_capacity(6)
        .build()
}

fn open(vfs_name: &str, filename: &str, flags: i32) -> *mut sqlite3 {
    let filename = cstr(filename);
    let vfs = cstr(vfs_name);
    let mut db = std::ptr::null_mut();
    let ret = unsafe { sqlite3_open_v2(filename.as_ptr(), &mut db, flags, vfs.as_ptr()) };
    assert_eq!(SQLITE_OK, ret, "sqlite3_open_v2 failed");
    db
}

#[wasm_bindgen_test]
async fn fresh_init_reports_default_capacity() {
    let pool = install::<BrowserOsCallback>(&cfg("opfs-sahpool-fresh"), false)
        .await
        .expect("install");
    assert_eq!(pool.capacity(), 6);
    assert_eq!(pool.count(), 0);
}

#[wasm_bindgen_test]
async fn create_read_delete_round_trips_through_the_pool() {
    let vfs_name = "opfs-sahpool-crd";
    let pool = install::<BrowserOsCallback>(&cfg(vfs_name), false)
        .await
        .expect("install");

    let db = open(vfs_name, "/t.db", SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE);

    let sql = cstr("CREATE TABLE t(v TEXT); INSERT INTO t VALUES ('HELLO!');");
    let ret = unsafe {
        sqlite3_exec(db, sql.as_ptr(), None, std::ptr::null_mut(), std::ptr::null_mut())
    };
    assert_eq!(SQLITE_OK, ret);

    unsafe { sqlite3_close(db) };

    assert!(pool.exists("/t.db").unwrap());
    assert!(pool.delete_db("/t.db").unwrap());
    assert!(!pool.exists("/t.db").unwrap());
    assert_eq!(pool.count(), 0);
}

#[wasm_bindgen_test]
async fn delete_on_close_reclaims_the_slot() {
    let vfs_name = "opfs-sahpool-doc";
    let pool = install::<BrowserOsCallback>(&cfg(vfs_name), false)
        .await
        .expect("install");

    let db = open(
        vfs_name,
        "/j",
        SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE | SQLITE_OPEN_DELETEONCLOSE,
    );
    unsafe { sqlite3_close(db) };

    assert!(!pool.exists("/j").unwrap());
    assert_eq!(pool.count(), 0);
}

#[wasm_bindgen_test]
async fn full_pool_refuses_a_seventh_file() {
    let vfs_name = "opfs-sahpool-full";
    let cfg = SAHPoolConfigBuilder::new()
        .vfs_name(vfs_name)
        .directory(&format!(".{vfs_name}"))
        .clear_on_init(true)
        .default_capacity(2)
        .build();
    let _pool = install::<BrowserOsCallback>(&cfg, false).await.expect("install");

    let _a = open(vfs_name, "/a.db", SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE);
    let _b = open(vfs_name, "/b.db", SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE);

    let filename = cstr("/c.db");
    let vfs = cstr(vfs_name);
    let mut db = std::ptr::null_mut();
    let ret = unsafe {
        sqlite3_open_v2(
            filename.as_ptr(),
            &mut db,
            SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE,
            vfs.as_ptr(),
        )
    };
    assert_eq!(SQLITE_CANTOPEN, ret);
}

/// Flips the first header byte of every backing file under `directory`'s
/// `.opaque` subdirectory. Only safe to call while the pool holds no open
/// sync access handles (i.e. after `SAHPoolUtil::pause`) -- OPFS refuses a
/// second `createSyncAccessHandle` on a file that already has one open.
async fn corrupt_every_slot_header(directory: &str) {
    let create = FileSystemGetDirectoryOptions::new();
    create.set_create(true);

    let mut dir: FileSystemDirectoryHandle = JsFuture::from(
        js_sys::global()
            .dyn_into::<WorkerGlobalScope>()
            .expect("dedicated worker global scope")
            .navigator()
            .storage()
            .get_directory(),
    )
    .await
    .expect("get_directory")
    .into();

    for part in directory.split('/').filter(|s| !s.is_empty()) {
        dir = JsFuture::from(dir.get_directory_handle_with_options(part, &create))
            .await
            .expect("get_directory_handle")
            .into();
    }
    let opaque: FileSystemDirectoryHandle =
        JsFuture::from(dir.get_directory_handle_with_options(".opaque", &create))
            .await
            .expect("get .opaque directory")
            .into();

    let iter = opaque.entries();
    while let Ok(next) = iter.next() {
        let entry: js_sys::IteratorNext =
            JsFuture::from(next).await.expect("iterate .opaque").into();
        if entry.done() {
            break;
        }
        let pair: js_sys::Array = entry.value().into();
        let value = pair.get(1);
        let kind = js_sys::Reflect::get(&value, &"kind".into())
            .ok()
            .and_then(|k| k.as_string());
        if kind.as_deref() != Some("file") {
            continue;
        }

        let file_handle: FileSystemFileHandle = value.into();
        let sah: FileSystemSyncAccessHandle =
            JsFuture::from(file_handle.create_sync_access_handle())
                .await
                .expect("create_sync_access_handle")
                .into();
        let options = FileSystemReadWriteOptions::new();
        options.set_at(0.0);
        let flipped = js_sys::Uint8Array::from(&[0xFFu8][..]);
        sah.write_with_js_u8_array_and_options(&flipped, &options)
            .expect("write corrupted byte");
        sah.close();
    }
}

#[wasm_bindgen_test]
async fn digest_corruption_dissociates_the_slot_and_frees_it() {
    let vfs_name = "opfs-sahpool-corrupt";
    let pool = install::<BrowserOsCallback>(&cfg(vfs_name), false)
        .await
        .expect("install");

    let db = open(vfs_name, "/corrupt.db", SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE);
    let sql = cstr("CREATE TABLE t(v);");
    let ret = unsafe {
        sqlite3_exec(db, sql.as_ptr(), None, std::ptr::null_mut(), std::ptr::null_mut())
    };
    assert_eq!(SQLITE_OK, ret);
    unsafe { sqlite3_close(db) };

    assert!(pool.exists("/corrupt.db").unwrap());
    let capacity = pool.capacity();

    pool.pause().expect("pause releases every sync access handle");
    corrupt_every_slot_header(&format!(".{vfs_name}")).await;
    pool.unpause().await.expect("unpause rescans every slot's header");

    assert!(
        !pool.exists("/corrupt.db").unwrap(),
        "a corrupt header must dissociate its slot rather than keep a stale path"
    );
    assert_eq!(pool.count(), 0);
    assert_eq!(capacity, pool.capacity(), "the dissociated slot rejoins the free set");
}

/// Opens `path` directly through the registered `sqlite3_vfs`'s `xOpen`,
/// bypassing `sqlite3_open_v2`/the pager entirely, so a read can be driven
/// straight through `xRead` and its raw return code observed.
unsafe fn raw_vfs_open(vfs_name: &str, path: &str, flags: i32) -> Box<opfs_vfs::vfs::SQLiteVfsFile> {
    let vfs_cstr = cstr(vfs_name);
    let vfs = sqlite3_vfs_find(vfs_cstr.as_ptr());
    assert!(!vfs.is_null(), "vfs must already be registered");

    assert_eq!(
        (*vfs).szOsFile as usize,
        std::mem::size_of::<opfs_vfs::vfs::SQLiteVfsFile>(),
        "szOsFile must match SQLiteVfsFile so Box::from_raw can later free it"
    );
    let layout = std::alloc::Layout::new::<opfs_vfs::vfs::SQLiteVfsFile>();
    let raw = std::alloc::alloc_zeroed(layout) as *mut sqlite3_file;

    let path_cstr = cstr(path);
    let mut out_flags = 0;
    let open_fn = (*vfs).xOpen.expect("xOpen");
    let rc = open_fn(vfs, path_cstr.as_ptr(), raw, flags, &mut out_flags);
    assert_eq!(SQLITE_OK, rc, "xOpen failed");

    Box::from_raw(raw.cast::<opfs_vfs::vfs::SQLiteVfsFile>())
}

#[wasm_bindgen_test]
async fn short_read_past_end_of_file_is_reported_and_zero_filled() {
    let vfs_name = "opfs-sahpool-short-read";
    let pool = install::<BrowserOsCallback>(&cfg(vfs_name), false)
        .await
        .expect("install");

    let db = open(vfs_name, "/short.db", SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE);
    let sql = cstr("PRAGMA page_size=4096; CREATE TABLE t(v); INSERT INTO t VALUES (1);");
    let ret = unsafe {
        sqlite3_exec(db, sql.as_ptr(), None, std::ptr::null_mut(), std::ptr::null_mut())
    };
    assert_eq!(SQLITE_OK, ret);
    unsafe { sqlite3_close(db) };

    let real_size = pool.export_db("/short.db").unwrap().len();
    assert!(real_size > 0);

    let file = unsafe { raw_vfs_open(vfs_name, "/short.db", SQLITE_OPEN_READWRITE) };
    let file_ptr = file.as_ref() as *const opfs_vfs::vfs::SQLiteVfsFile as *mut sqlite3_file;

    let mut buf = vec![0xAAu8; real_size + 64];
    let read_rc = unsafe {
        ((*file.io_methods.pMethods).xRead.expect("xRead"))(
            file_ptr,
            buf.as_mut_ptr().cast(),
            buf.len() as i32,
            0,
        )
    };
    assert_eq!(SQLITE_IOERR_SHORT_READ, read_rc);
    assert!(
        buf[real_size..].iter().all(|&b| b == 0),
        "bytes past the real end of file must be zero-filled, not left as stale scratch data"
    );

    unsafe { ((*file.io_methods.pMethods).xClose.expect("xClose"))(file_ptr) };
}
