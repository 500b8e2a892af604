#![doc = include_str!("../README.md")]

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
pub mod libsqlite3;

mod lock_api;
mod pstack;
pub mod registry;
mod structbinder;

pub mod vfs;

/// These exported APIs are stable and will not have breaking changes.
pub mod export {
    /// C interface subset this crate binds against.
    pub use super::libsqlite3::*;

    /// Strategy A (spec.md §4.3): a fixed pool of OPFS sync access handles,
    /// each acquired up front. See
    /// <https://sqlite.org/wasm/doc/trunk/persistence.md#vfs-opfs-sahpool>.
    pub use super::vfs::sahpool::{
        install as install_sahpool, PoolError, SAHPoolConfig, SAHPoolConfigBuilder, SAHPoolUtil,
    };

    /// Strategy B (spec.md §4.4–4.6): a `SharedArrayBuffer`/`Atomics` proxy to
    /// a dedicated worker holding the real OPFS handles.
    pub use super::vfs::proxy::{install as install_proxy, ProxyError};

    /// Shared VFS plumbing needed to implement [`OsCallback`] for a host, or
    /// to register a vfs by hand.
    pub use super::vfs::{
        check_import_db, register_vfs, registered_vfs, BrowserOsCallback, ImportDbError,
        OsCallback, RegisterVfsError, VfsError, VfsResult,
    };

    /// `opfs-sanity-check` (spec.md §6.3): a short CRUD cycle run against an
    /// already-registered vfs, to catch a broken pool at startup.
    pub use super::vfs::sanity::{run as sanity_check, SanityError};
}
