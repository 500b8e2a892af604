//! Struct-binder: owns the lifetime of a bound `sqlite3_vfs` /
//! `sqlite3_io_methods` vtable pair and the C-side resources it leaked
//! (name strings, boxed app data) so they can be unwound in the correct
//! order when a VFS is disposed.
//!
//! Generalizes the teacher's `VfsAppData<T>`/`register_vfs` pair
//! (`sqlite-wasm-rs/src/vfs/utils.rs`) into an explicit handle type. Because
//! this crate links SQLite natively instead of interpreting a separately
//! compiled module through a JS host, "installing a method into the
//! module's function table" is just writing an `extern "C" fn` pointer into
//! a `static`/boxed `sqlite3_vfs` struct field; there is no JS-side
//! function-table indirection to bind through.

use crate::libsqlite3::sqlite3_vfs;
use tracing::trace;

/// Owns the cleanup closures for one bound VFS, run in reverse (LIFO) order
/// on drop, mirroring the "every installed method is uninstalled at dispose,
/// never before" contract.
#[derive(Default)]
pub struct StructBinder {
    cleanups: Vec<Box<dyn FnOnce()>>,
    disposed: bool,
}

impl StructBinder {
    pub fn new() -> Self {
        Self {
            cleanups: Vec::new(),
            disposed: false,
        }
    }

    /// Register a cleanup closure. Closures run LIFO: the most recently
    /// bound resource is the first one torn down.
    pub fn defer(&mut self, cleanup: impl FnOnce() + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Idempotent dispose: a second call is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for StructBinder {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Errors from binding a `sqlite3_vfs` into the C vtable.
#[derive(thiserror::Error, Debug)]
pub enum StructBinderError {
    #[error("vfs name is not representable as a C string")]
    InvalidName,
    #[error("sqlite3_vfs_register failed with code {0}")]
    RegisterFailed(i32),
}

/// Tracks a leaked `sqlite3_vfs` pointer purely for logging/debugging; actual
/// ownership/cleanup is handled by the `StructBinder` whose `defer` closures
/// free it.
pub fn trace_bind(vfs_name: &str, vfs: *mut sqlite3_vfs) {
    trace!(vfs_name, ptr = ?vfs, "bound sqlite3_vfs vtable");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn cleanups_run_lifo() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut binder = StructBinder::new();

        let o1 = order.clone();
        binder.defer(move || o1.borrow_mut().push(1));
        let o2 = order.clone();
        binder.defer(move || o2.borrow_mut().push(2));
        let o3 = order.clone();
        binder.defer(move || o3.borrow_mut().push(3));

        binder.dispose();
        assert_eq!(*order.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn dispose_is_idempotent() {
        let count = Rc::new(RefCell::new(0));
        let mut binder = StructBinder::new();
        let c = count.clone();
        binder.defer(move || *c.borrow_mut() += 1);

        binder.dispose();
        binder.dispose();
        assert_eq!(*count.borrow(), 1);
    }
}
