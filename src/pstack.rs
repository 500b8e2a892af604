//! A tiny scratch allocator used only to marshal fixed-size out-parameters
//! (`*mut i32`, `*mut i64`) across the handful of `extern "C"` entry points
//! that need a short-lived stack slot rather than a heap allocation.
//!
//! The teacher's JS-wrapper flavor binds to a `wasm.pstack` object exposed by
//! the official `sqlite3.js` glue (see its `ffi.rs::PStack`); this crate has
//! no such host to bind to since it *is* the compiled module, so the same
//! "short-lived stack scratch space" idea is reimplemented as a plain Rust
//! bump allocator over a fixed-size buffer.

use std::cell::Cell;
use std::mem::{align_of, size_of};

const CAPACITY: usize = 4096;

pub struct PStack {
    buf: Box<[u8; CAPACITY]>,
    top: Cell<usize>,
}

impl PStack {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; CAPACITY]),
            top: Cell::new(0),
        }
    }

    /// Reserve `size_of::<T>()` bytes, properly aligned, reset on drop of the
    /// returned guard. Panics if the scratch area is exhausted: callers only
    /// ever reserve a handful of bytes per `extern "C"` call, so exhaustion
    /// means a bug, not a runtime condition to recover from.
    pub fn alloc<T: Default>(&self) -> PStackSlot<'_, T> {
        let align = align_of::<T>();
        let size = size_of::<T>();
        let start = self.top.get();
        let aligned = (start + align - 1) & !(align - 1);
        let end = aligned + size;
        assert!(end <= CAPACITY, "pstack exhausted");

        let ptr = unsafe { self.buf.as_ptr().add(aligned) as *mut T };
        unsafe { ptr.write(T::default()) };
        self.top.set(end);

        PStackSlot {
            stack: self,
            ptr,
            restore_to: start,
        }
    }
}

impl Default for PStack {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PStackSlot<'a, T> {
    stack: &'a PStack,
    ptr: *mut T,
    restore_to: usize,
}

impl<'a, T> PStackSlot<'a, T> {
    pub fn as_mut_ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn get(&self) -> T
    where
        T: Copy,
    {
        unsafe { *self.ptr }
    }
}

impl<'a, T> Drop for PStackSlot<'a, T> {
    fn drop(&mut self) {
        self.stack.top.set(self.restore_to);
    }
}

thread_local! {
    static PSTACK: PStack = PStack::new();
}

/// Run `f` with a scratch out-parameter slot of type `T`, restoring the
/// scratch area when `f` returns.
pub fn with_out_param<T: Default + Copy, R>(f: impl FnOnce(*mut T) -> R) -> (R, T) {
    PSTACK.with(|stack| {
        let slot = stack.alloc::<T>();
        let ret = f(slot.as_mut_ptr());
        let value = slot.get();
        (ret, value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_out_param_observes_the_write() {
        let (ret, value) = with_out_param::<i32, _>(|ptr| {
            unsafe { *ptr = 42 };
            "ok"
        });
        assert_eq!(ret, "ok");
        assert_eq!(value, 42);
    }

    #[test]
    fn slot_defaults_to_zero_before_the_callback_writes_it() {
        let stack = PStack::new();
        let slot = stack.alloc::<i64>();
        assert_eq!(slot.get(), 0);
    }

    #[test]
    fn dropping_a_slot_restores_the_stack_top() {
        let stack = PStack::new();
        let before = stack.top.get();
        {
            let _slot = stack.alloc::<i32>();
            assert!(stack.top.get() > before);
        }
        assert_eq!(stack.top.get(), before);
    }

    #[test]
    fn nested_allocations_unwind_in_lifo_order() {
        let stack = PStack::new();
        let outer = stack.alloc::<i32>();
        let mid = stack.top.get();
        {
            let _inner = stack.alloc::<i64>();
            assert!(stack.top.get() > mid);
        }
        assert_eq!(stack.top.get(), mid);
        drop(outer);
        assert_eq!(stack.top.get(), 0);
    }
}
