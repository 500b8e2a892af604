//! Wrap `Mutex` and `RwLock`.
//!
//! Outside a worker with `atomics` enabled there is only one thread, so the
//! standard library's lock is fine and cannot deadlock short of a recursive
//! call. Once `atomics` is enabled (Strategy B's worker split), use
//! `parking_lot`, which doesn't poison on panic.

#![allow(unused)]

#[cfg(target_feature = "atomics")]
use parking_lot::{Mutex as Mutex0, RwLock as RwLock0};

#[cfg(target_feature = "atomics")]
pub use parking_lot::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};

#[cfg(not(target_feature = "atomics"))]
use std::sync::{Mutex as Mutex0, RwLock as RwLock0};

#[cfg(not(target_feature = "atomics"))]
pub use std::sync::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};

pub struct RwLock<T>(RwLock0<T>);

impl<T> RwLock<T> {
    pub fn new(t: T) -> Self {
        Self(RwLock0::new(t))
    }

    #[cfg(target_feature = "atomics")]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    #[cfg(not(target_feature = "atomics"))]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap()
    }

    #[cfg(target_feature = "atomics")]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    #[cfg(not(target_feature = "atomics"))]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap()
    }
}

pub struct Mutex<T>(Mutex0<T>);

impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Self(Mutex0::new(t))
    }

    #[cfg(target_feature = "atomics")]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }

    #[cfg(not(target_feature = "atomics"))]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}
