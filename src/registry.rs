//! Lifetime/registration singleton (spec.md §4.5 / SPEC_FULL.md §4.8).
//!
//! Installation is one-shot per process/origin: the pool scan / capability
//! probe that backs a vfs install should run at most once per
//! `(directory, vfs_name)`, with later callers served the cached terminal
//! outcome instead of re-running it. Generalized from
//! `crates/sqlite-wasm-vfs/src/sahpool.rs`'s
//! `static REGISTER_GUARD: tokio::sync::Mutex<()>`, so Strategy A's
//! `sahpool::install` and Strategy B's proxy install share one cache
//! discipline instead of each rolling its own guard.
//!
//! Keyed per `(directory, vfs_name)` rather than globally: a page can
//! legitimately install two pools at different directories, and a probe
//! failure for one must not poison the other.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// Guards the one-shot critical section around acquiring OPFS handles and
/// registering a vfs, held for the duration of the whole install (not just
/// a lookup) so two concurrent installs of the same name never race to
/// register twice.
static REGISTER_GUARD: Mutex<()> = Mutex::const_new(());

pub async fn registration_guard() -> MutexGuard<'static, ()> {
    REGISTER_GUARD.lock().await
}

type ProbeKey = (String, String);

static PROBES: Lazy<Mutex<HashMap<ProbeKey, Result<(), String>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Runs `probe` at most once per `(directory, vfs_name)`; later calls return
/// the cached terminal outcome (success or the original error message)
/// without re-running it.
pub async fn cached_probe<F, Fut>(directory: &str, vfs_name: &str, probe: F) -> Result<(), String>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let key = (directory.to_string(), vfs_name.to_string());

    if let Some(outcome) = PROBES.lock().await.get(&key) {
        return outcome.clone();
    }

    let outcome = probe().await;
    PROBES
        .lock()
        .await
        .entry(key)
        .or_insert_with(|| outcome.clone());
    outcome
}
