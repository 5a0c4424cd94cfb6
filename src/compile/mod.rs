//! Generic compile cache: key → artifact maps kept in sync with on-disk
//! sources by the filesystem watcher in [`watch`].
//!
//! The same mechanism backs four artifact kinds: rendered-document render
//! functions, compiled stylesheets, content-hash entries, and dynamic API
//! route lists. The cache owns its artifacts exclusively; the dispatcher
//! only reads by key, and all mutation flows through watcher-triggered
//! recompilation.

mod watcher;

pub use watcher::{watch, WatchHandle};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::error::Result;

/// Pluggable compile function: `Ok(Some(artifact))` stores, `Ok(None)` or
/// `Err` means "no usable artifact" (logged, entry absent). May suspend.
pub type CompileFn<T> = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;

/// Fired after every cache mutation, so dependents (the route registry) can
/// rebuild derived state.
pub type EventHook = Arc<dyn Fn(&Path, CacheEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// An artifact was compiled and stored.
    Updated,
    /// The entry was evicted (source deleted or compile failed).
    Removed,
}

/// Concurrent map from normalized absolute source path to compiled artifact.
/// Entries replace atomically; readers never block writers.
pub struct CompileCache<T> {
    entries: Arc<DashMap<PathBuf, T>>,
}

impl<T> Clone for CompileCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for CompileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompileCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, key: PathBuf, artifact: T) {
        self.entries.insert(key, artifact);
    }

    /// Evict an entry. Returns whether it existed.
    pub fn remove(&self, key: &Path) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &Path) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the cached keys, sorted for deterministic enumeration.
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl<T: Clone> CompileCache<T> {
    pub fn get(&self, key: &Path) -> Option<T> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}
