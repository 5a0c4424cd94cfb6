//! Filesystem watcher feeding the compile cache.
//!
//! Observes one source directory plus optional include directories. A change
//! to a source file recompiles just that file; a change inside an include
//! directory (shared partials/mixins) recompiles the entire directory set,
//! since there is no dependency graph — coarse invalidation over precise
//! tracking.
//!
//! notify's callback is synchronous, so events are bridged into tokio
//! through an mpsc channel and a forwarding thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use super::{CacheEvent, CompileCache, CompileFn, EventHook};
use crate::error::Result;
use crate::logger;

/// Handle to a running watcher. Shutting down (or dropping) stops the
/// filesystem observers; shutdown is idempotent.
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn shutdown(&mut self) {
        // Dropping the watcher closes the event channel, which unwinds the
        // bridge thread and the dispatch task in turn.
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Watch `directory` (and `include_directories`), keeping `cache` in sync
/// via `compile`. Performs a full compile pass over every directory before
/// returning, then applies incremental events.
pub async fn watch<T>(
    directory: PathBuf,
    include_directories: Vec<PathBuf>,
    cache: CompileCache<T>,
    compile: CompileFn<T>,
    events: Option<EventHook>,
) -> Result<WatchHandle>
where
    T: Send + Sync + 'static,
{
    let directory = std::fs::canonicalize(&directory)?;
    let include_directories = include_directories
        .into_iter()
        .map(|dir| Ok(std::fs::canonicalize(dir)?))
        .collect::<Result<Vec<_>>>()?;

    // Watchers attach before the initial pass so nothing slips through the
    // startup window; events buffer in the channel meanwhile.
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    })?;
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    for include in &include_directories {
        watcher.watch(include, RecursiveMode::NonRecursive)?;
    }

    let shared = Arc::new(WatchTarget {
        directory,
        include_directories,
        cache,
        compile,
        events,
    });

    shared.compile_all().await;

    // Bridge notify's sync channel into tokio.
    let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<notify::Event>(64);
    std::thread::spawn(move || {
        while let Ok(result) = notify_rx.recv() {
            match result {
                Ok(event) => {
                    if async_tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(e) => logger::error(&format!("Watcher error: {e}")),
            }
        }
    });

    let task = tokio::spawn(async move {
        while let Some(event) = async_rx.recv().await {
            shared.handle_event(event).await;
        }
    });

    Ok(WatchHandle {
        watcher: Some(watcher),
        task: Some(task),
    })
}

struct WatchTarget<T> {
    directory: PathBuf,
    include_directories: Vec<PathBuf>,
    cache: CompileCache<T>,
    compile: CompileFn<T>,
    events: Option<EventHook>,
}

impl<T: Send + Sync + 'static> WatchTarget<T> {
    async fn handle_event(self: &Arc<Self>, event: notify::Event) {
        let shared_include_touched = event
            .paths
            .iter()
            .any(|path| self.include_directories.iter().any(|inc| path.starts_with(inc)));

        if shared_include_touched {
            // A shared include can affect any dependent: recompile everything.
            self.compile_all().await;
            return;
        }

        for path in event.paths {
            if !path.starts_with(&self.directory) {
                continue;
            }
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    if meta.is_file() && eligible(&self.directory, &path) {
                        // Independent recompiles may overlap; last write wins.
                        let target = Arc::clone(self);
                        tokio::spawn(async move { target.compile_one(path).await });
                    }
                }
                Err(_) => {
                    if self.cache.remove(&path) {
                        logger::spam(&format!("Evicted deleted source {}", path.display()));
                        if let Some(hook) = &self.events {
                            hook(&path, CacheEvent::Removed);
                        }
                    }
                }
            }
        }
    }

    /// Full pass over the source directory and every include directory.
    /// Individual failures are logged and skipped; the pass never aborts.
    async fn compile_all(self: &Arc<Self>) {
        let mut dirs = self.include_directories.clone();
        dirs.push(self.directory.clone());

        let mut pending = Vec::new();
        for dir in dirs {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    logger::error(&format!("Cannot read watched directory {}: {e}", dir.display()));
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file && eligible(&dir, &path) {
                    let target = Arc::clone(self);
                    pending.push(tokio::spawn(async move { target.compile_one(path).await }));
                }
            }
        }
        for job in pending {
            let _ = job.await;
        }
    }

    async fn compile_one(&self, path: PathBuf) {
        match (self.compile)(path.clone()).await {
            Ok(Some(artifact)) => {
                self.cache.insert(path.clone(), artifact);
                if let Some(hook) = &self.events {
                    hook(&path, CacheEvent::Updated);
                }
            }
            Ok(None) => {
                logger::warn(&format!(
                    "No usable artifact for {}, leaving entry absent",
                    path.display()
                ));
                self.evict_failed(&path);
            }
            Err(e) => {
                logger::error(&format!("Compilation of {} failed: {e}", path.display()));
                self.evict_failed(&path);
            }
        }
    }

    fn evict_failed(&self, path: &Path) {
        if self.cache.remove(path) {
            if let Some(hook) = &self.events {
                hook(path, CacheEvent::Removed);
            }
        }
    }
}

/// Plain source files only: backup/swap suffixes (`~`, `#`) and any dotted
/// path component below the watch root are ignored.
fn eligible(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    for component in relative.components() {
        let Some(name) = component.as_os_str().to_str() else {
            return false;
        };
        if name.starts_with('.') || name.ends_with('~') || name.ends_with('#') {
            return false;
        }
    }
    true
}
