//! File watcher for the backing tool's data files.
//!
//! Watches `.taskmaster/` for changes to the tasks file and the complexity
//! report and turns them into cache invalidations. Debounced, because
//! editors and the tool itself write files in several operations; our own
//! write-backs are recognized through the write registry and dropped, and
//! events that leave the tasks file content-identical are dropped too.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{InvalidationReason, TagCache};
use crate::complexity::report_path;
use crate::tasks_file::{digest, tasks_path, WriteRegistry};

const DEBOUNCE_WINDOW_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to start file watcher: {0}")]
    Notify(#[from] notify::Error),
    #[error("Failed to prepare watched directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Keeps the underlying watcher alive; dropping it stops watching.
pub struct WorkspaceWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    root: PathBuf,
}

impl WorkspaceWatcher {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch an additional path (e.g. a config file) with the same
    /// debounce window.
    pub fn watch_also(&mut self, path: &Path) -> Result<(), WatchError> {
        self.debouncer
            .watcher()
            .watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }
}

/// Start watching a workspace's `.taskmaster/` directory, invalidating
/// every cached tag of that workspace when the tasks file or the
/// complexity report changes externally.
pub fn watch_workspace(
    root: &Path,
    cache: Arc<TagCache>,
    registry: Arc<WriteRegistry>,
) -> Result<WorkspaceWatcher, WatchError> {
    let data_dir = root.join(".taskmaster");
    std::fs::create_dir_all(&data_dir)?;

    let (tx, rx) = channel::<Result<Vec<DebouncedEvent>, notify::Error>>();
    let mut debouncer = new_debouncer(Duration::from_millis(DEBOUNCE_WINDOW_MS), tx)?;
    debouncer
        .watcher()
        .watch(&data_dir, RecursiveMode::Recursive)?;

    let owned_root = root.to_path_buf();
    std::thread::spawn(move || handle_events(rx, owned_root, cache, registry));

    Ok(WorkspaceWatcher {
        debouncer,
        root: root.to_path_buf(),
    })
}

fn handle_events(
    rx: Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    root: PathBuf,
    cache: Arc<TagCache>,
    registry: Arc<WriteRegistry>,
) {
    while let Ok(result) = rx.recv() {
        let events = match result {
            Ok(events) => events,
            Err(err) => {
                warn!(target: "tasklens", error = %err, "file watcher error");
                continue;
            }
        };
        for event in events {
            handle_event(&event.path, &root, &cache, &registry);
        }
    }
}

fn handle_event(path: &Path, root: &Path, cache: &TagCache, registry: &WriteRegistry) {
    let tasks = tasks_path(root);
    let report = report_path(root);
    if path != tasks && path != report {
        return;
    }
    if registry.should_suppress(path) {
        debug!(target: "tasklens", path = %path.display(), "suppressing self-write event");
        return;
    }
    if path == tasks {
        // Touches that leave the content identical are not changes.
        if let Ok(bytes) = std::fs::read(path) {
            if cache.workspace_digest(root) == Some(digest(&bytes)) {
                debug!(target: "tasklens", path = %path.display(), "dropping no-op change event");
                return;
            }
        }
    }
    debug!(target: "tasklens", path = %path.display(), "backing file changed, invalidating");
    cache.invalidate_workspace(root, InvalidationReason::FileChanged);
}
