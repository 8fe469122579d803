//! Tag-scoped snapshot cache.
//!
//! One entry per (workspace, tag) pair, each moving through
//! `Empty → Loading → Populated → Stale → Loading → …`. A stale entry keeps
//! its last-known snapshot, but serving it requires the caller to say so by
//! calling `best_effort` — a status bar preferring slightly old data over a
//! blank UI opts in; nothing falls back silently.
//!
//! The clock is injected so tests control time, and invalidation listeners
//! run synchronously in subscription order before the triggering call
//! returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::model::{TagSnapshot, Task};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub workspace: PathBuf,
    pub tag: String,
}

impl CacheKey {
    pub fn new(workspace: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            tag: tag.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Loading,
    Populated,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    TagSwitch,
    FileChanged,
    Manual,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    snapshot: Option<TagSnapshot>,
    populated_at: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: EntryState::Empty,
            snapshot: None,
            populated_at: None,
        }
    }
}

#[derive(Debug)]
struct MemoEntry {
    tasks: Vec<Task>,
    inserted_at: Instant,
}

type Listener = Arc<dyn Fn(&CacheKey, InvalidationReason) + Send + Sync>;

pub struct TagCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    memo: Mutex<HashMap<(CacheKey, String), MemoEntry>>,
    listeners: Mutex<Vec<Listener>>,
    clock: Arc<dyn Clock>,
    snapshot_ttl: Duration,
    memo_ttl: Duration,
}

impl TagCache {
    pub fn new(clock: Arc<dyn Clock>, snapshot_ttl: Duration, memo_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            clock,
            snapshot_ttl,
            memo_ttl,
        }
    }

    /// The entry's state after lazy TTL demotion.
    pub fn state(&self, key: &CacheKey) -> EntryState {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get_mut(key) {
            Some(entry) => {
                self.demote_if_expired(entry);
                entry.state
            }
            None => EntryState::Empty,
        }
    }

    /// The snapshot, only while fresh. A stale or loading entry is a miss;
    /// callers that can live with old data use `best_effort` instead.
    pub fn get(&self, key: &CacheKey) -> Option<TagSnapshot> {
        let mut entries = self.entries.lock().expect("cache lock");
        let entry = entries.get_mut(key)?;
        self.demote_if_expired(entry);
        if entry.state == EntryState::Populated {
            entry.snapshot.clone()
        } else {
            None
        }
    }

    /// The last-known snapshot regardless of freshness. Explicit opt-in to
    /// possibly-stale data.
    pub fn best_effort(&self, key: &CacheKey) -> Option<TagSnapshot> {
        let entries = self.entries.lock().expect("cache lock");
        entries.get(key).and_then(|entry| entry.snapshot.clone())
    }

    /// Claim the single refresh slot for this key. Returns `None` when a
    /// refresh is already in flight — the caller must drop the request, not
    /// queue it, so a late completion can never overwrite newer data.
    pub fn begin_refresh(self: &Arc<Self>, key: &CacheKey) -> Option<RefreshGuard> {
        let mut entries = self.entries.lock().expect("cache lock");
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        if entry.state == EntryState::Loading {
            debug!(target: "tasklens", tag = %key.tag, "refresh already in flight, dropping request");
            return None;
        }
        entry.state = EntryState::Loading;
        Some(RefreshGuard {
            cache: Arc::clone(self),
            key: key.clone(),
            settled: false,
        })
    }

    /// Mark the entry stale and notify listeners. A loading entry stays
    /// loading (the in-flight refresh will land fresher data than whatever
    /// triggered this); its memo is still dropped.
    pub fn invalidate(&self, key: &CacheKey, reason: InvalidationReason) {
        {
            let mut entries = self.entries.lock().expect("cache lock");
            if let Some(entry) = entries.get_mut(key) {
                if entry.state == EntryState::Populated {
                    entry.state = EntryState::Stale;
                }
            }
        }
        self.clear_memo_for(key);
        self.notify(key, reason);
    }

    /// Invalidate every tag cached for a workspace, in deterministic tag
    /// order.
    pub fn invalidate_workspace(&self, workspace: &Path, reason: InvalidationReason) {
        for key in self.workspace_keys(workspace) {
            self.invalidate(&key, reason);
        }
    }

    pub fn workspace_keys(&self, workspace: &Path) -> Vec<CacheKey> {
        let entries = self.entries.lock().expect("cache lock");
        let mut keys: Vec<CacheKey> = entries
            .keys()
            .filter(|key| key.workspace == workspace)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.tag.cmp(&b.tag));
        keys
    }

    /// Digest of the backing file the workspace's snapshots were built
    /// from, if any tag is populated. All tags of a workspace share one
    /// file, so any entry's digest serves.
    pub fn workspace_digest(&self, workspace: &Path) -> Option<String> {
        let entries = self.entries.lock().expect("cache lock");
        entries
            .iter()
            .filter(|(key, _)| key.workspace == workspace)
            .find_map(|(_, entry)| {
                entry
                    .snapshot
                    .as_ref()
                    .map(|snapshot| snapshot.source_digest.clone())
            })
    }

    /// Register an invalidation listener. Listeners are called
    /// synchronously, in subscription order, before the invalidating call
    /// returns.
    pub fn subscribe(
        &self,
        listener: impl Fn(&CacheKey, InvalidationReason) + Send + Sync + 'static,
    ) {
        let mut listeners = self.listeners.lock().expect("listener lock");
        listeners.push(Arc::new(listener));
    }

    /// Short-lived memo of a filtered task list, purely to absorb redraw
    /// bursts. Never a substitute for invalidation: populate and invalidate
    /// both clear it.
    pub fn memo_get(&self, key: &CacheKey, filter: &str) -> Option<Vec<Task>> {
        let mut memo = self.memo.lock().expect("memo lock");
        let memo_key = (key.clone(), filter.to_string());
        let entry = memo.get(&memo_key)?;
        if self.clock.now().duration_since(entry.inserted_at) < self.memo_ttl {
            Some(entry.tasks.clone())
        } else {
            memo.remove(&memo_key);
            None
        }
    }

    /// Read-through filtered view over a fresh snapshot, memoized under
    /// `filter`. Misses (stale, loading, empty) return `None` — the caller
    /// refreshes first.
    pub fn filtered(
        &self,
        key: &CacheKey,
        filter: &str,
        predicate: impl Fn(&Task) -> bool,
    ) -> Option<Vec<Task>> {
        if let Some(hit) = self.memo_get(key, filter) {
            return Some(hit);
        }
        let snapshot = self.get(key)?;
        let tasks: Vec<Task> = snapshot
            .tasks
            .iter()
            .filter(|task| predicate(task))
            .cloned()
            .collect();
        self.memo_put(key, filter, tasks.clone());
        Some(tasks)
    }

    pub fn memo_put(&self, key: &CacheKey, filter: &str, tasks: Vec<Task>) {
        let mut memo = self.memo.lock().expect("memo lock");
        memo.insert(
            (key.clone(), filter.to_string()),
            MemoEntry {
                tasks,
                inserted_at: self.clock.now(),
            },
        );
    }

    fn demote_if_expired(&self, entry: &mut Entry) {
        if entry.state != EntryState::Populated {
            return;
        }
        let Some(populated_at) = entry.populated_at else {
            return;
        };
        if self.clock.now().duration_since(populated_at) >= self.snapshot_ttl {
            entry.state = EntryState::Stale;
        }
    }

    fn populate(&self, key: &CacheKey, snapshot: TagSnapshot) {
        {
            let mut entries = self.entries.lock().expect("cache lock");
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.state = EntryState::Populated;
            entry.snapshot = Some(snapshot);
            entry.populated_at = Some(self.clock.now());
        }
        self.clear_memo_for(key);
    }

    fn abandon(&self, key: &CacheKey) {
        let mut entries = self.entries.lock().expect("cache lock");
        if let Some(entry) = entries.get_mut(key) {
            // A failed load keeps the previous snapshot readable rather
            // than blanking the entry.
            entry.state = if entry.snapshot.is_some() {
                EntryState::Stale
            } else {
                EntryState::Empty
            };
        }
    }

    fn clear_memo_for(&self, key: &CacheKey) {
        let mut memo = self.memo.lock().expect("memo lock");
        memo.retain(|(memo_key, _), _| memo_key != key);
    }

    fn notify(&self, key: &CacheKey, reason: InvalidationReason) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().expect("listener lock");
            guard.clone()
        };
        for listener in listeners {
            listener(key, reason);
        }
    }
}

/// Exclusive permission to refresh one cache entry. Completing stores the
/// new snapshot; failing (or dropping the guard) releases the slot and
/// leaves the last-known snapshot stale-but-present.
pub struct RefreshGuard {
    cache: Arc<TagCache>,
    key: CacheKey,
    settled: bool,
}

impl RefreshGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn complete(mut self, snapshot: TagSnapshot) {
        self.settled = true;
        self.cache.populate(&self.key, snapshot);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.cache.abandon(&self.key);
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.abandon(&self.key);
        }
    }
}
