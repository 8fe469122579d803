use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::{CacheKey, InvalidationReason, TagCache};
use crate::complexity::{load_report, merge_complexity};
use crate::model::TagSnapshot;
use crate::normalize::normalize_tasks;
use crate::stats::calculate_stats;
use crate::tasks_file::{load_document, tasks_path, write_document, TasksFileError, WriteRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Refreshed(TagSnapshot),
    /// Another refresh for the same key was already in flight; this request
    /// was dropped without touching the cache.
    Suppressed,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshOptions<'a> {
    /// Write repaired task data back so the same repair does not recur on
    /// every load.
    pub persist_repairs: bool,
    pub write_registry: Option<&'a WriteRegistry>,
}

/// Rebuild one tag's snapshot from the backing file: read, repair, merge
/// the complexity report, derive stats, publish. Exactly one refresh per
/// key runs at a time; a load failure leaves the previous snapshot in
/// place (stale) instead of blanking the entry.
pub fn refresh_tag(
    cache: &Arc<TagCache>,
    root: &Path,
    tag: &str,
    options: RefreshOptions<'_>,
) -> Result<RefreshStatus, TasksFileError> {
    let key = CacheKey::new(root, tag);
    let Some(guard) = cache.begin_refresh(&key) else {
        return Ok(RefreshStatus::Suppressed);
    };

    let loaded = match load_document(root) {
        Ok(loaded) => loaded,
        Err(err) => {
            guard.fail();
            return Err(err);
        }
    };
    let mut document = loaded.document;
    let mut digest = loaded.digest;

    let outcome = normalize_tasks(document.tasks_for(tag).to_vec());
    if outcome.has_changes {
        info!(
            target: "tasklens",
            tag,
            changed = ?outcome.changed_task_ids,
            "repaired task data on load"
        );
        if options.persist_repairs {
            document.replace_tasks(tag, outcome.tasks.clone());
            match write_document(&tasks_path(root), &document, options.write_registry) {
                Ok(new_digest) => digest = new_digest,
                Err(err) => {
                    guard.fail();
                    return Err(err);
                }
            }
        }
    }

    // The report is enrichment: unreadable is logged and treated as
    // absent, never a failed refresh.
    let report = match load_report(root) {
        Ok(report) => report,
        Err(err) => {
            warn!(target: "tasklens", error = %err, "ignoring unreadable complexity report");
            None
        }
    };

    let tasks = merge_complexity(outcome.tasks, report.as_ref());
    let stats = calculate_stats(&tasks);
    let snapshot = TagSnapshot {
        name: tag.to_string(),
        tasks,
        last_updated: Utc::now(),
        stats,
        source_digest: digest,
    };
    guard.complete(snapshot.clone());
    Ok(RefreshStatus::Refreshed(snapshot))
}

/// Serve the cached snapshot when fresh, refreshing otherwise. `None` means
/// a concurrent refresh was in flight and nothing usable is cached yet.
pub fn load_or_refresh(
    cache: &Arc<TagCache>,
    root: &Path,
    tag: &str,
    options: RefreshOptions<'_>,
) -> Result<Option<TagSnapshot>, TasksFileError> {
    let key = CacheKey::new(root, tag);
    if let Some(snapshot) = cache.get(&key) {
        return Ok(Some(snapshot));
    }
    match refresh_tag(cache, root, tag, options)? {
        RefreshStatus::Refreshed(snapshot) => Ok(Some(snapshot)),
        RefreshStatus::Suppressed => Ok(cache.best_effort(&key)),
    }
}

/// Make `next` the active tag: invalidate both sides of the switch and load
/// the target fresh. A tag switch always forces a reload, TTL or not.
pub fn switch_tag(
    cache: &Arc<TagCache>,
    root: &Path,
    previous: Option<&str>,
    next: &str,
    options: RefreshOptions<'_>,
) -> Result<RefreshStatus, TasksFileError> {
    if let Some(previous) = previous {
        cache.invalidate(&CacheKey::new(root, previous), InvalidationReason::TagSwitch);
    }
    cache.invalidate(&CacheKey::new(root, next), InvalidationReason::TagSwitch);
    refresh_tag(cache, root, next, options)
}
