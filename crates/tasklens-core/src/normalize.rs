use std::collections::BTreeSet;

use serde::Serialize;

use crate::model::{DepRef, SubtaskId, Task};

/// Result of one normalization pass over a freshly loaded task list.
///
/// `has_changes` tells the caller the repaired shape differs from what is on
/// disk, so the same repair does not recur on every load unless it is
/// written back.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizeOutcome {
    pub tasks: Vec<Task>,
    pub has_changes: bool,
    pub changed_task_ids: Vec<u64>,
}

/// Repair a raw task list into the shape the data model promises.
///
/// Applied in order: dependency type coercion, subtask id de-compounding,
/// then a `parent_id` backfill (in-memory only, never a reported change).
pub fn normalize_tasks(mut tasks: Vec<Task>) -> NormalizeOutcome {
    let mut changed: BTreeSet<u64> = BTreeSet::new();

    for id in coerce_string_dependencies(&mut tasks) {
        changed.insert(id);
    }
    for id in decompound_subtask_ids(&mut tasks) {
        changed.insert(id);
    }
    for task in &mut tasks {
        for subtask in &mut task.subtasks {
            subtask.parent_id = task.id;
        }
    }

    NormalizeOutcome {
        tasks,
        has_changes: !changed.is_empty(),
        changed_task_ids: changed.into_iter().collect(),
    }
}

/// Convert pure-digit string dependencies to numbers, on tasks and their
/// subtasks. Dotted entries are genuine subtask back-references and stay
/// strings. Returns the ids of tasks that were touched.
pub fn coerce_string_dependencies(tasks: &mut [Task]) -> Vec<u64> {
    let mut changed = Vec::new();
    for task in tasks.iter_mut() {
        let mut touched = coerce_deps(&mut task.dependencies);
        for subtask in &mut task.subtasks {
            touched |= coerce_deps(&mut subtask.dependencies);
        }
        if touched {
            changed.push(task.id);
        }
    }
    changed
}

fn coerce_deps(deps: &mut [DepRef]) -> bool {
    let mut touched = false;
    for dep in deps.iter_mut() {
        if let DepRef::Ref(raw) = dep {
            if is_pure_digits(raw) {
                if let Ok(id) = raw.parse::<u64>() {
                    *dep = DepRef::Id(id);
                    touched = true;
                }
            }
        }
    }
    touched
}

fn is_pure_digits(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

/// Rewrite compound "parentId.subtaskId" subtask ids to the subtask's
/// 1-based position within its parent. A dotted prefix that does not match
/// the actual parent is left alone rather than guessed across tasks.
pub fn decompound_subtask_ids(tasks: &mut [Task]) -> Vec<u64> {
    let mut changed = Vec::new();
    for task in tasks.iter_mut() {
        let parent_id = task.id.to_string();
        let mut touched = false;
        for (idx, subtask) in task.subtasks.iter_mut().enumerate() {
            let SubtaskId::Text(raw) = &subtask.id else {
                continue;
            };
            let Some((prefix, _)) = raw.split_once('.') else {
                continue;
            };
            if prefix == parent_id {
                subtask.id = SubtaskId::Num(idx as u64 + 1);
                touched = true;
            }
        }
        if touched {
            changed.push(task.id);
        }
    }
    changed
}
