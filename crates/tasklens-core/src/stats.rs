use std::collections::BTreeMap;

use crate::model::{Task, TaskStats, TaskStatus};

/// Single-pass reduction over a task list.
///
/// Unknown statuses count toward the totals but land in no bucket, so a
/// newer backing tool never breaks the summary. Percentages are 0 (never
/// NaN) when the respective total is 0.
pub fn calculate_stats(tasks: &[Task]) -> TaskStats {
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut subtasks_by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut done = 0usize;
    let mut subtask_total = 0usize;
    let mut subtasks_done = 0usize;

    for task in tasks {
        bump(&mut by_status, &task.status);
        if task.status == TaskStatus::Done {
            done += 1;
        }
        for subtask in &task.subtasks {
            subtask_total += 1;
            bump(&mut subtasks_by_status, &subtask.status);
            if subtask.status == TaskStatus::Done {
                subtasks_done += 1;
            }
        }
    }

    TaskStats {
        total: tasks.len(),
        by_status,
        completion_percentage: percentage(done, tasks.len()),
        subtask_total,
        subtasks_by_status,
        subtask_completion_percentage: percentage(subtasks_done, subtask_total),
    }
}

fn bump(buckets: &mut BTreeMap<String, usize>, status: &TaskStatus) {
    if status.is_known() {
        *buckets.entry(status.as_str().to_string()).or_insert(0) += 1;
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::model::{Subtask, SubtaskId};

    use super::*;

    fn task(id: u64, status: TaskStatus, subtask_statuses: &[TaskStatus]) -> Task {
        Task {
            id,
            title: format!("Task {}", id),
            description: String::new(),
            details: None,
            priority: Default::default(),
            status,
            dependencies: vec![],
            subtasks: subtask_statuses
                .iter()
                .enumerate()
                .map(|(idx, status)| Subtask {
                    id: SubtaskId::Num(idx as u64 + 1),
                    title: format!("Subtask {}", idx + 1),
                    description: None,
                    status: status.clone(),
                    dependencies: vec![],
                    parent_id: id,
                    extra: Default::default(),
                })
                .collect(),
            complexity_score: None,
            file_path: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn empty_input_yields_zero_percentages() {
        let stats = calculate_stats(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_percentage, 0.0);
        assert_eq!(stats.subtask_total, 0);
        assert_eq!(stats.subtask_completion_percentage, 0.0);
    }

    #[test]
    fn counts_tasks_and_flattened_subtasks_separately() {
        let tasks = vec![
            task(1, TaskStatus::Done, &[TaskStatus::Done, TaskStatus::Pending]),
            task(2, TaskStatus::Pending, &[TaskStatus::Done]),
            task(3, TaskStatus::InProgress, &[]),
            task(4, TaskStatus::Done, &[]),
        ];
        let stats = calculate_stats(&tasks);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_status.get("done"), Some(&2));
        assert_eq!(stats.by_status.get("pending"), Some(&1));
        assert_eq!(stats.by_status.get("in-progress"), Some(&1));
        assert_eq!(stats.completion_percentage, 50.0);

        assert_eq!(stats.subtask_total, 3);
        assert_eq!(stats.subtasks_by_status.get("done"), Some(&2));
        assert!((stats.subtask_completion_percentage - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_statuses_increment_no_bucket() {
        let tasks = vec![task(1, TaskStatus::Unknown("triage".to_string()), &[])];
        let stats = calculate_stats(&tasks);
        assert_eq!(stats.total, 1);
        assert!(stats.by_status.is_empty());
        assert_eq!(stats.completion_percentage, 0.0);
    }
}
