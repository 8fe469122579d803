use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TAG: &str = "master";

/// Task status as written by the backing tool.
///
/// The set of known values is closed, but files produced by future versions
/// of the tool may carry statuses we have never seen. Those round-trip
/// through `Unknown` untouched instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
    Deferred,
    Cancelled,
    Review,
    Unknown(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Review => "review",
            TaskStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, TaskStatus::Unknown(_))
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl From<String> for TaskStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pending" => TaskStatus::Pending,
            "in-progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            "blocked" => TaskStatus::Blocked,
            "deferred" => TaskStatus::Deferred,
            "cancelled" => TaskStatus::Cancelled,
            "review" => TaskStatus::Review,
            _ => TaskStatus::Unknown(raw),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            // The backing tool treats anything else as its default.
            _ => Priority::Medium,
        }
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        priority.as_str().to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency entry as it appears in the backing file.
///
/// Healthy entries are numeric task ids. The tool has been observed to write
/// numeric ids as strings ("3") and subtask back-references as dotted
/// strings ("12.3"); only the former is a repair target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DepRef {
    Id(u64),
    Ref(String),
}

impl DepRef {
    pub fn as_id(&self) -> Option<u64> {
        match self {
            DepRef::Id(id) => Some(*id),
            DepRef::Ref(_) => None,
        }
    }
}

impl fmt::Display for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepRef::Id(id) => write!(f, "{}", id),
            DepRef::Ref(raw) => f.write_str(raw),
        }
    }
}

/// Subtask ids are locally scoped integers, but the tool has emitted
/// compound "parentId.subtaskId" strings in the wild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubtaskId {
    Num(u64),
    Text(String),
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtaskId::Num(id) => write!(f, "{}", id),
            SubtaskId::Text(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: SubtaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DepRef>,
    // Implicit in the file (subtasks live inside their parent); backfilled
    // by the normalizer and never written back.
    #[serde(default, skip_serializing)]
    pub parent_id: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DepRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Subtask>,
    // Merged in from the complexity report at load time; the tasks file
    // never carries it, so write-back happens before the merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// One tag's entry in the tagged tasks document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The backing tasks document, in either of the two formats the tool has
/// shipped: a `tags` map, or the legacy flat list. Keys we do not model are
/// carried in `extra` so a write-back never loses them.
#[derive(Debug, Clone, PartialEq)]
pub enum TasksDocument {
    Tagged {
        tags: BTreeMap<String, TagEntry>,
        extra: serde_json::Map<String, Value>,
    },
    Legacy {
        tasks: Vec<Task>,
        extra: serde_json::Map<String, Value>,
    },
}

impl TasksDocument {
    /// Names of all tags in the document, in deterministic order.
    pub fn tag_names(&self) -> Vec<String> {
        match self {
            TasksDocument::Tagged { tags, .. } => tags.keys().cloned().collect(),
            TasksDocument::Legacy { .. } => vec![DEFAULT_TAG.to_string()],
        }
    }

    /// The tag flagged current, falling back to the fixed default when no
    /// entry carries the flag.
    pub fn current_tag(&self) -> String {
        match self {
            TasksDocument::Tagged { tags, .. } => tags
                .iter()
                .find(|(_, entry)| entry.current)
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| DEFAULT_TAG.to_string()),
            TasksDocument::Legacy { .. } => DEFAULT_TAG.to_string(),
        }
    }

    /// Tasks under the given tag. A missing tag is an empty list, not an
    /// error; the legacy format only has the default tag.
    pub fn tasks_for(&self, tag: &str) -> &[Task] {
        match self {
            TasksDocument::Tagged { tags, .. } => tags
                .get(tag)
                .map(|entry| entry.tasks.as_slice())
                .unwrap_or(&[]),
            TasksDocument::Legacy { tasks, .. } => {
                if tag == DEFAULT_TAG {
                    tasks.as_slice()
                } else {
                    &[]
                }
            }
        }
    }

    /// Replace one tag's task list, e.g. with a repaired copy before
    /// write-back. Unknown tags are ignored (nothing to replace); the legacy
    /// format only accepts the default tag.
    pub fn replace_tasks(&mut self, tag: &str, new_tasks: Vec<Task>) {
        match self {
            TasksDocument::Tagged { tags, .. } => {
                if let Some(entry) = tags.get_mut(tag) {
                    entry.tasks = new_tasks;
                }
            }
            TasksDocument::Legacy { tasks, .. } => {
                if tag == DEFAULT_TAG {
                    *tasks = new_tasks;
                }
            }
        }
    }
}

/// Per-status counts over one task list plus its flattened subtasks.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub completion_percentage: f64,
    pub subtask_total: usize,
    pub subtasks_by_status: BTreeMap<String, usize>,
    pub subtask_completion_percentage: f64,
}

/// A fully reconciled view of one tag, replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSnapshot {
    pub name: String,
    pub tasks: Vec<Task>,
    pub last_updated: DateTime<Utc>,
    pub stats: TaskStats,
    /// sha256 of the backing file bytes this snapshot was built from.
    pub source_digest: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAnalysis {
    pub task_id: u64,
    pub complexity_score: f64,
    #[serde(default)]
    pub recommended_subtasks: Option<u32>,
    #[serde(default)]
    pub expansion_prompt: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityReport {
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub complexity_analysis: Vec<ComplexityAnalysis>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_round_trips_unknown_values() {
        let status = TaskStatus::from("triage".to_string());
        assert_eq!(status, TaskStatus::Unknown("triage".to_string()));
        assert_eq!(String::from(status), "triage");
    }

    #[test]
    fn status_parses_known_values_case_insensitively() {
        assert_eq!(
            TaskStatus::from("In-Progress".to_string()),
            TaskStatus::InProgress
        );
        assert_eq!(TaskStatus::from(" done ".to_string()), TaskStatus::Done);
    }

    #[test]
    fn task_deserializes_mixed_dependency_types() {
        let task: Task = serde_json::from_str(
            r#"{"id": 4, "title": "t", "description": "", "dependencies": [1, "2", "3.1"]}"#,
        )
        .expect("task");
        assert_eq!(
            task.dependencies,
            vec![
                DepRef::Id(1),
                DepRef::Ref("2".to_string()),
                DepRef::Ref("3.1".to_string()),
            ]
        );
    }

    #[test]
    fn task_keeps_unrecognized_keys() {
        let raw = r#"{"id": 1, "title": "t", "testStrategy": "manual"}"#;
        let task: Task = serde_json::from_str(raw).expect("task");
        assert_eq!(
            task.extra.get("testStrategy").and_then(|v| v.as_str()),
            Some("manual")
        );
        let out = serde_json::to_value(&task).expect("serialize");
        assert_eq!(out["testStrategy"], "manual");
    }

    #[test]
    fn current_tag_falls_back_to_default() {
        let mut tags = BTreeMap::new();
        tags.insert(
            "feature".to_string(),
            TagEntry {
                name: None,
                description: None,
                current: false,
                tasks: vec![],
                extra: Default::default(),
            },
        );
        let doc = TasksDocument::Tagged {
            tags,
            extra: Default::default(),
        };
        assert_eq!(doc.current_tag(), DEFAULT_TAG);
    }
}
