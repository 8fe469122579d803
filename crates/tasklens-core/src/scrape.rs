//! Scrapers for the backing tool's free-text console output.
//!
//! The output is human-oriented, not a designed protocol: boxes, emoji,
//! ANSI color, and phrasing that shifts between releases. Every scraper here
//! is deliberately heuristic — substring classification plus a small set of
//! prioritized regexes over cleaned text — and reports a miss as a value
//! instead of pretending certainty or panicking.

use regex::Regex;
use thiserror::Error;

use crate::model::TaskStatus;

/// A scraper found nothing it could commit to. Carries a human-readable
/// explanation; never empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScrapeMiss {
    pub message: String,
}

impl ScrapeMiss {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Glyphs the tool decorates output with; stripped before matching.
/// Box-drawing and block ranges are handled separately.
const NOISE_GLYPHS: &[char] = &[
    '✅', '✔', '❌', '✖', '⚠', 'ℹ', '✨', '🚀', '🔍', '📋', '📊', '🏷', '⏱', '🤖', '💡', '🧠',
    '🎯', '\u{FE0F}',
];

fn is_noise_glyph(c: char) -> bool {
    matches!(c, '\u{2500}'..='\u{257F}' | '\u{2580}'..='\u{259F}') || NOISE_GLYPHS.contains(&c)
}

/// Strip ANSI SGR escapes and decorative glyphs, then collapse whitespace
/// runs to single spaces and trim. Idempotent: cleaning clean text is a
/// no-op.
pub fn clean_output(raw: &str) -> String {
    let ansi = Regex::new(r"\x1b\[[0-9;]*m").expect("regex");
    let stripped = ansi.replace_all(raw, "");
    let without_glyphs: String = stripped.chars().filter(|c| !is_noise_glyph(*c)).collect();
    without_glyphs.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_capture(cleaned: &str, patterns: &[&str]) -> Option<String> {
    for pattern in patterns {
        let re = Regex::new(pattern).expect("regex");
        if let Some(caps) = re.captures(cleaned) {
            if let Some(m) = caps.get(1) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

fn first_id(cleaned: &str, patterns: &[&str]) -> Option<u64> {
    first_capture(cleaned, patterns).and_then(|raw| raw.parse::<u64>().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedTask {
    pub task_id: u64,
}

/// Scrape `add-task` output for the created task's id.
pub fn parse_add_task(raw: &str) -> Result<AddedTask, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if !lc.contains("created") && !lc.contains("added") {
        return Err(ScrapeMiss::new(
            "output does not mention a created or added task",
        ));
    }
    let id = first_id(
        &cleaned,
        &[r"(?i)task\s+#?(\d+)", r"(?i)\bid:?\s*(\d+)", r"#(\d+)"],
    )
    .ok_or_else(|| {
        ScrapeMiss::new("output mentions a created task but no id could be extracted")
    })?;
    Ok(AddedTask { task_id: id })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedTask {
    pub task_id: u64,
}

/// Scrape `remove-task` output for the deleted task's id.
pub fn parse_remove_task(raw: &str) -> Result<RemovedTask, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if lc.contains("not found") {
        return Err(ScrapeMiss::new("tool reported the task was not found"));
    }
    if !lc.contains("deleted") && !lc.contains("removed") {
        return Err(ScrapeMiss::new(
            "output does not mention a deleted or removed task",
        ));
    }
    let id = first_id(
        &cleaned,
        &[r"(?i)task\s+#?(\d+)", r"(?i)\bid:?\s*(\d+)", r"#(\d+)"],
    )
    .ok_or_else(|| {
        ScrapeMiss::new("output mentions a removed task but no id could be extracted")
    })?;
    Ok(RemovedTask { task_id: id })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Task or dotted subtask id, as printed.
    pub id: String,
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
}

/// Scrape `set-status` output for the affected id and the status values.
pub fn parse_set_status(raw: &str) -> Result<StatusChange, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if lc.contains("not found") {
        return Err(ScrapeMiss::new("tool reported the task was not found"));
    }
    if !lc.contains("status") || !(lc.contains("updated") || lc.contains("set") || lc.contains("changed"))
    {
        return Err(ScrapeMiss::new("output does not mention a status update"));
    }

    let id = first_capture(
        &cleaned,
        &[r"(?i)task\s+#?(\d+(?:\.\d+)?)", r"#(\d+(?:\.\d+)?)"],
    )
    .ok_or_else(|| ScrapeMiss::new("status update found but no task id could be extracted"))?;

    let transition = Regex::new(r"(?i)from\s+'?([a-z-]+)'?\s+to\s+'?([a-z-]+)'?").expect("regex");
    if let Some(caps) = transition.captures(&cleaned) {
        return Ok(StatusChange {
            id,
            old_status: Some(TaskStatus::from(caps[1].to_string())),
            new_status: TaskStatus::from(caps[2].to_string()),
        });
    }

    let target = first_capture(&cleaned, &[r"(?i)to\s+'?([a-z][a-z-]*)'?"]).ok_or_else(|| {
        ScrapeMiss::new("status update found but no target status could be extracted")
    })?;
    Ok(StatusChange {
        id,
        old_status: None,
        new_status: TaskStatus::from(target),
    })
}

/// What the `next` command recommends working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRef {
    Task(u64),
    /// A dotted "parentId.subtaskId" reference, kept verbatim. The dot is
    /// the sole subtask signal in the upstream format — an accepted
    /// ambiguity, not something to second-guess here.
    Subtask(String),
}

impl NextRef {
    pub fn is_subtask(&self) -> bool {
        matches!(self, NextRef::Subtask(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextTask {
    pub id: NextRef,
    pub title: Option<String>,
}

/// Scrape the `Next Task: #<id> - <title>` header from `next` output.
pub fn parse_next_task(raw: &str) -> Result<NextTask, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if lc.contains("no next task") || lc.contains("no eligible task") {
        return Err(ScrapeMiss::new("tool reported no next task is available"));
    }

    let header = Regex::new(
        r"(?i)next task:?\s*#?(\d+(?:\.\d+)?)(?:\s*-\s*(.+?))?(?:\s+(?:priority|status|dependencies|complexity|description):.*)?$",
    )
    .expect("regex");
    let caps = header
        .captures(&cleaned)
        .ok_or_else(|| ScrapeMiss::new("could not find a next-task header in output"))?;

    let raw_id = caps[1].to_string();
    let title = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty());

    let id = if raw_id.contains('.') {
        NextRef::Subtask(raw_id)
    } else {
        let parsed = raw_id
            .parse::<u64>()
            .map_err(|_| ScrapeMiss::new("next-task id is not a number"))?;
        NextRef::Task(parsed)
    };

    Ok(NextTask { id, title })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedTask {
    pub task_id: Option<u64>,
    pub subtask_count: Option<u32>,
}

/// Scrape `expand` output. The subtask count is best effort — AI-assisted
/// output phrasing varies the most of any command family.
pub fn parse_expand_task(raw: &str) -> Result<ExpandedTask, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if !lc.contains("expand") && !lc.contains("generated") && !lc.contains("subtask") {
        return Err(ScrapeMiss::new("output does not mention an expansion"));
    }
    let task_id = first_id(&cleaned, &[r"(?i)task\s+#?(\d+)\b"]);
    let subtask_count = first_capture(&cleaned, &[r"(?i)(\d+)\s+(?:new\s+)?subtasks?"])
        .and_then(|raw| raw.parse::<u32>().ok());
    if task_id.is_none() && subtask_count.is_none() {
        return Err(ScrapeMiss::new(
            "expansion output carried neither a task id nor a subtask count",
        ));
    }
    Ok(ExpandedTask {
        task_id,
        subtask_count,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyChange {
    pub task_id: u64,
    pub depends_on: Option<u64>,
}

/// Scrape `add-dependency`/`remove-dependency` output. Circular-dependency
/// rejections surface as misses carrying the tool's own wording.
pub fn parse_dependency_change(raw: &str) -> Result<DependencyChange, ScrapeMiss> {
    let cleaned = clean_output(raw);
    let lc = cleaned.to_lowercase();
    if lc.contains("circular") {
        return Err(ScrapeMiss::new(format!(
            "tool rejected the dependency as circular: {}",
            cleaned
        )));
    }
    if lc.contains("not found") {
        return Err(ScrapeMiss::new("tool reported the task was not found"));
    }
    if !lc.contains("dependency") && !lc.contains("depends") {
        return Err(ScrapeMiss::new("output does not mention a dependency change"));
    }
    let task_id = first_id(&cleaned, &[r"(?i)(?:task|to)\s+#?(\d+)\b"])
        .ok_or_else(|| ScrapeMiss::new("dependency change found but no task id"))?;
    let depends_on = first_id(&cleaned, &[r"(?i)depend(?:ency|s on)?\s*:?\s*#?(\d+)\b"]);
    Ok(DependencyChange {
        task_id,
        depends_on,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clean_output_is_idempotent() {
        let raw = "\x1b[32m✅ Task 42\x1b[0m  has   been\n created ─────";
        let once = clean_output(raw);
        assert_eq!(once, "Task 42 has been created");
        assert_eq!(clean_output(&once), once);
    }

    #[test]
    fn clean_output_strips_boxes_and_emoji() {
        let raw = "╭──────╮\n│ 🚀 next │\n╰──────╯";
        assert_eq!(clean_output(raw), "next");
    }

    #[test]
    fn add_task_extracts_created_id() {
        let parsed = parse_add_task("✅ Task 42 has been created successfully").expect("hit");
        assert_eq!(parsed, AddedTask { task_id: 42 });
    }

    #[test]
    fn add_task_falls_back_to_id_label() {
        let parsed = parse_add_task("New task added.\nID: 7").expect("hit");
        assert_eq!(parsed.task_id, 7);
    }

    #[test]
    fn add_task_misses_without_creation_wording() {
        let miss = parse_add_task("Task 42 exists").unwrap_err();
        assert!(!miss.message.is_empty());
    }

    #[test]
    fn remove_task_distinguishes_not_found() {
        let miss = parse_remove_task("Task 9 not found").unwrap_err();
        assert!(miss.message.contains("not found"));
        let parsed = parse_remove_task("Task 9 deleted").expect("hit");
        assert_eq!(parsed.task_id, 9);
    }

    #[test]
    fn set_status_reads_transition() {
        let parsed =
            parse_set_status("✅ Updated task 5 status from pending to done").expect("hit");
        assert_eq!(parsed.id, "5");
        assert_eq!(parsed.old_status, Some(TaskStatus::Pending));
        assert_eq!(parsed.new_status, TaskStatus::Done);
    }

    #[test]
    fn set_status_reads_subtask_ids_and_bare_targets() {
        let parsed = parse_set_status("Status of task 5.2 set to in-progress").expect("hit");
        assert_eq!(parsed.id, "5.2");
        assert_eq!(parsed.old_status, None);
        assert_eq!(parsed.new_status, TaskStatus::InProgress);
    }

    #[test]
    fn next_task_parses_subtask_reference() {
        let parsed = parse_next_task("Next Task: #13.2 - Display form").expect("hit");
        assert_eq!(parsed.id, NextRef::Subtask("13.2".to_string()));
        assert!(parsed.id.is_subtask());
        assert_eq!(parsed.title.as_deref(), Some("Display form"));
    }

    #[test]
    fn next_task_parses_top_level_reference() {
        let parsed = parse_next_task("Next Task: #13 - Wire up login").expect("hit");
        assert_eq!(parsed.id, NextRef::Task(13));
        assert!(!parsed.id.is_subtask());
    }

    #[test]
    fn next_task_title_stops_before_trailing_fields() {
        let raw = "╭─╮ Next Task: #4 - Ship it\nPriority: high\nDependencies: 1, 2";
        let parsed = parse_next_task(raw).expect("hit");
        assert_eq!(parsed.id, NextRef::Task(4));
        assert_eq!(parsed.title.as_deref(), Some("Ship it"));
    }

    #[test]
    fn next_task_misses_carry_messages() {
        let none = parse_next_task("No next task found.").unwrap_err();
        assert!(!none.message.is_empty());
        let garbage = parse_next_task("%%% ???").unwrap_err();
        assert!(!garbage.message.is_empty());
    }

    #[test]
    fn expand_reads_subtask_count() {
        let parsed =
            parse_expand_task("✨ Expanded task 3 into 5 subtasks").expect("hit");
        assert_eq!(parsed.task_id, Some(3));
        assert_eq!(parsed.subtask_count, Some(5));
    }

    #[test]
    fn dependency_circular_is_a_miss() {
        let miss =
            parse_dependency_change("Cannot add dependency: circular dependency detected")
                .unwrap_err();
        assert!(miss.message.contains("circular"));
    }

    #[test]
    fn dependency_change_extracts_both_ids() {
        let parsed =
            parse_dependency_change("Added dependency 3 to task 10").expect("hit");
        assert_eq!(parsed.task_id, 10);
        assert_eq!(parsed.depends_on, Some(3));
    }
}
