use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::{ComplexityReport, Task};

#[derive(Debug, Error)]
pub enum ComplexityError {
    #[error("Failed to read complexity report: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse complexity report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Location the backing tool writes its analysis to. Fixed external
/// contract, not configurable.
pub fn report_path(root: &Path) -> PathBuf {
    root.join(".taskmaster")
        .join("reports")
        .join("task-complexity-report.json")
}

/// Load the complexity report if one exists. Absence is "no report", not an
/// error; a present-but-malformed file is.
pub fn load_report(root: &Path) -> Result<Option<ComplexityReport>, ComplexityError> {
    let path = report_path(root);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let report: ComplexityReport = serde_json::from_str(&raw)?;
    Ok(Some(report))
}

/// Left-join tasks against the report by id. Tasks absent from the report
/// keep their score unset; an absent report returns the input unchanged.
pub fn merge_complexity(tasks: Vec<Task>, report: Option<&ComplexityReport>) -> Vec<Task> {
    let Some(report) = report else {
        return tasks;
    };
    let scores: HashMap<u64, f64> = report
        .complexity_analysis
        .iter()
        .map(|analysis| (analysis.task_id, analysis.complexity_score))
        .collect();

    tasks
        .into_iter()
        .map(|mut task| {
            if let Some(score) = scores.get(&task.id) {
                task.complexity_score = Some(*score);
            }
            task
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::model::ComplexityAnalysis;

    use super::*;

    fn task(id: u64) -> Task {
        Task {
            id,
            title: format!("Task {}", id),
            description: String::new(),
            details: None,
            priority: Default::default(),
            status: Default::default(),
            dependencies: vec![],
            subtasks: vec![],
            complexity_score: None,
            file_path: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn absent_report_returns_input_unchanged() {
        let tasks = vec![task(1), task(2)];
        let expected = tasks.clone();
        assert_eq!(merge_complexity(tasks, None), expected);
    }

    #[test]
    fn matching_ids_gain_scores_and_others_stay_unset() {
        let report = ComplexityReport {
            meta: None,
            complexity_analysis: vec![ComplexityAnalysis {
                task_id: 2,
                complexity_score: 7.5,
                recommended_subtasks: Some(4),
                expansion_prompt: None,
                reasoning: None,
            }],
        };
        let merged = merge_complexity(vec![task(1), task(2)], Some(&report));
        assert_eq!(merged[0].complexity_score, None);
        assert_eq!(merged[1].complexity_score, Some(7.5));
    }

    #[test]
    fn missing_report_file_is_no_report() {
        let temp = TempDir::new().expect("tempdir");
        let report = load_report(temp.path()).expect("load");
        assert!(report.is_none());
    }

    #[test]
    fn malformed_report_file_is_an_error() {
        let temp = TempDir::new().expect("tempdir");
        let reports_dir = temp.path().join(".taskmaster").join("reports");
        std::fs::create_dir_all(&reports_dir).expect("mkdir");
        std::fs::write(
            reports_dir.join("task-complexity-report.json"),
            "{not json",
        )
        .expect("write");
        assert!(load_report(temp.path()).is_err());
    }

    #[test]
    fn report_parses_the_tool_shape() {
        let temp = TempDir::new().expect("tempdir");
        let reports_dir = temp.path().join(".taskmaster").join("reports");
        std::fs::create_dir_all(&reports_dir).expect("mkdir");
        std::fs::write(
            reports_dir.join("task-complexity-report.json"),
            r#"{
              "meta": {"generatedAt": "2026-08-01T10:00:00Z"},
              "complexityAnalysis": [
                {"taskId": 13, "complexityScore": 8, "recommendedSubtasks": 5,
                 "expansionPrompt": "Break down the form flow", "reasoning": "wide surface"}
              ]
            }"#,
        )
        .expect("write");

        let report = load_report(temp.path()).expect("load").expect("report");
        assert_eq!(report.complexity_analysis.len(), 1);
        assert_eq!(report.complexity_analysis[0].task_id, 13);
        assert_eq!(report.complexity_analysis[0].complexity_score, 8.0);
    }
}
