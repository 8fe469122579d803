use std::path::Path;

use serde::Serialize;

use crate::complexity::{load_report, report_path};
use crate::config::ResolvedConfig;
use crate::tasks_file::{load_document, tasks_path};

#[derive(Debug, Clone, Serialize)]
pub struct ToolCheck {
    pub binary: String,
    pub found: bool,
    pub path: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub path: String,
    pub exists: bool,
    pub readable: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub tool: ToolCheck,
    pub tasks_file: FileCheck,
    pub complexity_report: FileCheck,
    pub tags: Vec<String>,
    pub current_tag: Option<String>,
    pub ok: bool,
}

/// Probe the environment the reconciliation layer depends on: the backing
/// binary, the tasks file, and the (optional) complexity report.
pub fn run_doctor(root: &Path, config: &ResolvedConfig) -> DoctorReport {
    let tool = check_tool(&config.tool_binary);

    let tasks = tasks_path(root);
    let mut tags = Vec::new();
    let mut current_tag = None;
    let tasks_file = match load_document(root) {
        Ok(loaded) => {
            tags = loaded.document.tag_names();
            current_tag = Some(loaded.document.current_tag());
            FileCheck {
                path: tasks.display().to_string(),
                exists: true,
                readable: true,
                detail: None,
            }
        }
        Err(err) => FileCheck {
            path: tasks.display().to_string(),
            exists: tasks.is_file(),
            readable: false,
            detail: Some(err.to_string()),
        },
    };

    let report = report_path(root);
    let complexity_report = match load_report(root) {
        Ok(Some(_)) => FileCheck {
            path: report.display().to_string(),
            exists: true,
            readable: true,
            detail: None,
        },
        // Absence is a healthy state: the tool simply has not analyzed yet.
        Ok(None) => FileCheck {
            path: report.display().to_string(),
            exists: false,
            readable: true,
            detail: None,
        },
        Err(err) => FileCheck {
            path: report.display().to_string(),
            exists: report.is_file(),
            readable: false,
            detail: Some(err.to_string()),
        },
    };

    let ok = tool.found && tasks_file.readable && complexity_report.readable;
    DoctorReport {
        tool,
        tasks_file,
        complexity_report,
        tags,
        current_tag,
        ok,
    }
}

fn check_tool(binary: &str) -> ToolCheck {
    match which::which(binary) {
        Ok(resolved) => {
            let version = tool_version(&resolved);
            ToolCheck {
                binary: binary.to_string(),
                found: true,
                path: Some(resolved.display().to_string()),
                version,
            }
        }
        Err(_) => ToolCheck {
            binary: binary.to_string(),
            found: false,
            path: None,
            version: None,
        },
    }
}

fn tool_version(binary: &Path) -> Option<String> {
    let output = std::process::Command::new(binary)
        .arg("--version")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    raw.lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn config_with_binary(binary: &str) -> ResolvedConfig {
        ResolvedConfig {
            tool_binary: binary.to_string(),
            ..ResolvedConfig::default()
        }
    }

    #[test]
    fn missing_binary_and_file_fail_the_checkup() {
        let temp = TempDir::new().expect("tempdir");
        let report = run_doctor(temp.path(), &config_with_binary("tasklens-no-such-binary"));
        assert!(!report.tool.found);
        assert!(!report.tasks_file.exists);
        assert!(!report.tasks_file.readable);
        assert!(!report.ok);
    }

    #[test]
    fn healthy_workspace_reports_tags() {
        let temp = TempDir::new().expect("tempdir");
        let path = tasks_path(temp.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(
            path,
            r#"{"tags": {"master": {"current": true, "tasks": []}}}"#,
        )
        .expect("write");

        // `sh` stands in for the backing binary: resolvable on any Unix.
        let report = run_doctor(temp.path(), &config_with_binary("sh"));
        assert!(report.tool.found);
        assert!(report.tasks_file.readable);
        assert_eq!(report.tags, vec!["master"]);
        assert_eq!(report.current_tag.as_deref(), Some("master"));
        assert!(!report.complexity_report.exists);
        assert!(report.complexity_report.readable);
        assert!(report.ok);
    }
}
