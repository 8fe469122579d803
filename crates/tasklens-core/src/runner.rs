use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ResolvedConfig;
use crate::model::{Priority, TaskStatus};
use crate::scrape::{
    parse_add_task, parse_dependency_change, parse_expand_task, parse_next_task,
    parse_remove_task, parse_set_status, AddedTask, DependencyChange, ExpandedTask, NextTask,
    RemovedTask, ScrapeMiss, StatusChange,
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to capture {binary} output: {source}")]
    Capture {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{binary} exited with code {code}: {detail}")]
    NonZero {
        binary: String,
        code: i32,
        detail: String,
    },
    #[error("{binary} {subcommand} timed out after {ms}ms")]
    Timeout {
        binary: String,
        subcommand: String,
        ms: u64,
    },
}

impl RunnerError {
    /// Lets callers offer a longer-timeout retry for exactly this case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }
}

/// A runner or scraping failure for the combined invoke-and-interpret
/// operations.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("Could not interpret tool output: {0}")]
    Scrape(#[from] ScrapeMiss),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Invokes the backing command-line tool: one child process per operation,
/// stdout/stderr captured in full before any interpretation, and a
/// per-invocation timeout after which the process is killed. Late results
/// are never awaited past the timeout and nothing is retried here.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    binary: String,
    extra_args: Vec<String>,
    cwd: PathBuf,
    status_timeout: Duration,
    generation_timeout: Duration,
}

impl ToolRunner {
    pub fn new(root: &Path, config: &ResolvedConfig) -> Self {
        Self {
            binary: config.tool_binary.clone(),
            extra_args: config.tool_args.clone(),
            cwd: root.to_path_buf(),
            status_timeout: config.status_timeout,
            generation_timeout: config.generation_timeout,
        }
    }

    /// Run a quick command (status changes, lookups) under the short
    /// timeout.
    pub async fn run(&self, args: &[String]) -> Result<ToolOutput, RunnerError> {
        self.run_with_timeout(args, self.status_timeout).await
    }

    /// Run an AI-assisted command (task generation, expansion, analysis)
    /// under the long timeout.
    pub async fn run_generation(&self, args: &[String]) -> Result<ToolOutput, RunnerError> {
        self.run_with_timeout(args, self.generation_timeout).await
    }

    async fn run_with_timeout(
        &self,
        args: &[String],
        limit: Duration,
    ) -> Result<ToolOutput, RunnerError> {
        let mut full_args = self.extra_args.clone();
        full_args.extend_from_slice(args);
        debug!(target: "tasklens", binary = %self.binary, args = ?full_args, "invoking backing tool");

        let child = Command::new(&self.binary)
            .args(&full_args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RunnerError::Capture {
                binary: self.binary.clone(),
                source,
            })?,
            // Dropping the in-flight future kills the child
            // (kill_on_drop).
            Err(_) => {
                warn!(target: "tasklens", binary = %self.binary, ?limit, "backing tool timed out");
                return Err(RunnerError::Timeout {
                    binary: self.binary.clone(),
                    subcommand: args.first().cloned().unwrap_or_default(),
                    ms: limit.as_millis() as u64,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(RunnerError::NonZero {
                binary: self.binary.clone(),
                code: output.status.code().unwrap_or(-1),
                detail,
            });
        }
        Ok(ToolOutput { stdout, stderr })
    }

    pub async fn add_task(
        &self,
        prompt: &str,
        priority: Option<Priority>,
        dependencies: &[u64],
    ) -> Result<AddedTask, ToolError> {
        let output = self
            .run_generation(&add_task_args(prompt, priority, dependencies))
            .await?;
        Ok(parse_add_task(&output.stdout)?)
    }

    pub async fn remove_task(&self, id: u64) -> Result<RemovedTask, ToolError> {
        let output = self.run(&remove_task_args(id)).await?;
        Ok(parse_remove_task(&output.stdout)?)
    }

    pub async fn set_status(&self, id: &str, status: &TaskStatus) -> Result<StatusChange, ToolError> {
        let output = self.run(&set_status_args(id, status)).await?;
        Ok(parse_set_status(&output.stdout)?)
    }

    pub async fn next_task(&self) -> Result<NextTask, ToolError> {
        let output = self.run(&next_task_args()).await?;
        Ok(parse_next_task(&output.stdout)?)
    }

    pub async fn expand_task(
        &self,
        id: u64,
        num: Option<u32>,
        research: bool,
    ) -> Result<ExpandedTask, ToolError> {
        let output = self.run_generation(&expand_task_args(id, num, research)).await?;
        Ok(parse_expand_task(&output.stdout)?)
    }

    pub async fn add_dependency(
        &self,
        id: u64,
        depends_on: u64,
    ) -> Result<DependencyChange, ToolError> {
        let output = self.run(&add_dependency_args(id, depends_on)).await?;
        Ok(parse_dependency_change(&output.stdout)?)
    }

    /// Kick off complexity analysis; the result lands in the report file,
    /// not on stdout, so success is just a clean exit.
    pub async fn analyze_complexity(&self, research: bool) -> Result<(), RunnerError> {
        self.run_generation(&analyze_complexity_args(research)).await?;
        Ok(())
    }

    /// Switch the current tag. The follow-up is a cache invalidation and
    /// reload, not an interpretation of this output.
    pub async fn use_tag(&self, name: &str) -> Result<(), RunnerError> {
        self.run(&use_tag_args(name)).await?;
        Ok(())
    }
}

// Exact flag spellings are an external contract with the backing tool;
// tests pin them.

pub fn add_task_args(
    prompt: &str,
    priority: Option<Priority>,
    dependencies: &[u64],
) -> Vec<String> {
    let mut args = vec!["add-task".to_string(), format!("--prompt={}", prompt)];
    if let Some(priority) = priority {
        args.push(format!("--priority={}", priority));
    }
    if !dependencies.is_empty() {
        let joined = dependencies
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        args.push(format!("--dependencies={}", joined));
    }
    args
}

pub fn remove_task_args(id: u64) -> Vec<String> {
    vec![
        "remove-task".to_string(),
        format!("--id={}", id),
        "--yes".to_string(),
    ]
}

pub fn set_status_args(id: &str, status: &TaskStatus) -> Vec<String> {
    vec![
        "set-status".to_string(),
        format!("--id={}", id),
        format!("--status={}", status),
    ]
}

pub fn next_task_args() -> Vec<String> {
    vec!["next".to_string()]
}

pub fn expand_task_args(id: u64, num: Option<u32>, research: bool) -> Vec<String> {
    let mut args = vec!["expand".to_string(), format!("--id={}", id)];
    if let Some(num) = num {
        args.push(format!("--num={}", num));
    }
    if research {
        args.push("--research".to_string());
    }
    args
}

pub fn add_dependency_args(id: u64, depends_on: u64) -> Vec<String> {
    vec![
        "add-dependency".to_string(),
        format!("--id={}", id),
        format!("--depends-on={}", depends_on),
    ]
}

pub fn analyze_complexity_args(research: bool) -> Vec<String> {
    let mut args = vec!["analyze-complexity".to_string()];
    if research {
        args.push("--research".to_string());
    }
    args
}

pub fn use_tag_args(name: &str) -> Vec<String> {
    vec!["use-tag".to_string(), name.to_string()]
}
