use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DEFAULT_TAG;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasklensConfig {
    /// Backing tool binary name or path. Defaults to `task-master`.
    pub tool_binary: Option<String>,
    /// Extra arguments prepended to every invocation, split shell-style.
    pub tool_args: Option<String>,
    /// Timeout for quick commands (status changes, next-task lookups).
    pub status_timeout_ms: Option<u64>,
    /// Timeout for AI-assisted commands (add-task, expand, analysis).
    pub generation_timeout_ms: Option<u64>,
    /// Tag assumed when the tasks file flags none as current.
    pub default_tag: Option<String>,
    /// How long a populated snapshot stays fresh before reads force a
    /// reload.
    pub snapshot_ttl_ms: Option<u64>,
    /// TTL of the filter-result memo layer.
    pub filter_memo_ttl_ms: Option<u64>,
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".tasklens.toml", ".tasklensrc"]
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(".tasklens.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_tasklens_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("TASKLENS_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".tasklens"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_tasklens_home_dir().map(|home| home.join("config.toml"))
}

/// Walk upward from `start` to the first directory carrying a config file.
pub fn find_config_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    for candidate in start.ancestors() {
        for name in config_filename_candidates() {
            if candidate.join(name).is_file() {
                return Some(candidate.to_path_buf());
            }
        }
    }
    None
}

pub fn load_config(root: &Path) -> Option<TasklensConfig> {
    for name in config_filename_candidates() {
        let path = root.join(name);
        if path.is_file() {
            if let Ok(text) = fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str::<TasklensConfig>(&text) {
                    return Some(config);
                }
            }
        }
    }
    None
}

pub fn load_global_config() -> Option<TasklensConfig> {
    let path = global_config_path()?;
    if !path.is_file() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    toml::from_str::<TasklensConfig>(&text).ok()
}

/// Fully resolved settings: project config over global config over
/// defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub tool_binary: String,
    pub tool_args: Vec<String>,
    pub status_timeout: Duration,
    pub generation_timeout: Duration,
    pub default_tag: String,
    pub snapshot_ttl: Duration,
    pub filter_memo_ttl: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            tool_binary: "task-master".to_string(),
            tool_args: Vec::new(),
            status_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(120),
            default_tag: DEFAULT_TAG.to_string(),
            snapshot_ttl: Duration::from_secs(30),
            filter_memo_ttl: Duration::from_secs(5),
        }
    }
}

pub fn resolve_config(root: &Path) -> ResolvedConfig {
    let project = load_config(root);
    let global = load_global_config();
    let pick = |get: fn(&TasklensConfig) -> Option<String>| -> Option<String> {
        project
            .as_ref()
            .and_then(get)
            .or_else(|| global.as_ref().and_then(get))
    };
    let pick_ms = |get: fn(&TasklensConfig) -> Option<u64>| -> Option<Duration> {
        project
            .as_ref()
            .and_then(get)
            .or_else(|| global.as_ref().and_then(get))
            .map(Duration::from_millis)
    };

    let defaults = ResolvedConfig::default();
    let tool_args = pick(|c| c.tool_args.clone())
        .map(|raw| shell_words::split(&raw).unwrap_or_default())
        .unwrap_or_default();

    ResolvedConfig {
        tool_binary: pick(|c| c.tool_binary.clone()).unwrap_or(defaults.tool_binary),
        tool_args,
        status_timeout: pick_ms(|c| c.status_timeout_ms).unwrap_or(defaults.status_timeout),
        generation_timeout: pick_ms(|c| c.generation_timeout_ms)
            .unwrap_or(defaults.generation_timeout),
        default_tag: pick(|c| c.default_tag.clone()).unwrap_or(defaults.default_tag),
        snapshot_ttl: pick_ms(|c| c.snapshot_ttl_ms).unwrap_or(defaults.snapshot_ttl),
        filter_memo_ttl: pick_ms(|c| c.filter_memo_ttl_ms).unwrap_or(defaults.filter_memo_ttl),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn resolve_config_uses_defaults_without_files() {
        let temp = TempDir::new().expect("tempdir");
        let resolved = resolve_config(temp.path());
        assert_eq!(resolved.tool_binary, "task-master");
        assert_eq!(resolved.status_timeout, Duration::from_secs(10));
        assert_eq!(resolved.default_tag, "master");
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            config_path(temp.path()),
            "tool_binary = \"tm-dev\"\nstatus_timeout_ms = 2500\ntool_args = \"--project 'my proj'\"\n",
        )
        .expect("write");

        let resolved = resolve_config(temp.path());
        assert_eq!(resolved.tool_binary, "tm-dev");
        assert_eq!(resolved.status_timeout, Duration::from_millis(2500));
        assert_eq!(
            resolved.tool_args,
            vec!["--project".to_string(), "my proj".to_string()]
        );
        assert_eq!(resolved.generation_timeout, Duration::from_secs(120));
    }

    #[test]
    fn find_config_root_walks_upward() {
        let temp = TempDir::new().expect("tempdir");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(config_path(temp.path()), "").expect("write");

        let found = find_config_root(&nested).expect("root");
        assert_eq!(
            found.canonicalize().expect("canon"),
            temp.path().canonicalize().expect("canon")
        );
    }
}
