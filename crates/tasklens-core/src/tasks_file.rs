use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{TagEntry, Task, TasksDocument};

#[derive(Debug, Error)]
pub enum TasksFileError {
    #[error("Failed to access tasks file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tasks file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Tasks file has an unrecognized shape: {0}")]
    Shape(String),
}

/// Location the backing tool maintains its task data at. Fixed external
/// contract, not configurable.
pub fn tasks_path(root: &Path) -> PathBuf {
    root.join(".taskmaster").join("tasks").join("tasks.json")
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: TasksDocument,
    /// sha256 of the raw file bytes, used downstream to drop no-op watcher
    /// events.
    pub digest: String,
}

pub fn load_document(root: &Path) -> Result<LoadedDocument, TasksFileError> {
    let bytes = fs::read(tasks_path(root))?;
    let document = parse_document(&bytes)?;
    Ok(LoadedDocument {
        document,
        digest: digest(&bytes),
    })
}

/// Parse either document format: the `tags` map, or the legacy flat list
/// under a top-level `tasks` key (read as the default tag).
pub fn parse_document(bytes: &[u8]) -> Result<TasksDocument, TasksFileError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut map) = value else {
        return Err(TasksFileError::Shape(
            "top level is not a JSON object".to_string(),
        ));
    };

    if let Some(tags_value) = map.remove("tags") {
        let tags: BTreeMap<String, TagEntry> = serde_json::from_value(tags_value)?;
        return Ok(TasksDocument::Tagged { tags, extra: map });
    }
    if let Some(tasks_value) = map.remove("tasks") {
        let tasks: Vec<Task> = serde_json::from_value(tasks_value)?;
        return Ok(TasksDocument::Legacy { tasks, extra: map });
    }
    Err(TasksFileError::Shape(
        "missing both 'tags' and 'tasks' keys".to_string(),
    ))
}

pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn document_to_value(document: &TasksDocument) -> Result<Value, TasksFileError> {
    let mut map = serde_json::Map::new();
    match document {
        TasksDocument::Tagged { tags, extra } => {
            map.insert("tags".to_string(), serde_json::to_value(tags)?);
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
        TasksDocument::Legacy { tasks, extra } => {
            map.insert("tasks".to_string(), serde_json::to_value(tasks)?);
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Value::Object(map))
}

/// Persist a (typically repaired) document back to disk under an exclusive
/// file lock, in the same format it was read in. Returns the new content
/// digest. Pass the registry so the watcher can tell this write apart from
/// an external one.
pub fn write_document(
    path: &Path,
    document: &TasksDocument,
    registry: Option<&WriteRegistry>,
) -> Result<String, TasksFileError> {
    let value = document_to_value(document)?;
    let rendered = format!("{}\n", serde_json::to_string_pretty(&value)?);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(rendered.as_bytes());
    let flushed = file.flush();
    FileExt::unlock(&file)?;
    written?;
    flushed?;

    if let Some(registry) = registry {
        registry.record(path);
    }
    Ok(digest(rendered.as_bytes()))
}

/// Remembers files this process wrote recently so the file watcher can
/// suppress the events those writes generate.
#[derive(Debug)]
pub struct WriteRegistry {
    entries: Mutex<HashMap<PathBuf, Instant>>,
    window: Duration,
}

impl WriteRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn record(&self, path: &Path) {
        let mut entries = self.entries.lock().expect("write registry lock");
        entries.retain(|_, written| written.elapsed() < self.window);
        entries.insert(path.to_path_buf(), Instant::now());
    }

    pub fn should_suppress(&self, path: &Path) -> bool {
        let entries = self.entries.lock().expect("write registry lock");
        entries
            .get(path)
            .map(|written| written.elapsed() < self.window)
            .unwrap_or(false)
    }
}

impl Default for WriteRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::model::DEFAULT_TAG;

    use super::*;

    const TAGGED: &str = r#"{
      "tags": {
        "master": {
          "name": "master",
          "description": "Mainline",
          "current": true,
          "tasks": [{"id": 1, "title": "Boot", "status": "pending"}]
        },
        "feature": {
          "current": false,
          "tasks": []
        }
      },
      "schemaVersion": 2
    }"#;

    #[test]
    fn parses_tagged_documents() {
        let doc = parse_document(TAGGED.as_bytes()).expect("parse");
        assert_eq!(doc.tag_names(), vec!["feature", "master"]);
        assert_eq!(doc.current_tag(), "master");
        assert_eq!(doc.tasks_for("master").len(), 1);
        assert_eq!(doc.tasks_for("feature").len(), 0);
        assert_eq!(doc.tasks_for("nope").len(), 0);
    }

    #[test]
    fn parses_legacy_documents_as_the_default_tag() {
        let doc = parse_document(br#"{"tasks": [{"id": 3, "title": "Old"}]}"#).expect("parse");
        assert_eq!(doc.current_tag(), DEFAULT_TAG);
        assert_eq!(doc.tasks_for(DEFAULT_TAG).len(), 1);
        assert_eq!(doc.tasks_for("feature").len(), 0);
    }

    #[test]
    fn rejects_documents_with_neither_key() {
        let err = parse_document(br#"{"version": 1}"#).unwrap_err();
        assert!(matches!(err, TasksFileError::Shape(_)));
        assert!(parse_document(b"[1, 2]").is_err());
        assert!(parse_document(b"{not json").is_err());
    }

    #[test]
    fn write_back_round_trips_unknown_keys() {
        let temp = TempDir::new().expect("tempdir");
        let path = tasks_path(temp.path());
        let doc = parse_document(TAGGED.as_bytes()).expect("parse");

        write_document(&path, &doc, None).expect("write");
        let raw = fs::read(&path).expect("read");
        let reread = parse_document(&raw).expect("reparse");
        assert_eq!(reread, doc);

        let value: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["tags"]["master"]["description"], "Mainline");
    }

    #[test]
    fn write_back_keeps_the_legacy_shape_for_legacy_files() {
        let temp = TempDir::new().expect("tempdir");
        let path = tasks_path(temp.path());
        let doc = parse_document(br#"{"tasks": [{"id": 1, "title": "Old"}]}"#).expect("parse");

        write_document(&path, &doc, None).expect("write");
        let value: Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert!(value.get("tasks").is_some());
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn write_registry_suppresses_within_the_window_only() {
        let registry = WriteRegistry::new(Duration::from_millis(40));
        let path = Path::new("/tmp/tasks.json");
        assert!(!registry.should_suppress(path));
        registry.record(path);
        assert!(registry.should_suppress(path));
        std::thread::sleep(Duration::from_millis(60));
        assert!(!registry.should_suppress(path));
    }

    #[test]
    fn digests_track_content() {
        assert_eq!(digest(b"a"), digest(b"a"));
        assert_ne!(digest(b"a"), digest(b"b"));
    }
}
