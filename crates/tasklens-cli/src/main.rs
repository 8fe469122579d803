use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tasklens_core::cache::{CacheKey, SystemClock, TagCache};
use tasklens_core::config::resolve_config;
use tasklens_core::doctor::run_doctor;
use tasklens_core::model::{TagSnapshot, TaskStatus};
use tasklens_core::normalize::normalize_tasks;
use tasklens_core::refresh::{load_or_refresh, refresh_tag, RefreshOptions};
use tasklens_core::runner::ToolRunner;
use tasklens_core::scrape::NextRef;
use tasklens_core::tasks_file::{load_document, tasks_path, write_document, WriteRegistry};
use tasklens_core::watch::watch_workspace;

#[derive(Parser)]
#[command(name = "tasklens", version, about = "Lens over an external task-management CLI")]
struct Cli {
    /// Workspace root containing .taskmaster/ (defaults to the working
    /// directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize task and subtask status for a tag
    Stats {
        /// Tag to summarize (defaults to the current tag)
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List tags, marking the current one
    Tags {
        #[arg(long)]
        json: bool,
    },
    /// List a tag's tasks, optionally filtered by status
    List {
        /// Tag to list (defaults to the current tag)
        #[arg(long)]
        tag: Option<String>,
        /// Only tasks with this status (e.g. pending, done)
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Ask the backing tool what to work on next
    Next,
    /// Detect repairs the tasks file needs; --apply persists them
    Repair {
        #[arg(long)]
        apply: bool,
    },
    /// Check the backing tool and its data files
    Doctor {
        #[arg(long)]
        json: bool,
    },
    /// Watch the workspace and report invalidations until interrupted
    Watch,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve working directory")?,
    };

    match cli.command {
        Some(Command::Stats { tag, json }) => stats(&root, tag, json),
        Some(Command::Tags { json }) => tags(&root, json),
        Some(Command::List { tag, status, json }) => list(&root, tag, status, json),
        Some(Command::Next) => next(&root).await,
        Some(Command::Repair { apply }) => repair(&root, apply),
        Some(Command::Doctor { json }) => doctor(&root, json),
        Some(Command::Watch) => watch(&root).await,
        Some(Command::Version) => {
            println!("tasklens {}", tasklens_core::version());
            Ok(())
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn new_cache(root: &std::path::Path) -> Arc<TagCache> {
    let config = resolve_config(root);
    Arc::new(TagCache::new(
        Arc::new(SystemClock),
        config.snapshot_ttl,
        config.filter_memo_ttl,
    ))
}

fn snapshot_for(root: &std::path::Path, tag: Option<String>) -> Result<TagSnapshot> {
    let tag = match tag {
        Some(tag) => tag,
        None => load_document(root)?.document.current_tag(),
    };
    let cache = new_cache(root);
    load_or_refresh(&cache, root, &tag, RefreshOptions::default())?
        .with_context(|| format!("no snapshot available for tag '{}'", tag))
}

fn stats(root: &std::path::Path, tag: Option<String>, json: bool) -> Result<()> {
    let snapshot = snapshot_for(root, tag)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.stats)?);
        return Ok(());
    }
    println!(
        "{}: {} tasks, {:.0}% complete",
        snapshot.name, snapshot.stats.total, snapshot.stats.completion_percentage
    );
    for (status, count) in &snapshot.stats.by_status {
        println!("  {:<12} {}", status, count);
    }
    if snapshot.stats.subtask_total > 0 {
        println!(
            "subtasks: {} total, {:.0}% complete",
            snapshot.stats.subtask_total, snapshot.stats.subtask_completion_percentage
        );
        for (status, count) in &snapshot.stats.subtasks_by_status {
            println!("  {:<12} {}", status, count);
        }
    }
    Ok(())
}

fn tags(root: &std::path::Path, json: bool) -> Result<()> {
    let document = load_document(root)?.document;
    let current = document.current_tag();
    if json {
        let value = serde_json::json!({
            "tags": document.tag_names(),
            "current": current,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    for name in document.tag_names() {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

fn list(
    root: &std::path::Path,
    tag: Option<String>,
    status: Option<String>,
    json: bool,
) -> Result<()> {
    let tag = match tag {
        Some(tag) => tag,
        None => load_document(root)?.document.current_tag(),
    };
    let cache = new_cache(root);
    load_or_refresh(&cache, root, &tag, RefreshOptions::default())?;

    let key = CacheKey::new(root, tag.as_str());
    let filter = status
        .as_deref()
        .map(|status| format!("status={}", status))
        .unwrap_or_else(|| "all".to_string());
    let wanted = status.map(TaskStatus::from);
    let tasks = cache
        .filtered(&key, &filter, |task| {
            wanted.as_ref().map(|w| &task.status == w).unwrap_or(true)
        })
        .with_context(|| format!("no snapshot available for tag '{}'", tag))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    for task in &tasks {
        let mut line = format!("{:>4}  {:<12} {}", task.id, task.status.to_string(), task.title);
        if !task.subtasks.is_empty() {
            line.push_str(&format!(" ({} subtasks)", task.subtasks.len()));
        }
        if let Some(score) = task.complexity_score {
            line.push_str(&format!(" [complexity {:.1}]", score));
        }
        println!("{}", line);
    }
    if tasks.is_empty() {
        println!("no matching tasks");
    }
    Ok(())
}

async fn next(root: &std::path::Path) -> Result<()> {
    let config = resolve_config(root);
    let runner = ToolRunner::new(root, &config);
    let next = runner.next_task().await?;
    let title = next.title.as_deref().unwrap_or("(untitled)");
    match next.id {
        NextRef::Task(id) => println!("Next task: #{} - {}", id, title),
        NextRef::Subtask(id) => println!("Next subtask: #{} - {}", id, title),
    }
    Ok(())
}

fn repair(root: &std::path::Path, apply: bool) -> Result<()> {
    let mut document = load_document(root)?.document;
    let mut dirty = false;

    for tag in document.tag_names() {
        let outcome = normalize_tasks(document.tasks_for(&tag).to_vec());
        if !outcome.has_changes {
            continue;
        }
        dirty = true;
        println!(
            "{}: tasks {} need repair",
            tag,
            outcome
                .changed_task_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if apply {
            document.replace_tasks(&tag, outcome.tasks);
        }
    }

    if !dirty {
        println!("nothing to repair");
        return Ok(());
    }
    if apply {
        let registry = WriteRegistry::default();
        write_document(&tasks_path(root), &document, Some(&registry))?;
        println!("repairs written back");
    } else {
        println!("dry run; pass --apply to persist");
    }
    Ok(())
}

fn doctor(root: &std::path::Path, json: bool) -> Result<()> {
    let config = resolve_config(root);
    let report = run_doctor(root, &config);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let tool_state = match (report.tool.found, report.tool.version.as_deref()) {
            (true, Some(version)) => format!("found ({})", version),
            (true, None) => "found".to_string(),
            (false, _) => "NOT FOUND".to_string(),
        };
        println!("backing tool {}: {}", report.tool.binary, tool_state);
        println!(
            "tasks file: {}",
            file_state(report.tasks_file.exists, report.tasks_file.readable)
        );
        println!(
            "complexity report: {}",
            file_state(
                report.complexity_report.exists,
                report.complexity_report.readable
            )
        );
        if let Some(current) = &report.current_tag {
            println!("current tag: {} (of {})", current, report.tags.len());
        }
    }
    if !report.ok {
        bail!("environment check failed");
    }
    Ok(())
}

fn file_state(exists: bool, readable: bool) -> &'static str {
    match (exists, readable) {
        (true, true) => "ok",
        (true, false) => "present but unreadable",
        (false, true) => "absent",
        (false, false) => "missing",
    }
}

async fn watch(root: &std::path::Path) -> Result<()> {
    let cache = new_cache(root);
    let registry = Arc::new(WriteRegistry::default());

    let document = load_document(root)?.document;
    for tag in document.tag_names() {
        refresh_tag(&cache, root, &tag, RefreshOptions::default())?;
    }

    cache.subscribe(|key, reason| {
        println!("{}: invalidated ({:?})", key.tag, reason);
    });
    let _watcher = watch_workspace(root, cache, registry)?;
    println!("watching {} (ctrl-c to stop)", root.display());

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    Ok(())
}
