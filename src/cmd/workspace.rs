//! `init`, `status`, `summary`.

use crate::store::models::TaskStatus;
use crate::workspace::Workspace;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_init(path: &Path) -> Result<()> {
    let workspace = Workspace::init(path)?;
    println!(
        "{} workspace at {}",
        style("Initialized").green().bold(),
        workspace.root.display()
    );
    println!("  state:  {}", workspace.db_path().display());
    println!("  config: {}", workspace.config_path().display());
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let tasks = workspace.store.list_tasks(workspace.id(), None)?;

    println!("{}", style(format!("Workspace {}", workspace.id())).bold());
    println!("  repo: {}", workspace.record.repo_path);
    println!("  tasks: {}", tasks.len());
    for status in TaskStatus::ALL {
        let count = tasks.iter().filter(|t| t.status == status).count();
        if count > 0 {
            println!("    {:<12} {}", status.as_str(), count);
        }
    }

    let open_blockers = workspace.store.list_open_blockers(workspace.id())?;
    if !open_blockers.is_empty() {
        println!(
            "  {} open blocker(s) — `codeframe blocker list`",
            style(open_blockers.len()).yellow()
        );
    }
    Ok(())
}

pub fn cmd_summary(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let tasks = workspace.store.list_tasks(workspace.id(), None)?;
    let done = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Merged))
        .count();
    let usage = workspace.store.workspace_usage(workspace.id())?;
    let batches = workspace.store.list_batches(workspace.id())?;

    println!("{}", style("Summary").bold());
    if tasks.is_empty() {
        println!("  no tasks yet — `codeframe tasks generate`");
    } else {
        println!(
            "  progress: {done}/{} tasks done ({:.0}%)",
            tasks.len(),
            done as f64 / tasks.len() as f64 * 100.0
        );
    }
    println!(
        "  tokens: {} in / {} out / {} total",
        usage.input_tokens, usage.output_tokens, usage.total_tokens
    );
    if let Some(batch) = batches.last() {
        println!(
            "  last batch: {} ({} tasks, {})",
            batch.id,
            batch.task_ids.len(),
            batch.status.as_str()
        );
    }
    for task in tasks.iter().filter(|t| t.result_summary.is_some()) {
        println!(
            "  #{} {} — {}",
            task.task_number,
            task.title,
            task.result_summary.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
