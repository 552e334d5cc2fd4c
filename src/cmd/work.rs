//! `work start/stop/resume/follow` and the `work batch` family.

use crate::conductor::Conductor;
use crate::events::EventType;
use crate::store::batches::NewBatch;
use crate::store::models::{BatchStrategy, EngineKind, OnFailure, RunStatus, TaskStatus};
use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub async fn cmd_work_start(project_dir: &Path, id: &str, engine: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let task = super::resolve_task(&workspace, id)?;
    let engine: EngineKind = engine.parse()?;
    let runtime = super::build_runtime(workspace)?;

    println!(
        "{} task #{} with the {engine} engine",
        style("Starting").green(),
        task.task_number
    );
    let run = runtime.start_run(&task.id, engine).await?;
    print_run_result(&run);
    Ok(())
}

pub fn cmd_work_stop(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let task = super::resolve_task(&workspace, id)?;
    // Durable flag only: the owning process observes it at its next
    // suspension point.
    let found = workspace.store.request_run_cancel(&task.id)?;
    if found {
        println!("{} cancellation for task #{}", style("Requested").green(), task.task_number);
    } else {
        println!("No RUNNING run for task #{}", task.task_number);
    }
    Ok(())
}

pub async fn cmd_work_resume(project_dir: &Path, id: &str, engine: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let task = super::resolve_task(&workspace, id)?;
    let engine: EngineKind = engine.parse()?;
    let runtime = super::build_runtime(workspace)?;

    let run = runtime.resume_run(&task.id, engine).await?;
    print_run_result(&run);
    Ok(())
}

/// Poll a task's events until it reaches a terminal status.
pub async fn cmd_work_follow(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let task = super::resolve_task(&workspace, id)?;
    let mut cursor = 0i64;

    loop {
        for event in workspace.events.for_subject(&task.id)? {
            if event.seq > cursor {
                cursor = event.seq;
                println!("{}  {}  {}", event.timestamp, event.event_type, event.payload);
            }
        }
        let current = workspace.store.get_task(&task.id)?;
        if current.status.is_terminal() || current.status == TaskStatus::Blocked {
            println!("task #{} is {}", current.task_number, current.status);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_batch_run(
    project_dir: &Path,
    ids: &[String],
    all_ready: bool,
    strategy: &str,
    max_parallel: usize,
    on_failure: &str,
    retry: u32,
    dry_run: bool,
) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let strategy: BatchStrategy = strategy.parse()?;
    let on_failure: OnFailure = on_failure.parse()?;

    let task_ids: Vec<String> = if all_ready {
        workspace
            .store
            .list_tasks(workspace.id(), Some(TaskStatus::Ready))?
            .into_iter()
            .map(|t| t.id)
            .collect()
    } else {
        ids.iter()
            .map(|arg| super::resolve_task(&workspace, arg).map(|t| t.id))
            .collect::<Result<_>>()?
    };
    if task_ids.is_empty() {
        bail!("No tasks to run (nothing READY?)");
    }

    let spec = NewBatch {
        task_ids,
        strategy,
        max_parallel,
        on_failure,
        retry_budget: retry,
    };

    let runtime = super::build_runtime(workspace)?;
    let conductor = Conductor::new(runtime.clone());

    if dry_run {
        let waves = conductor.plan_waves(&spec).await?;
        println!("{} {} wave(s):", style("Plan:").bold(), waves.len());
        for (i, wave) in waves.iter().enumerate() {
            let numbers: Vec<String> = wave
                .iter()
                .map(|id| {
                    runtime
                        .workspace
                        .store
                        .get_task(id)
                        .map(|t| format!("#{}", t.task_number))
                        .unwrap_or_else(|_| id.clone())
                })
                .collect();
            println!("  wave {}: {}", i + 1, numbers.join(", "));
        }
        return Ok(());
    }

    let bar = ProgressBar::new(spec.task_ids.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} tasks {msg}")
            .expect("valid template"),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let total = spec.task_ids.len();
    let events = runtime.workspace.events.clone();
    let mut cursor = events.cursor()?;

    let run = conductor.run_batch(&spec);
    tokio::pin!(run);

    let batch = loop {
        tokio::select! {
            result = &mut run => break result?,
            _ = tokio::time::sleep(Duration::from_millis(300)) => {
                for event in events.tail(cursor)? {
                    cursor = event.seq;
                    match event.event_type {
                        EventType::BatchTaskCompleted | EventType::BatchTaskFailed => bar.inc(1),
                        _ => {}
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                bar.set_message("cancelling...");
                // Cooperative: workers stop at their next suspension point
                // and the batch drains to CANCELLED.
                conductor.cancel_all();
            }
        }
    };
    bar.finish_and_clear();

    let succeeded = batch.results.values().filter(|s| s.is_success()).count();
    let status_style = match batch.status.as_str() {
        "COMPLETED" => style(batch.status.as_str()).green(),
        "CANCELLED" => style(batch.status.as_str()).yellow(),
        _ => style(batch.status.as_str()).red(),
    };
    println!("Batch {} {status_style}: {succeeded}/{total} succeeded", batch.id);
    if batch.status.as_str() == "CANCELLED" {
        std::process::exit(130);
    }
    Ok(())
}

pub fn cmd_batch_status(project_dir: &Path, id: Option<&str>) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let batch = match id {
        Some(id) => workspace.store.get_batch(id)?,
        None => workspace
            .store
            .list_batches(workspace.id())?
            .into_iter()
            .last()
            .context("No batches in this workspace")?,
    };

    println!("{} {}", style("Batch").bold(), batch.id);
    println!("  status: {}", batch.status.as_str());
    println!("  strategy: {}", batch.strategy.as_str());
    println!(
        "  tokens: {} total",
        batch.usage.total_tokens
    );
    for task_id in &batch.task_ids {
        let task = workspace.store.get_task(task_id)?;
        let result = batch
            .results
            .get(task_id)
            .map(|s| s.as_str())
            .unwrap_or("-");
        println!("  #{:<4} {:<10} {}", task.task_number, result, task.title);
    }
    Ok(())
}

pub fn cmd_batch_cancel(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    // Cross-process path: flag every RUNNING run in the batch.
    let batch = workspace.store.get_batch(id)?;
    let mut any = false;
    for task_id in &batch.task_ids {
        any |= workspace.store.request_run_cancel(task_id)?;
    }
    if any {
        println!("{} cancellation for batch {id}", style("Requested").green());
    } else {
        println!("Batch {id} has no running tasks");
    }
    Ok(())
}

pub async fn cmd_batch_resume(project_dir: &Path, id: &str, force: bool) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let runtime = super::build_runtime(workspace)?;
    let conductor = Conductor::new(runtime);

    let batch = conductor.resume_batch(id, force).await?;
    let succeeded = batch.results.values().filter(|s| s.is_success()).count();
    println!(
        "Batch {} {}: {succeeded}/{} succeeded",
        batch.id,
        batch.status.as_str(),
        batch.task_ids.len()
    );
    Ok(())
}

fn print_run_result(run: &crate::store::models::Run) {
    match run.status {
        RunStatus::Completed => {
            println!(
                "{} in {} iteration(s): {}",
                style("Completed").green().bold(),
                run.iterations,
                run.summary.as_deref().unwrap_or("(no summary)")
            );
        }
        RunStatus::Blocked => {
            println!(
                "{}: the agent raised a blocker — `codeframe blocker list`",
                style("Blocked").yellow().bold()
            );
        }
        RunStatus::Stopped => {
            println!("{}", style("Stopped (cancelled)").yellow());
        }
        status => {
            println!(
                "{} ({}): {}",
                style("Failed").red().bold(),
                status.as_str(),
                run.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!(
        "  tokens: {} in / {} out",
        run.usage.input_tokens, run.usage.output_tokens
    );
}
