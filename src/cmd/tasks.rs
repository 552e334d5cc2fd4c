//! Task commands: generate (provider-backed), list, set/get status.

use crate::events::EventType;
use crate::provider::{ChatMessage, ChatOptions, Purpose, chat_with_retry};
use crate::store::models::TaskStatus;
use crate::store::tasks::NewTask;
use anyhow::{Context, Result, bail};
use console::style;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct GeneratedTask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    complexity: Option<u8>,
    /// 1-based indices into the generated list.
    #[serde(default)]
    depends_on: Vec<usize>,
}

/// `tasks generate`: decompose the latest PRD into BACKLOG tasks.
pub async fn cmd_tasks_generate(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let provider = super::resolve_provider()?;
    let prd = workspace
        .store
        .latest_prd(workspace.id())?
        .context("No PRD to decompose; `codeframe prd add <file>` first")?;

    let request = vec![
        ChatMessage::system(
            "Decompose the PRD into implementation tasks. Return ONLY a JSON array of objects \
             with keys: title, description, complexity (1-5), depends_on (list of 1-based \
             indices of earlier tasks in the array). Order tasks so dependencies come first.",
        ),
        ChatMessage::user(prd.content.clone()),
    ];
    let response = chat_with_retry(
        provider.as_ref(),
        &request,
        &[],
        &ChatOptions::for_purpose(Purpose::Planning),
        &CancellationToken::new(),
    )
    .await?;

    let json = crate::util::extract_json_array(&response.text)
        .context("Provider response contained no JSON array of tasks")?;
    let generated: Vec<GeneratedTask> =
        serde_json::from_str(&json).context("Unparseable task list from provider")?;
    if generated.is_empty() {
        bail!("Provider produced an empty task list");
    }

    let mut ids = Vec::new();
    for task in &generated {
        let created = workspace.store.create_task(
            workspace.id(),
            &NewTask {
                title: task.title.clone(),
                description: task.description.clone(),
                complexity: task.complexity,
                ..Default::default()
            },
        )?;
        ids.push(created.id);
    }
    for (index, task) in generated.iter().enumerate() {
        for dep in &task.depends_on {
            let dep_index = dep.checked_sub(1).filter(|i| *i < ids.len() && *i != index);
            if let Some(dep_index) = dep_index {
                workspace.store.add_dependency(&ids[index], &ids[dep_index])?;
            }
        }
    }

    workspace.events.emit(
        EventType::TasksGenerated,
        workspace.id(),
        serde_json::json!({ "count": ids.len(), "prd_id": prd.id }),
    )?;
    println!("{} {} task(s) in BACKLOG", style("Generated").green(), ids.len());
    Ok(())
}

pub fn cmd_tasks_list(project_dir: &Path, status: Option<&str>) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let filter = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
    let tasks = workspace.store.list_tasks(workspace.id(), filter)?;
    if tasks.is_empty() {
        println!("(no tasks)");
        return Ok(());
    }
    for task in tasks {
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            format!("  deps: {}", task.depends_on.len())
        };
        println!(
            "#{:<4} {:<12} {}{deps}",
            task.task_number,
            task.status.as_str(),
            task.title
        );
    }
    Ok(())
}

pub fn cmd_tasks_set_status(
    project_dir: &Path,
    status: &str,
    id: Option<&str>,
    all: bool,
) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let target: TaskStatus = status.parse()?;

    let tasks = if all {
        workspace.store.list_tasks(workspace.id(), None)?
    } else {
        let arg = id.context("provide a task id or --all")?;
        vec![super::resolve_task(&workspace, arg)?]
    };

    let mut changed = 0;
    for task in tasks {
        match workspace.store.set_task_status(&task.id, target) {
            Ok(_) => {
                workspace.events.emit(
                    EventType::TaskStatusChanged,
                    &task.id,
                    serde_json::json!({ "to": target.as_str(), "via": "cli" }),
                )?;
                changed += 1;
            }
            Err(e) if all => {
                // Bulk mode skips tasks the transition table refuses.
                tracing::debug!(task_id = %task.id, error = %e, "skipped in bulk status change");
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!("{} {changed} task(s) -> {}", style("Moved").green(), target.as_str());
    Ok(())
}

pub fn cmd_tasks_get_status(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let task = super::resolve_task(&workspace, id)?;
    println!("{}", task.status.as_str());
    Ok(())
}
