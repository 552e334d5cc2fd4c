//! `blocker list`, `blocker answer`, `blocker resolve`.

use crate::blockers::BlockerService;
use anyhow::Result;
use console::style;
use std::path::Path;

fn service(workspace: &crate::workspace::Workspace) -> BlockerService {
    BlockerService::new(workspace.store.clone(), workspace.events.clone())
}

pub fn cmd_blocker_list(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let blockers = service(&workspace).list_open(workspace.id())?;
    if blockers.is_empty() {
        println!("(no open blockers)");
        return Ok(());
    }
    for blocker in blockers {
        let task = workspace.store.get_task(&blocker.task_id)?;
        println!(
            "{}  task #{}  [{}] [{}]",
            style(&blocker.id).bold(),
            task.task_number,
            blocker.mode.as_str(),
            blocker.category.as_str()
        );
        println!("  {}", blocker.question);
        if !blocker.context.is_empty() {
            println!("  context: {}", crate::util::truncate_chars(&blocker.context, 120));
        }
    }
    Ok(())
}

pub fn cmd_blocker_answer(project_dir: &Path, id: &str, text: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let blocker = service(&workspace).answer(id, text)?;
    println!(
        "{} blocker {} — task can resume with `codeframe work resume`",
        style("Answered").green(),
        blocker.id
    );
    Ok(())
}

pub fn cmd_blocker_resolve(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let blocker = service(&workspace).resolve(id)?;
    println!("{} blocker {}", style("Resolved").green(), blocker.id);
    Ok(())
}
