//! `patch export` and `commit create`.

use crate::tracker::GitTracker;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_patch_export(project_dir: &Path, out: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let tracker = GitTracker::init_if_missing(&workspace.root)?;
    let default = workspace.root.join("codeframe.patch");
    let out = out.unwrap_or(&default);
    let path = tracker.export_patch(out)?;
    println!("{} {}", style("Exported patch to").green(), path.display());
    Ok(())
}

pub fn cmd_commit_create(project_dir: &Path, message: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let tracker = GitTracker::init_if_missing(&workspace.root)?;
    let sha = tracker.commit(message)?;
    println!("{} {}", style("Committed").green(), &sha[..12.min(sha.len())]);
    Ok(())
}
