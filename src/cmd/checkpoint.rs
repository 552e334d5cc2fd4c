//! `checkpoint create/list/restore`.

use crate::checkpoints;
use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_checkpoint_create(project_dir: &Path, label: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let meta = checkpoints::create(&workspace, label)?;
    println!(
        "{} checkpoint {} ({})",
        style("Created").green(),
        meta.id,
        meta.label
    );
    Ok(())
}

pub fn cmd_checkpoint_list(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let metas = checkpoints::list(&workspace)?;
    if metas.is_empty() {
        println!("(no checkpoints)");
        return Ok(());
    }
    for meta in metas {
        println!(
            "{}  {}  {}  (git {})",
            meta.id,
            meta.created_at,
            meta.label,
            &meta.git_ref[..12.min(meta.git_ref.len())]
        );
    }
    Ok(())
}

pub fn cmd_checkpoint_restore(project_dir: &Path, id: &str) -> Result<()> {
    let mut workspace = super::open_workspace(project_dir)?;
    let meta = checkpoints::restore(&mut workspace, id)?;
    println!(
        "{} checkpoint {} ({})",
        style("Restored").green(),
        meta.id,
        meta.label
    );
    Ok(())
}
