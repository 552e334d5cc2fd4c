//! PRD commands: add, show, list, versions, diff, export, delete, and the
//! provider-backed generate / refine / update.

use crate::events::EventType;
use crate::provider::{ChatMessage, ChatOptions, Purpose, chat_with_retry};
use anyhow::{Context, Result, bail};
use console::style;
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub fn cmd_prd_add(project_dir: &Path, file: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let prd = workspace.store.add_prd(workspace.id(), &content)?;
    workspace.events.emit(
        EventType::PrdAdded,
        &prd.id,
        serde_json::json!({ "chars": prd.content.len() }),
    )?;
    println!("{} PRD {} (v{})", style("Added").green(), prd.id, prd.version);
    Ok(())
}

pub fn cmd_prd_show(project_dir: &Path, id: Option<&str>) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let prd = match id {
        Some(id) => workspace.store.get_prd(id)?,
        None => workspace
            .store
            .latest_prd(workspace.id())?
            .context("No PRD in this workspace; `codeframe prd add <file>`")?,
    };
    println!("{}", prd.content);
    Ok(())
}

pub fn cmd_prd_list(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let prds = workspace.store.list_prds(workspace.id())?;
    if prds.is_empty() {
        println!("(no PRDs)");
        return Ok(());
    }
    for prd in prds {
        println!(
            "{}  v{}  {}  {}",
            prd.id,
            prd.version,
            prd.created_at,
            crate::util::truncate_chars(prd.content.lines().next().unwrap_or(""), 60)
        );
    }
    Ok(())
}

pub fn cmd_prd_versions(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    for prd in workspace.store.prd_versions(id)? {
        println!(
            "v{}  {}  {}",
            prd.version,
            prd.id,
            prd.change_summary.as_deref().unwrap_or("(initial)")
        );
    }
    Ok(())
}

pub fn cmd_prd_diff(project_dir: &Path, id: &str, v1: i64, v2: i64) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let versions = workspace.store.prd_versions(id)?;
    let find = |v: i64| {
        versions
            .iter()
            .find(|p| p.version == v)
            .with_context(|| format!("No version {v} in this chain"))
    };
    let old = find(v1)?;
    let new = find(v2)?;

    let old_lines: Vec<&str> = old.content.lines().collect();
    let new_lines: Vec<&str> = new.content.lines().collect();
    for line in &old_lines {
        if !new_lines.contains(line) {
            println!("{}", style(format!("- {line}")).red());
        }
    }
    for line in &new_lines {
        if !old_lines.contains(line) {
            println!("{}", style(format!("+ {line}")).green());
        }
    }
    Ok(())
}

pub fn cmd_prd_export(project_dir: &Path, id: &str, out: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let prd = workspace.store.get_prd(id)?;
    std::fs::write(out, &prd.content)?;
    println!("{} {} -> {}", style("Exported").green(), prd.id, out.display());
    Ok(())
}

pub fn cmd_prd_delete(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    workspace.store.delete_prd_chain(id)?;
    println!("{} PRD chain containing {id}", style("Deleted").green());
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    if buffer.trim().is_empty() {
        bail!("expected input on stdin");
    }
    Ok(buffer)
}

/// `prd generate`: expand a short product description (stdin) into a PRD.
pub async fn cmd_prd_generate(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let provider = super::resolve_provider()?;
    let description = read_stdin()?;

    let request = vec![
        ChatMessage::system(
            "Expand the product description into a concise PRD with sections: Overview, \
             Requirements, Out of scope. Plain markdown, no preamble.",
        ),
        ChatMessage::user(description),
    ];
    let response = chat_with_retry(
        provider.as_ref(),
        &request,
        &[],
        &ChatOptions::for_purpose(Purpose::Planning),
        &CancellationToken::new(),
    )
    .await?;

    let prd = workspace.store.add_prd(workspace.id(), &response.text)?;
    workspace.events.emit(
        EventType::PrdAdded,
        &prd.id,
        serde_json::json!({ "generated": true }),
    )?;
    println!("{} PRD {} (v1)", style("Generated").green(), prd.id);
    Ok(())
}

/// `prd refine <id>`: apply feedback (stdin) as a new version.
pub async fn cmd_prd_refine(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let provider = super::resolve_provider()?;
    let parent = workspace.store.get_prd(id)?;
    let feedback = read_stdin()?;

    let request = vec![
        ChatMessage::system(
            "Revise the PRD according to the feedback. Return only the full revised PRD.",
        ),
        ChatMessage::user(format!("PRD:\n{}\n\nFeedback:\n{feedback}", parent.content)),
    ];
    let response = chat_with_retry(
        provider.as_ref(),
        &request,
        &[],
        &ChatOptions::for_purpose(Purpose::Planning),
        &CancellationToken::new(),
    )
    .await?;

    let summary = crate::util::truncate_chars(feedback.trim(), 120);
    let prd = workspace
        .store
        .add_prd_version(id, &response.text, &summary)?;
    workspace.events.emit(
        EventType::PrdUpdated,
        &prd.id,
        serde_json::json!({ "version": prd.version }),
    )?;
    println!("{} v{} of chain {}", style("Refined").green(), prd.version, prd.chain_id);
    Ok(())
}

/// `prd update <id>`: replace content verbatim (stdin) as a new version.
pub fn cmd_prd_update(project_dir: &Path, id: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let content = read_stdin()?;
    let prd = workspace
        .store
        .add_prd_version(id, &content, "manual update")?;
    workspace.events.emit(
        EventType::PrdUpdated,
        &prd.id,
        serde_json::json!({ "version": prd.version }),
    )?;
    println!("{} v{}", style("Updated to").green(), prd.version);
    Ok(())
}
