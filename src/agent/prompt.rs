//! Three-layer system prompt, assembled once per run.
//!
//! Layer 1 is fixed behavioral rules; layer 2 is derived from the project
//! (stack, commands, file tree, hinted source excerpts); layer 3 is derived
//! from the task (title, description, PRD excerpt, answered blockers).

use super::TaskContext;
use regex::Regex;
use std::sync::OnceLock;

/// Fixed behavioral rules for every run.
const BEHAVIOR_RULES: &str = "\
You are an autonomous coding agent working inside one repository.

Rules:
- Never generate whole files when a targeted edit will do; prefer the smallest edit that works.
- Read a file before you edit it. Edits must match current file contents.
- Do not delete or disable tests to make them pass.
- If the requirements are ambiguous or you are missing information, do not guess: raise a \
blocker by emitting <blocker mode=\"sync\" category=\"missing-info\">your question</blocker> \
in your reply (categories: missing-info, ambiguous-spec, external-dependency, \
tactical-decision, escalation; mode async does not pause your work).
- When the task is complete, reply with a short plain-text summary and no tool calls.";

const INVENTORY_CAP: usize = 120;
const EXCERPT_LINES: usize = 40;

/// Build the full system prompt for a task.
pub fn system_prompt(ctx: &TaskContext) -> String {
    let mut prompt = String::from(BEHAVIOR_RULES);

    // Layer 2: project-derived.
    prompt.push_str("\n\n## Project\n");
    let config = &ctx.workspace.config;
    if let Some(pm) = config.package_manager {
        prompt.push_str(&format!("- package manager: {pm}\n"));
    }
    if let Some(tf) = config.test_framework {
        prompt.push_str(&format!("- test framework: {tf}\n"));
    }
    if let Some(cmd) = config.effective_test_command() {
        prompt.push_str(&format!("- test command: {cmd}\n"));
    }
    if !config.lint_tools.is_empty() {
        prompt.push_str(&format!("- lint tools: {}\n", config.lint_tools.join(", ")));
    }

    if !ctx.file_inventory.is_empty() {
        prompt.push_str("\n### Files\n");
        for path in ctx.file_inventory.iter().take(INVENTORY_CAP) {
            prompt.push_str(&format!("{path}\n"));
        }
        if ctx.file_inventory.len() > INVENTORY_CAP {
            prompt.push_str(&format!(
                "... and {} more\n",
                ctx.file_inventory.len() - INVENTORY_CAP
            ));
        }
    }

    for (path, excerpt) in hinted_excerpts(ctx) {
        prompt.push_str(&format!("\n### Excerpt: {path}\n{excerpt}\n"));
    }

    // Layer 3: task-derived.
    prompt.push_str(&format!(
        "\n## Task {}\n{}\n\n{}\n",
        ctx.task.task_number, ctx.task.title, ctx.task.description
    ));
    if let Some(prd) = &ctx.prd_excerpt {
        prompt.push_str(&format!("\n### Requirements context\n{prd}\n"));
    }
    if !ctx.answered_blockers.is_empty() {
        prompt.push_str("\n### Answered questions\n");
        for blocker in &ctx.answered_blockers {
            if let Some(answer) = &blocker.answer {
                prompt.push_str(&format!("- Q: {}\n  A: {answer}\n", blocker.question));
            }
        }
    }
    if let Some(plan) = &ctx.plan {
        prompt.push_str(&format!("\n### Plan\n{plan}\n"));
    }

    prompt
}

/// The opening user message: begin by reading, end with a summary.
pub fn initial_user_message() -> String {
    "Start by reading the files relevant to this task, then make the minimum necessary \
     changes. Verify your work as you go. Finish with a short plain-text summary of what \
     you changed."
        .to_string()
}

fn path_hint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\w./-]+\.(py|js|jsx|ts|tsx|json|yaml|yml|toml|md)\b").expect("valid regex")
    })
}

/// Source files the task description names, excerpted head-first.
fn hinted_excerpts(ctx: &TaskContext) -> Vec<(String, String)> {
    let mut seen = std::collections::BTreeSet::new();
    let mut excerpts = Vec::new();
    for m in path_hint_regex().find_iter(&ctx.task.description) {
        let rel = m.as_str().trim_start_matches("./").to_string();
        if !seen.insert(rel.clone()) {
            continue;
        }
        let full = ctx.workspace.root.join(&rel);
        let Ok(content) = std::fs::read_to_string(&full) else {
            continue;
        };
        let excerpt: String = content
            .lines()
            .take(EXCERPT_LINES)
            .collect::<Vec<_>>()
            .join("\n");
        excerpts.push((rel, excerpt));
        if excerpts.len() >= 3 {
            break;
        }
    }
    excerpts
}
