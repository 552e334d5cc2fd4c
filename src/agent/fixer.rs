//! Final-verification sub-loop: quick-fix, bounded mini fix loop, and
//! fix-signature escalation.
//!
//! When the ReAct loop finishes, all gates run. A failure first gets one
//! LLM-free quick-fix attempt from a small pattern registry, then up to
//! `max_fix_retries` CORRECTION-purpose mini loops of at most `fix_turns`
//! provider rounds each. A failure signature that recurs unresolved, or an
//! exhausted retry budget, raises an escalation blocker.

use super::{EngineDeps, RunHandle, RunStats, TaskContext};
use crate::errors::AgentError;
use crate::events::EventType;
use crate::gates::{GateOutcome, GateReport, all_passing, failing_reports};
use crate::provider::{ChatMessage, ChatOptions, Purpose, chat_with_retry};
use crate::signals;
use crate::store::models::{Blocker, BlockerCategory, BlockerMode};
use crate::tools::ToolContext;
use std::collections::HashMap;

/// Outcome of final verification.
#[derive(Debug, Clone)]
pub enum FinalVerdict {
    Passed,
    Blocked(Blocker),
    Cancelled,
}

/// Tracks attempted-fix signatures (failure kind + files touched) so the
/// same failing fix is never retried blindly.
#[derive(Debug, Default)]
pub struct FixTracker {
    counts: HashMap<String, u32>,
}

impl FixTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt at this signature, returning how many times it has
    /// now been seen.
    pub fn record(&mut self, signature: &str) -> u32 {
        let count = self.counts.entry(signature.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Signature of a failure set: gates, leading codes, files involved.
pub fn failure_signature(reports: &[&GateReport]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for report in reports {
        parts.push(report.gate.clone());
        for item in report.items.iter().take(3) {
            if let Some(code) = &item.code {
                parts.push(code.clone());
            }
            if let Some(file) = &item.file {
                parts.push(file.split(':').next().unwrap_or(file).to_string());
            }
        }
    }
    parts.sort();
    parts.dedup();
    parts.join("|")
}

/// Names known to be importable from the Python standard library; used by
/// the undefined-name quick fix.
const PY_STDLIB: [&str; 16] = [
    "os", "sys", "re", "json", "time", "math", "pathlib", "typing", "datetime", "collections",
    "itertools", "functools", "subprocess", "random", "logging", "shutil",
];

/// Apply at most one quick fix from the registry. Returns a description of
/// what was fixed, or None when nothing matched.
pub fn quick_fix(ctx: &TaskContext, reports: &[&GateReport]) -> Option<String> {
    for report in reports {
        for item in &report.items {
            // Undefined stdlib name: insert the missing import.
            if item.code.as_deref() != Some("F821") {
                continue;
            }
            let Some(name) = item
                .message
                .split('`')
                .nth(1)
                .or_else(|| item.message.split('\'').nth(1))
            else {
                continue;
            };
            if !PY_STDLIB.contains(&name) {
                continue;
            }
            let Some(file) = item.file.as_deref().and_then(|f| f.split(':').next()) else {
                continue;
            };
            let full = ctx.workspace.root.join(file);
            let Ok(content) = std::fs::read_to_string(&full) else {
                continue;
            };
            if content.lines().any(|l| l.trim() == format!("import {name}")) {
                continue;
            }
            let updated = format!("import {name}\n{content}");
            if std::fs::write(&full, updated).is_err() {
                continue;
            }
            return Some(format!("inserted missing `import {name}` in {file}"));
        }
    }
    None
}

/// Run gates, then the quick-fix pass and the mini fix loop as needed.
#[allow(clippy::too_many_arguments)]
pub async fn final_verification(
    deps: &EngineDeps,
    ctx: &TaskContext,
    handle: &RunHandle,
    tool_ctx: &ToolContext,
    stats: &mut RunStats,
    files_modified: &mut Vec<String>,
) -> Result<FinalVerdict, AgentError> {
    let mut results = run_gates(deps, ctx, handle).await?;
    if all_passing(&results) {
        return Ok(FinalVerdict::Passed);
    }

    // Quick-fix pass: no LLM, at most once per final verification.
    if let Some(description) = quick_fix(ctx, &failing_reports(&results)) {
        tracing::info!(description, "applied quick fix");
        results = run_gates(deps, ctx, handle).await?;
        if all_passing(&results) {
            return Ok(FinalVerdict::Passed);
        }
    }

    let mut tracker = FixTracker::new();
    for attempt in 1..=deps.config.max_fix_retries {
        if handle.is_cancelled() {
            return Ok(FinalVerdict::Cancelled);
        }

        let reports = failing_reports(&results);
        let signature = failure_signature(&reports);
        if tracker.record(&signature) >= 2 {
            let blocker = escalate(deps, ctx, &reports, "the same failure keeps recurring")?;
            return Ok(FinalVerdict::Blocked(blocker));
        }

        tracing::info!(attempt, signature, "mini fix loop attempt");
        mini_fix_loop(deps, ctx, handle, tool_ctx, &reports, stats, files_modified).await?;

        results = run_gates(deps, ctx, handle).await?;
        if all_passing(&results) {
            return Ok(FinalVerdict::Passed);
        }
    }

    let reports = failing_reports(&results);
    let blocker = escalate(deps, ctx, &reports, "fix retries exhausted")?;
    Ok(FinalVerdict::Blocked(blocker))
}

async fn run_gates(
    deps: &EngineDeps,
    ctx: &TaskContext,
    handle: &RunHandle,
) -> Result<Vec<(String, GateOutcome)>, AgentError> {
    handle
        .events
        .emit(EventType::GatesStarted, &ctx.task.id, serde_json::json!({}))?;
    let results = deps.gates.run_all(&ctx.workspace).await;
    let passed = all_passing(&results);
    let failures: usize = failing_reports(&results).iter().map(|r| r.total_failures).sum();
    handle.events.emit(
        EventType::GatesCompleted,
        &ctx.task.id,
        serde_json::json!({ "passed": passed, "failures": failures }),
    )?;
    Ok(results)
}

/// One bounded CORRECTION-purpose ReAct loop scoped to the failing report.
async fn mini_fix_loop(
    deps: &EngineDeps,
    ctx: &TaskContext,
    handle: &RunHandle,
    tool_ctx: &ToolContext,
    reports: &[&GateReport],
    stats: &mut RunStats,
    files_modified: &mut Vec<String>,
) -> Result<(), AgentError> {
    let report_text: String = reports.iter().map(|r| r.describe()).collect();
    let mut messages = vec![
        ChatMessage::system(format!(
            "Verification failed after your changes. Fix exactly these failures; do not \
             refactor unrelated code; do not disable tests.\n\n{report_text}"
        )),
        ChatMessage::user("Fix the reported failures with the smallest possible edits.".to_string()),
    ];
    let specs = deps.tools.specs();
    let options = ChatOptions::for_purpose(Purpose::Correction);

    for _turn in 0..deps.config.fix_turns {
        if handle.is_cancelled() {
            return Ok(());
        }
        let response = chat_with_retry(
            deps.provider.as_ref(),
            &messages,
            &specs,
            &options,
            &handle.cancel,
        )
        .await?;
        stats.usage.add(&response.usage);

        if response.tool_calls.is_empty() {
            break;
        }
        messages.push(ChatMessage::assistant_with_tools(
            response.text.clone(),
            response.tool_calls.clone(),
        ));
        for call in &response.tool_calls {
            handle.events.emit(
                EventType::ToolCalled,
                &ctx.task.id,
                serde_json::json!({ "tool": call.name, "phase": "fix" }),
            )?;
            let outcome = deps.tools.execute(&call.name, call.arguments.clone(), tool_ctx).await;
            if !outcome.files_modified.is_empty() {
                handle.events.emit(
                    EventType::FilesModified,
                    &ctx.task.id,
                    serde_json::json!({ "files": outcome.files_modified }),
                )?;
                files_modified.extend(outcome.files_modified.clone());
            }
            messages.push(ChatMessage::tool_result(call.id.clone(), outcome.text));
        }
    }
    Ok(())
}

fn escalate(
    deps: &EngineDeps,
    ctx: &TaskContext,
    reports: &[&GateReport],
    reason: &str,
) -> Result<Blocker, AgentError> {
    let report_text: String = reports.iter().map(|r| r.describe()).collect();
    let question = format!(
        "Final verification cannot be fixed automatically ({reason}). How should I proceed?"
    );
    let blocker = deps.blockers.create(
        &ctx.task.id,
        BlockerMode::Sync,
        &signals::strip_blocker_tags(&question),
        &report_text,
        BlockerCategory::Escalation,
    )?;
    Ok(blocker)
}
