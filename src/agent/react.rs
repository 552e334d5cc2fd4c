//! The ReAct execution engine: observe, think, act, until the model returns
//! a terminal text answer or the iteration budget runs out.
//!
//! Guards evaluated after every iteration, in order: loop detection (three
//! identical consecutive tool-call signatures), then compaction (75% of the
//! context window). Cancellation is checked at every suspension point.

use super::fixer::{FinalVerdict, final_verification};
use super::prompt;
use super::{AgentConfig, AgentEngine, CompactionOutcome, Compactor, EngineDeps, RunHandle, RunOutcome, RunStats, TaskContext};
use crate::errors::{AgentError, ProviderError};
use crate::events::EventType;
use crate::gates::all_passing;
use crate::provider::{
    ChatMessage, ChatOptions, ChatResponse, Purpose, TokenEstimator, ToolCallRequest,
    chat_with_retry,
};
use crate::signals;
use crate::store::models::{Blocker, BlockerCategory, BlockerMode};
use crate::tools::ToolContext;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Consecutive identical signatures that count as a stuck loop.
const STUCK_WINDOW: usize = 3;

const STUCK_NUDGE: &str = "You appear to be repeating the same actions without progress. Try a \
     different approach, or raise a blocker if you are missing information.";

pub struct ReactEngine {
    deps: EngineDeps,
}

impl ReactEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.deps.config
    }

    /// One provider round, absorbing a context-window overflow with a
    /// forced compaction and single retry.
    async fn call_provider(
        &self,
        messages: &mut Vec<ChatMessage>,
        options: &ChatOptions,
        estimator: &TokenEstimator,
        compactor: &Compactor,
        handle: &RunHandle,
    ) -> Result<Option<ChatResponse>, AgentError> {
        let specs = self.deps.tools.specs();
        match chat_with_retry(
            self.deps.provider.as_ref(),
            messages,
            &specs,
            options,
            &handle.cancel,
        )
        .await
        {
            Ok(response) => Ok(Some(response)),
            Err(ProviderError::Cancelled) => Ok(None),
            Err(ProviderError::ContextWindowExceeded) => {
                let window = self.deps.provider.context_window(options.purpose);
                compactor
                    .compact(
                        messages,
                        estimator,
                        self.deps.provider.as_ref(),
                        &handle.cancel,
                        window,
                    )
                    .await
                    .map_err(AgentError::Provider)?;
                match chat_with_retry(
                    self.deps.provider.as_ref(),
                    messages,
                    &specs,
                    options,
                    &handle.cancel,
                )
                .await
                {
                    Ok(response) => Ok(Some(response)),
                    Err(ProviderError::Cancelled) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// File any blocker tags in the assistant text; returns the first SYNC
    /// blocker, which halts the run.
    fn file_blockers(
        &self,
        ctx: &TaskContext,
        text: &str,
    ) -> Result<Option<Blocker>, AgentError> {
        let mut sync_blocker = None;
        for signal in signals::parse_blockers(text) {
            let context = crate::util::truncate_chars(&signals::strip_blocker_tags(text), 300);
            let blocker = self.deps.blockers.create(
                &ctx.task.id,
                signal.mode,
                &signal.question,
                &context,
                signal.category,
            )?;
            if signal.mode == BlockerMode::Sync && sync_blocker.is_none() {
                sync_blocker = Some(blocker);
            }
        }
        Ok(sync_blocker)
    }

    fn escalation_blocker(
        &self,
        ctx: &TaskContext,
        question: &str,
        context: &str,
    ) -> Result<Blocker, AgentError> {
        Ok(self.deps.blockers.create(
            &ctx.task.id,
            BlockerMode::Sync,
            question,
            context,
            BlockerCategory::Escalation,
        )?)
    }
}

#[async_trait]
impl AgentEngine for ReactEngine {
    fn name(&self) -> &'static str {
        "react"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        handle: &RunHandle,
    ) -> Result<(RunOutcome, RunStats), AgentError> {
        let config = &self.deps.config;
        let budget = config.iteration_budget(ctx.task.complexity);
        let estimator = TokenEstimator::new();
        let compactor = Compactor::new(config.recent_keep);
        let tool_ctx = ToolContext::new(ctx.workspace.clone(), self.deps.gates.clone())
            .with_cancel(handle.cancel.clone());

        let mut messages = vec![
            ChatMessage::system(prompt::system_prompt(ctx)),
            ChatMessage::user(prompt::initial_user_message()),
        ];
        let mut stats = RunStats::default();
        let mut files_modified: Vec<String> = Vec::new();
        let mut recent_signatures: VecDeque<String> = VecDeque::with_capacity(STUCK_WINDOW);
        let mut stuck_strikes = 0u8;
        let mut next_purpose = Purpose::Execution;
        let mut final_text: Option<String> = None;

        tracing::info!(task_id = %ctx.task.id, budget, "react loop starting");

        for iteration in 1..=budget {
            if handle.is_cancelled() {
                return Ok((RunOutcome::failed("cancelled"), stats));
            }
            stats.iterations = iteration;
            handle.events.emit(
                EventType::AgentStepStarted,
                &ctx.task.id,
                serde_json::json!({ "iteration": iteration, "budget": budget }),
            )?;

            let options = ChatOptions::for_purpose(next_purpose);
            next_purpose = Purpose::Execution;
            let Some(response) = self
                .call_provider(&mut messages, &options, &estimator, &compactor, handle)
                .await?
            else {
                return Ok((RunOutcome::failed("cancelled"), stats));
            };
            stats.usage.add(&response.usage);

            let sync_blocker = self.file_blockers(ctx, &response.text)?;

            if response.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant(response.text.clone()));
                handle.events.emit(
                    EventType::AgentStepCompleted,
                    &ctx.task.id,
                    serde_json::json!({ "iteration": iteration, "tool_calls": 0 }),
                )?;
                if let Some(blocker) = sync_blocker {
                    return Ok((RunOutcome::Blocked { blocker }, stats));
                }
                let text = signals::strip_blocker_tags(&response.text);
                if text.is_empty() {
                    // Nothing actionable; nudge once rather than burning
                    // the whole budget on empty turns.
                    messages.push(ChatMessage::user(
                        "Reply with tool calls, or finish with a plain-text summary.".to_string(),
                    ));
                    continue;
                }
                final_text = Some(text);
                break;
            }

            messages.push(ChatMessage::assistant_with_tools(
                response.text.clone(),
                response.tool_calls.clone(),
            ));
            if let Some(blocker) = sync_blocker {
                // SYNC halts before acting; resume starts a fresh
                // conversation with the answer in context.
                return Ok((RunOutcome::Blocked { blocker }, stats));
            }

            for call in &response.tool_calls {
                if handle.is_cancelled() {
                    return Ok((RunOutcome::failed("cancelled"), stats));
                }
                handle.events.emit(
                    EventType::ToolCalled,
                    &ctx.task.id,
                    serde_json::json!({
                        "tool": call.name,
                        "argument": primary_argument(&call.arguments),
                    }),
                )?;
                let outcome = self
                    .deps
                    .tools
                    .execute(&call.name, call.arguments.clone(), &tool_ctx)
                    .await;
                if !outcome.files_modified.is_empty() {
                    handle.events.emit(
                        EventType::FilesModified,
                        &ctx.task.id,
                        serde_json::json!({ "files": outcome.files_modified }),
                    )?;
                    for file in &outcome.files_modified {
                        if !files_modified.contains(file) {
                            files_modified.push(file.clone());
                        }
                    }
                }
                messages.push(ChatMessage::tool_result(call.id.clone(), outcome.text));
            }

            handle.events.emit(
                EventType::AgentStepCompleted,
                &ctx.task.id,
                serde_json::json!({
                    "iteration": iteration,
                    "tool_calls": response.tool_calls.len(),
                }),
            )?;

            // Guard 1: loop detection.
            if recent_signatures.len() == STUCK_WINDOW {
                recent_signatures.pop_front();
            }
            recent_signatures.push_back(signature_of(&response.tool_calls));
            let stuck = recent_signatures.len() == STUCK_WINDOW
                && recent_signatures.iter().all(|s| s == &recent_signatures[0]);
            if stuck {
                stuck_strikes += 1;
                recent_signatures.clear();
                if stuck_strikes == 1 {
                    tracing::warn!(task_id = %ctx.task.id, iteration, "stuck loop detected, injecting correction");
                    messages.push(ChatMessage::system(STUCK_NUDGE.to_string()));
                    next_purpose = Purpose::Correction;
                } else {
                    let blocker = self.escalation_blocker(
                        ctx,
                        "I keep repeating the same actions without making progress. How should I proceed?",
                        "loop detection fired twice",
                    )?;
                    return Ok((RunOutcome::Blocked { blocker }, stats));
                }
            }

            // Guard 2: compaction.
            let window = self.deps.provider.context_window(Purpose::Execution);
            let estimate = estimator.estimate_conversation(&messages);
            if Compactor::should_compact(estimate, window) {
                let CompactionOutcome { over_limit, .. } = compactor
                    .compact(
                        &mut messages,
                        &estimator,
                        self.deps.provider.as_ref(),
                        &handle.cancel,
                        window,
                    )
                    .await
                    .map_err(AgentError::Provider)?;
                if over_limit {
                    let blocker = self.escalation_blocker(
                        ctx,
                        "The conversation no longer fits the model's context window even after compaction.",
                        "compaction exhausted",
                    )?;
                    return Ok((RunOutcome::Blocked { blocker }, stats));
                }
            }

            // Guard 3: soft token budget.
            if let Some(token_budget) = config.token_budget {
                if stats.usage.total_tokens > token_budget {
                    let blocker = self.escalation_blocker(
                        ctx,
                        "This run exceeded its token budget. Should I continue?",
                        &format!("used {} tokens", stats.usage.total_tokens),
                    )?;
                    return Ok((RunOutcome::Blocked { blocker }, stats));
                }
            }
        }

        match final_text {
            Some(summary) => {
                match final_verification(
                    &self.deps,
                    ctx,
                    handle,
                    &tool_ctx,
                    &mut stats,
                    &mut files_modified,
                )
                .await?
                {
                    FinalVerdict::Passed => Ok((
                        RunOutcome::Completed {
                            summary,
                            files_modified,
                        },
                        stats,
                    )),
                    FinalVerdict::Blocked(blocker) => Ok((RunOutcome::Blocked { blocker }, stats)),
                    FinalVerdict::Cancelled => Ok((RunOutcome::failed("cancelled"), stats)),
                }
            }
            None => {
                // Iteration cap without a terminal answer: passing gates
                // still count as success.
                let results = self.deps.gates.run_all(&ctx.workspace).await;
                if all_passing(&results) {
                    Ok((
                        RunOutcome::Completed {
                            summary: "Iteration budget reached; all verification gates pass."
                                .to_string(),
                            files_modified,
                        },
                        stats,
                    ))
                } else {
                    Ok((RunOutcome::failed("iteration budget exhausted"), stats))
                }
            }
        }
    }
}

/// Stable signature of one iteration's tool calls: names plus canonicalized
/// arguments (sorted keys), ignoring call ids.
fn signature_of(calls: &[ToolCallRequest]) -> String {
    calls
        .iter()
        .map(|c| format!("{}({})", c.name, canonical_json(&c.arguments)))
        .collect::<Vec<_>>()
        .join(";")
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{k}:{}", canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn primary_argument(args: &serde_json::Value) -> String {
    for key in ["path", "pattern", "command", "target"] {
        if let Some(value) = args.get(key).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    String::new()
}
