//! Three-tier conversation compaction.
//!
//! Applied when the token estimate crosses 75% of the model's context
//! window; tiers escalate until usage drops to 60%. The most recent K
//! iterations are always preserved verbatim.
//!
//! - Tier 1: verbose tool outputs become one-line structured summaries.
//! - Tier 2: superseded tool results (re-read files, re-run tests, results
//!   restated by a later assistant message) are dropped to markers.
//! - Tier 3: the oldest half of the history is summarized by the provider
//!   into a single `[Summary]` system message.

use crate::errors::ProviderError;
use crate::provider::{
    ChatMessage, ChatOptions, ChatProvider, ChatRole, Purpose, TokenEstimator, chat_with_retry,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Usage fraction that triggers compaction.
pub const TRIGGER_FRACTION: f64 = 0.75;
/// Usage fraction compaction tries to get back under.
const TARGET_FRACTION: f64 = 0.60;
/// Usage fraction past which compaction failure escalates.
pub const ESCALATE_FRACTION: f64 = 0.90;

/// Tool results longer than this are eligible for tier-1 compression.
const VERBOSE_RESULT_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub tiers_applied: u8,
    pub estimate: usize,
    /// Estimate still above the escalation line after all tiers.
    pub over_limit: bool,
}

pub struct Compactor {
    /// Number of most-recent iterations kept verbatim (K).
    pub recent_keep: usize,
}

impl Compactor {
    pub fn new(recent_keep: usize) -> Self {
        Self { recent_keep }
    }

    /// Whether the conversation needs compaction at all.
    pub fn should_compact(estimate: usize, window: usize) -> bool {
        estimate as f64 > window as f64 * TRIGGER_FRACTION
    }

    /// Run tiers in order until usage is back under the target.
    pub async fn compact(
        &self,
        messages: &mut Vec<ChatMessage>,
        estimator: &TokenEstimator,
        provider: &dyn ChatProvider,
        cancel: &CancellationToken,
        window: usize,
    ) -> Result<CompactionOutcome, ProviderError> {
        let target = (window as f64 * TARGET_FRACTION) as usize;
        let escalate = (window as f64 * ESCALATE_FRACTION) as usize;
        let boundary = self.protected_boundary(messages);
        let mut tiers_applied = 0u8;

        let mut estimate = estimator.estimate_conversation(messages);

        if estimate > target {
            self.tier1_compress_results(messages, boundary);
            tiers_applied = 1;
            estimate = estimator.estimate_conversation(messages);
        }
        if estimate > target {
            self.tier2_drop_redundant(messages, boundary);
            tiers_applied = 2;
            estimate = estimator.estimate_conversation(messages);
        }
        if estimate > target {
            self.tier3_summarize(messages, boundary, provider, cancel)
                .await?;
            tiers_applied = 3;
            estimate = estimator.estimate_conversation(messages);
        }

        tracing::debug!(tiers_applied, estimate, window, "compaction finished");
        Ok(CompactionOutcome {
            tiers_applied,
            estimate,
            over_limit: estimate > escalate,
        })
    }

    /// First index of the protected suffix: everything from the K-th-last
    /// assistant message onward stays verbatim. Index 0 (the system prompt)
    /// is always protected too.
    fn protected_boundary(&self, messages: &[ChatMessage]) -> usize {
        let mut assistants_seen = 0;
        for (index, message) in messages.iter().enumerate().rev() {
            if message.role == ChatRole::Assistant {
                assistants_seen += 1;
                if assistants_seen >= self.recent_keep {
                    return index;
                }
            }
        }
        // Fewer than K iterations: protect the whole history.
        1.min(messages.len())
    }

    /// Tier 1: replace verbose tool outputs with a one-line summary of
    /// { tool, primary argument, outcome line, size }.
    fn tier1_compress_results(&self, messages: &mut [ChatMessage], boundary: usize) {
        let calls = call_index(messages);
        for message in messages[..boundary].iter_mut() {
            if message.role != ChatRole::Tool || message.content.len() <= VERBOSE_RESULT_CHARS {
                continue;
            }
            let (tool, arg) = message
                .tool_call_id
                .as_deref()
                .and_then(|id| calls.get(id).cloned())
                .unwrap_or_else(|| ("tool".to_string(), String::new()));
            let outcome_line = message.content.lines().next().unwrap_or("").trim().to_string();
            message.content = format!(
                "[{tool} {arg}] {} ({} chars elided)",
                crate::util::truncate_chars(&outcome_line, 120),
                message.content.len()
            );
        }
    }

    /// Tier 2: drop results made redundant by later ones.
    fn tier2_drop_redundant(&self, messages: &mut Vec<ChatMessage>, boundary: usize) {
        let calls = call_index(messages);

        // Last read position per path, and whether a later passing test run
        // exists, scanned over the whole history.
        let mut last_read: HashMap<String, usize> = HashMap::new();
        let mut last_passing_tests: Option<usize> = None;
        for (index, message) in messages.iter().enumerate() {
            if message.role != ChatRole::Tool {
                continue;
            }
            let Some((tool, arg)) = message
                .tool_call_id
                .as_deref()
                .and_then(|id| calls.get(id).cloned())
            else {
                continue;
            };
            match tool.as_str() {
                "read_file" => {
                    last_read.insert(arg, index);
                }
                "run_tests" if message.content.contains("All tests passed") => {
                    last_passing_tests = Some(index);
                }
                _ => {}
            }
        }

        // Assistant text that restates a result supersedes it.
        let assistant_text: Vec<(usize, String)> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == ChatRole::Assistant && !m.content.is_empty())
            .map(|(i, m)| (i, m.content.clone()))
            .collect();

        for (index, message) in messages.iter_mut().enumerate().take(boundary) {
            if message.role != ChatRole::Tool {
                continue;
            }
            let Some((tool, arg)) = message
                .tool_call_id
                .as_deref()
                .and_then(|id| calls.get(id).cloned())
            else {
                continue;
            };

            let superseded = match tool.as_str() {
                "read_file" => last_read.get(&arg).is_some_and(|&last| last > index),
                "run_tests" => last_passing_tests.is_some_and(|last| last > index),
                _ => false,
            };
            let restated = !superseded
                && assistant_text.iter().any(|(i, text)| {
                    *i > index
                        && message
                            .content
                            .lines()
                            .next()
                            .is_some_and(|line| !line.trim().is_empty() && text.contains(line.trim()))
                });

            if superseded {
                message.content = format!("[superseded {tool} result for {arg}]");
            } else if restated {
                message.content = "[result restated in a later message]".to_string();
            }
        }
    }

    /// Tier 3: summarize the oldest half into one `[Summary]` system
    /// message via a COMPACTION-purpose call.
    async fn tier3_summarize(
        &self,
        messages: &mut Vec<ChatMessage>,
        boundary: usize,
        provider: &dyn ChatProvider,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let mid = (messages.len() / 2).min(boundary);
        if mid <= 2 {
            return Ok(());
        }

        let rendered: String = messages[1..mid]
            .iter()
            .map(|m| format!("{:?}: {}\n", m.role, crate::util::truncate_chars(&m.content, 600)))
            .collect();

        let request = vec![
            ChatMessage::system(
                "Summarize this agent conversation segment. Capture: decisions made, files \
                 modified, blockers surfaced, and outstanding sub-goals. Be terse.",
            ),
            ChatMessage::user(rendered),
        ];
        let response = chat_with_retry(
            provider,
            &request,
            &[],
            &ChatOptions::for_purpose(Purpose::Compaction),
            cancel,
        )
        .await?;

        let summary = ChatMessage::system(format!("[Summary] {}", response.text));
        messages.splice(1..mid, [summary]);
        Ok(())
    }
}

/// call-id → (tool name, primary argument) over the whole conversation.
fn call_index(messages: &[ChatMessage]) -> HashMap<String, (String, String)> {
    let mut map = HashMap::new();
    for message in messages {
        for call in &message.tool_calls {
            map.insert(call.id.clone(), (call.name.clone(), primary_arg(&call.arguments)));
        }
    }
    map
}

fn primary_arg(args: &serde_json::Value) -> String {
    for key in ["path", "pattern", "command", "target", "glob"] {
        if let Some(value) = args.get(key).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    String::new()
}
