//! Abstract chat-with-tools provider contract.
//!
//! The core never speaks to a specific vendor; it depends on `ChatProvider`
//! plus a purpose-to-model routing table. Transient failures are retried
//! here with bounded exponential backoff so callers only see the terminal
//! result.

pub mod mock;

use crate::errors::ProviderError;
use crate::store::models::TokenUsage;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a provider call is for. Routing may send different purposes to
/// models of different capability and cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Planning,
    Execution,
    Correction,
    Review,
    Compaction,
    DependencyInference,
}

impl Purpose {
    pub const ALL: [Purpose; 6] = [
        Purpose::Planning,
        Purpose::Execution,
        Purpose::Correction,
        Purpose::Review,
        Purpose::Compaction,
        Purpose::DependencyInference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Planning => "planning",
            Purpose::Execution => "execution",
            Purpose::Correction => "correction",
            Purpose::Review => "review",
            Purpose::Compaction => "compaction",
            Purpose::DependencyInference => "dependency_inference",
        }
    }
}

/// Purpose → model name mapping. Configuration, not code: unspecified
/// purposes fall back to the default model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRouting {
    pub default_model: String,
    #[serde(default)]
    pub overrides: HashMap<Purpose, String>,
}

impl Default for ModelRouting {
    fn default() -> Self {
        Self {
            default_model: "agent-default".to_string(),
            overrides: HashMap::new(),
        }
    }
}

impl ModelRouting {
    pub fn model_for(&self, purpose: Purpose) -> &str {
        self.overrides
            .get(&purpose)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A message in the conversation. Tool results carry the id of the call
/// they answer; assistant messages may carry requested tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool descriptor shipped to the model: name, description, JSON schema for
/// the arguments. Owned by the provider layer so the tool surface can sit
/// above it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Result of one chat round.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text, possibly empty.
    pub text: String,
    /// Zero or more tool-call requests.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    pub stop_reason: StopReason,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub purpose: Purpose,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl ChatOptions {
    pub fn for_purpose(purpose: Purpose) -> Self {
        Self {
            purpose,
            max_tokens: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// The abstract provider: one chat round per call. Implementations map the
/// purpose to a concrete model via their routing table.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The model a purpose routes to (for logging and window sizing).
    fn model_for(&self, purpose: Purpose) -> String;

    /// Context window, in tokens, of the model serving `purpose`.
    fn context_window(&self, purpose: Purpose) -> usize;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Backoff schedule for retryable failures: 1s, 2s, 4s, 8s, 16s.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 5;
/// Timeouts get a shorter leash: two retries, then fatal.
const MAX_TIMEOUT_ATTEMPTS: u32 = 3;

/// Call the provider, absorbing transient failures with exponential backoff.
/// Cancellation is honored between attempts.
pub async fn chat_with_retry(
    provider: &dyn ChatProvider,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    options: &ChatOptions,
    cancel: &CancellationToken,
) -> Result<ChatResponse, ProviderError> {
    let mut attempt: u32 = 0;
    let mut timeout_attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match provider.chat(messages, tools, options).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() => {
                if matches!(e, ProviderError::Timeout { .. }) {
                    timeout_attempts += 1;
                    if timeout_attempts >= MAX_TIMEOUT_ATTEMPTS {
                        return Err(e);
                    }
                }
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "provider call failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Estimates message token counts from content length (~4 chars/token),
/// memoized by content hash. Compaction triggers use these estimates, never
/// exact counts.
#[derive(Default)]
pub struct TokenEstimator {
    cache: DashMap<[u8; 32], usize>,
}

const CHARS_PER_TOKEN: usize = 4;

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        let digest: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Some(cached) = self.cache.get(&digest) {
            return *cached;
        }
        let estimate = text.chars().count().div_ceil(CHARS_PER_TOKEN);
        self.cache.insert(digest, estimate);
        estimate
    }

    pub fn estimate_message(&self, message: &ChatMessage) -> usize {
        let mut total = self.estimate_text(&message.content);
        for call in &message.tool_calls {
            total += self.estimate_text(&call.arguments.to_string());
            total += call.name.len().div_ceil(CHARS_PER_TOKEN);
        }
        // Per-message framing overhead.
        total + 4
    }

    pub fn estimate_conversation(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{ScriptedProvider, ScriptedReply};
    use super::*;

    #[test]
    fn routing_falls_back_to_default() {
        let mut routing = ModelRouting::default();
        routing
            .overrides
            .insert(Purpose::Compaction, "small-fast".to_string());
        assert_eq!(routing.model_for(Purpose::Compaction), "small-fast");
        assert_eq!(routing.model_for(Purpose::Execution), "agent-default");
    }

    #[test]
    fn estimator_caches_by_content() {
        let estimator = TokenEstimator::new();
        let text = "x".repeat(400);
        assert_eq!(estimator.estimate_text(&text), 100);
        assert_eq!(estimator.estimate_text(&text), 100);
        assert_eq!(estimator.cache.len(), 1);
    }

    #[test]
    fn conversation_estimate_includes_tool_calls() {
        let estimator = TokenEstimator::new();
        let plain = ChatMessage::user("read the file");
        let with_call = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: serde_json::json!({"path": "src/main.py"}),
            }],
        );
        let total = estimator.estimate_conversation(&[plain, with_call]);
        assert!(total > 8);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::RateLimited))
            .push(ScriptedReply::Text("recovered".into()));
        let cancel = CancellationToken::new();

        tokio::time::pause();
        let handle = tokio::spawn(async move {
            chat_with_retry(
                &provider,
                &[ChatMessage::user("hi")],
                &[],
                &ChatOptions::for_purpose(Purpose::Execution),
                &cancel,
            )
            .await
        });
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.text, "recovered");
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest(
                "bad schema".into(),
            )))
            .push(ScriptedReply::Text("unreachable".into()));
        let cancel = CancellationToken::new();
        let err = chat_with_retry(
            &provider,
            &[ChatMessage::user("hi")],
            &[],
            &ChatOptions::for_purpose(Purpose::Execution),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let provider = ScriptedProvider::new().push(ScriptedReply::Text("never".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = chat_with_retry(
            &provider,
            &[ChatMessage::user("hi")],
            &[],
            &ChatOptions::for_purpose(Purpose::Execution),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.calls(), 0);
    }
}
