//! Scripted provider test double.
//!
//! Queue replies with `push`; each `chat` pops the next one and records the
//! call. An exhausted script answers with a terminal text response so agent
//! loops always finish.

use super::{
    ChatMessage, ChatOptions, ChatProvider, ChatResponse, ModelRouting, Purpose, StopReason,
    ToolCallRequest, ToolSpec,
};
use crate::errors::ProviderError;
use crate::store::models::TokenUsage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted turn.
pub enum ScriptedReply {
    /// Terminal text, no tool calls.
    Text(String),
    /// Tool calls with optional accompanying text.
    ToolCalls(Vec<ToolCallRequest>),
    /// Fail this turn with the given error.
    Error(ProviderError),
}

/// A recorded `chat` invocation, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub purpose: Purpose,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    recorded: Mutex<Vec<RecordedCall>>,
    routing: ModelRouting,
    context_window: usize,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            routing: ModelRouting::default(),
            context_window: 200_000,
        }
    }

    /// Shrink the context window to force compaction in tests.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn push(self, reply: ScriptedReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Convenience: queue a tool call turn.
    pub fn push_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        let call = ToolCallRequest {
            id: format!("call-{}", crate::util::new_id()),
            name: name.to_string(),
            arguments,
        };
        self.push(ScriptedReply::ToolCalls(vec![call]))
    }

    /// Convenience: queue a terminal text turn.
    pub fn push_text(self, text: &str) -> Self {
        self.push(ScriptedReply::Text(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    /// Purposes of all calls, in order.
    pub fn purposes(&self) -> Vec<Purpose> {
        self.recorded.lock().unwrap().iter().map(|c| c.purpose).collect()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn model_for(&self, purpose: Purpose) -> String {
        self.routing.model_for(purpose).to_string()
    }

    fn context_window(&self, _purpose: Purpose) -> usize {
        self.context_window
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.recorded.lock().unwrap().push(RecordedCall {
            purpose: options.purpose,
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let input_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.len() / 4) as u64 + 4)
            .sum();

        let reply = self.replies.lock().unwrap().pop_front();
        let (text, tool_calls, stop_reason) = match reply {
            Some(ScriptedReply::Text(text)) => (text, Vec::new(), StopReason::EndTurn),
            Some(ScriptedReply::ToolCalls(calls)) => (String::new(), calls, StopReason::ToolUse),
            Some(ScriptedReply::Error(e)) => return Err(e),
            None => ("Done.".to_string(), Vec::new(), StopReason::EndTurn),
        };

        let output_tokens = (text.len() / 4) as u64 + 8;
        Ok(ChatResponse {
            text,
            tool_calls,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_pop_in_order() {
        let provider = ScriptedProvider::new()
            .push_tool_call("read_file", serde_json::json!({"path": "a.py"}))
            .push_text("All done");

        let options = ChatOptions::for_purpose(Purpose::Execution);
        let first = provider.chat(&[ChatMessage::user("go")], &[], &options).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "read_file");
        assert_eq!(first.stop_reason, StopReason::ToolUse);

        let second = provider.chat(&[ChatMessage::user("go")], &[], &options).await.unwrap();
        assert_eq!(second.text, "All done");
        assert!(second.tool_calls.is_empty());

        // Exhausted script stays terminal.
        let third = provider.chat(&[ChatMessage::user("go")], &[], &options).await.unwrap();
        assert_eq!(third.stop_reason, StopReason::EndTurn);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn usage_is_nonzero() {
        let provider = ScriptedProvider::new().push_text("ok");
        let options = ChatOptions::for_purpose(Purpose::Planning);
        let response = provider
            .chat(&[ChatMessage::user("a long enough prompt")], &[], &options)
            .await
            .unwrap();
        assert!(response.usage.input_tokens > 0);
        assert!(response.usage.total_tokens >= response.usage.output_tokens);
        assert_eq!(provider.purposes(), vec![Purpose::Planning]);
    }
}
