//! Core LLM types (provider-agnostic).
//!
//! These types represent the universal concepts shared across LLM providers.
//! Provider-specific details belong in adapter modules.

use super::errors::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (used to correlate results).
    pub id: String,
    /// Exposed name of the tool to invoke.
    pub name: String,
    /// Arguments exactly as the model produced them (JSON text, possibly malformed).
    pub arguments: String,
}

/// What came of one tool call.
///
/// `error_text` set marks a failure; `result_text` then holds the
/// human-readable message that goes back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub result_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolOutcome {
    /// Create a successful outcome.
    pub fn success(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result_text: text.into(),
            error_text: None,
        }
    }

    /// Create a failed outcome from an error message.
    ///
    /// A blank message is replaced so the outcome still reads as a failure.
    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = mcp::BLANK_ERROR_TEXT.to_string();
        }
        Self {
            call_id: call_id.into(),
            result_text: format!("Error: {error}"),
            error_text: Some(error),
        }
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.error_text.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// A message in the conversation.
///
/// Histories are append-only: entries are never reordered or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call, keyed by the call id.
    Tool {
        call_id: String,
        content: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message with text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    /// Create an assistant message with text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Create a tool-result message.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    /// Text content, empty when there is none.
    pub fn text(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                content
            }
            Self::Assistant { content, .. } => content.as_deref().unwrap_or_default(),
        }
    }

    /// Tool calls carried by an assistant message.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Tool specification exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Exposed tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Object-typed JSON Schema for the arguments.
    pub parameters: Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FinishReason {
    /// Natural end of response.
    #[default]
    Stop,
    /// Model wants to call tools.
    ToolCalls,
    /// Hit token limit.
    Length,
    /// Content filtered.
    ContentFilter,
    /// Unknown reason (forward compatibility).
    Unknown(String),
}

impl FinishReason {
    pub fn parse(reason: Option<&str>) -> Self {
        match reason {
            None | Some("stop") => Self::Stop,
            Some("tool_calls") | Some("function_call") => Self::ToolCalls,
            Some("length") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            Some(other) => Self::Unknown(other.to_string()),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Everything needed for a model request.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    /// Sent ahead of `messages`.
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    /// `None` disables tools entirely; never `Some(&[])`.
    pub tools: Option<&'a [ToolSpec]>,
}

/// The response from a model.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl ModelResponse {
    /// A plain text answer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A response requesting tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        }
    }

    /// Whether the model asked for at least one tool call.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The response as a history entry.
    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

/// Trait for LLM provider backends.
pub trait Backend: Send + Sync {
    fn complete(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_outcome_variants() {
        let success = ToolOutcome::success("id1", "done");
        assert!(!success.is_error());
        assert_eq!(success.result_text, "done");

        let failure = ToolOutcome::failure("id2", "unknown tool: nope");
        assert!(failure.is_error());
        assert_eq!(failure.result_text, "Error: unknown tool: nope");
        assert_eq!(failure.error_text.as_deref(), Some("unknown tool: nope"));
    }

    #[test]
    fn blank_failure_still_reads_as_error() {
        let failure = ToolOutcome::failure("id3", "  ");
        assert!(failure.is_error());
        assert_eq!(failure.error_text.as_deref(), Some("tool reported an error"));
        assert_eq!(failure.result_text, "Error: tool reported an error");
    }

    #[test]
    fn empty_error_text_is_not_a_failure() {
        let outcome = ToolOutcome {
            call_id: "c".into(),
            result_text: "ok".into(),
            error_text: Some(String::new()),
        };
        assert!(!outcome.is_error());
    }

    #[test]
    fn message_accessors() {
        let call = ToolCall {
            id: "1".into(),
            name: "fs_read_file".into(),
            arguments: "{}".into(),
        };
        let msg = Message::Assistant {
            content: None,
            tool_calls: vec![call.clone()],
        };
        assert_eq!(msg.text(), "");
        assert_eq!(msg.tool_calls(), &[call]);
        assert!(Message::user("hi").tool_calls().is_empty());
        assert_eq!(Message::tool("1", "result").text(), "result");
    }

    #[test]
    fn message_serializes_with_role_tag() {
        let json = serde_json::to_value(Message::tool("call_1", "ok")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["call_id"], "call_1");

        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::parse(None), FinishReason::Stop);
        assert_eq!(FinishReason::parse(Some("tool_calls")), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::parse(Some("weird")),
            FinishReason::Unknown("weird".into())
        );
    }

    #[test]
    fn response_wants_tools_only_with_calls() {
        assert!(!ModelResponse::text("done").wants_tools());
        let response = ModelResponse::tool_calls(vec![ToolCall {
            id: "a".into(),
            name: "web_search".into(),
            arguments: r#"{"query":"rust"}"#.into(),
        }]);
        assert!(response.wants_tools());
        assert_eq!(response.into_message().tool_calls().len(), 1);
    }
}
