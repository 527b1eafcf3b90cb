//! Lifecycle events streamed to the client while a turn runs.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Progress of a turn, in emission order.
///
/// Serialized with a `type` tag, so these are the frames the chat
/// transports send verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A tool call is about to run.
    ToolStart {
        tool: String,
        args: Value,
        call_id: String,
    },
    /// A tool call finished. `result` is truncated for display.
    ToolEnd {
        tool: String,
        call_id: String,
        result: String,
        error: Option<String>,
    },
    /// The final answer of the turn.
    AssistantMessage { content: String },
    /// The turn failed.
    #[serde(rename = "error")]
    ErrorNotice { content: String },
}

impl Event {
    pub fn error(content: impl Into<String>) -> Self {
        Self::ErrorNotice {
            content: content.into(),
        }
    }
}

/// Receives events as the orchestrator produces them.
///
/// Delivery problems stay with the sink: a turn never fails because a
/// client went away.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event) -> impl Future<Output = ()> + Send;
}

impl EventSink for UnboundedSender<Event> {
    async fn emit(&self, event: Event) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
