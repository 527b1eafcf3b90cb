//! In-memory fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp::{CallToolResult, Tool, ToolContent};
use serde_json::{Value, json};

use crate::events::{Event, EventSink};
use crate::llm::{Backend, Message, ModelError, ModelRequest, ModelResponse, ToolSpec};
use crate::tools::{Launcher, ProviderConfig, ToolProvider};

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

#[derive(Debug, Clone)]
enum Behavior {
    Reply(Vec<ToolContent>),
    Fail(String),
    Sleep(Duration),
}

/// A tool the fake provider can serve.
#[derive(Debug, Clone)]
pub struct FakeTool {
    name: String,
    schema: Value,
    behavior: Behavior,
}

impl FakeTool {
    pub fn ok(name: &str, text: &str) -> Self {
        Self::parts(name, vec![ToolContent::text(text)])
    }

    pub fn parts(name: &str, parts: Vec<ToolContent>) -> Self {
        Self {
            name: name.into(),
            schema: json!({"type": "object", "properties": {}}),
            behavior: Behavior::Reply(parts),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            name: name.into(),
            schema: json!({"type": "object", "properties": {}}),
            behavior: Behavior::Fail(message.into()),
        }
    }

    pub fn sleeping(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            schema: json!({"type": "object", "properties": {}}),
            behavior: Behavior::Sleep(delay),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

/// Provider that serves canned tools and journals every operation.
pub struct FakeProvider {
    id: String,
    tools: Vec<FakeTool>,
    fail_handshake: bool,
    fail_shutdown: bool,
    journal: Journal,
}

impl ToolProvider for FakeProvider {
    async fn handshake(&self) -> mcp::Result<()> {
        if self.fail_handshake {
            return Err(mcp::Error::ProviderExited);
        }
        Ok(())
    }

    async fn list_tools(&self) -> mcp::Result<Vec<Tool>> {
        Ok(self
            .tools
            .iter()
            .map(|t| Tool {
                name: t.name.clone(),
                description: Some(format!("{} from {}", t.name, self.id)),
                input_schema: t.schema.clone(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> mcp::Result<CallToolResult> {
        record(&self.journal, format!("call {}/{name}", self.id));
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| mcp::Error::ToolCallFailed(format!("no tool {name}")))?;
        match &tool.behavior {
            Behavior::Reply(parts) => Ok(CallToolResult {
                content: parts.clone(),
                is_error: false,
            }),
            Behavior::Fail(message) => Err(mcp::Error::ToolCallFailed(message.clone())),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(CallToolResult::text(arguments.to_string()))
            }
        }
    }

    async fn shutdown(&self) -> mcp::Result<()> {
        record(&self.journal, format!("shutdown {}", self.id));
        if self.fail_shutdown {
            return Err(mcp::Error::ProviderExited);
        }
        Ok(())
    }
}

/// Launcher for [`FakeProvider`]s. Unknown ids fail to launch.
#[derive(Default)]
pub struct FakeLauncher {
    tools: HashMap<String, Vec<FakeTool>>,
    failing_handshake: Vec<String>,
    failing_shutdown: Vec<String>,
    journal: Journal,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, id: &str, tools: impl IntoIterator<Item = FakeTool>) -> Self {
        self.tools.insert(id.into(), tools.into_iter().collect());
        self
    }

    pub fn failing_handshake(mut self, id: &str) -> Self {
        self.tools.entry(id.into()).or_default();
        self.failing_handshake.push(id.into());
        self
    }

    pub fn failing_shutdown(mut self, id: &str) -> Self {
        self.failing_shutdown.push(id.into());
        self
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

impl Launcher for FakeLauncher {
    type Provider = FakeProvider;

    async fn launch(&self, config: &ProviderConfig) -> mcp::Result<FakeProvider> {
        let tools = self.tools.get(&config.id).cloned().ok_or_else(|| mcp::Error::Spawn {
            command: config.command.clone(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        record(&self.journal, format!("launch {}", config.id));
        Ok(FakeProvider {
            id: config.id.clone(),
            tools,
            fail_handshake: self.failing_handshake.contains(&config.id),
            fail_shutdown: self.failing_shutdown.contains(&config.id),
            journal: Arc::clone(&self.journal),
        })
    }
}

/// One request as the backend saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolSpec>>,
}

/// Backend that replays scripted responses and records each request.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    seen: Mutex<Vec<SeenRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Repeats `response` for every request.
    pub fn repeating(response: ModelResponse, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(response.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(SeenRequest {
            system: request.system.map(str::to_string),
            messages: request.messages.to_vec(),
            tools: request.tools.map(<[ToolSpec]>::to_vec),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ModelError::Api("script exhausted".into())))
    }
}

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Event type tags in order, as they appear on the wire.
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }
}

impl EventSink for RecordingSink {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
