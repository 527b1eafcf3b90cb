//! The orchestration loop: drive the model through tool rounds to an answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::adapter::{adapt, missing_required};
use crate::error::TurnError;
use crate::events::{Event, EventSink};
use crate::llm::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, ToolCall, ToolOutcome, ToolSpec,
};
use crate::tools::{CallError, SessionManager, ToolProvider};

/// Prompt sent ahead of every conversation unless configured otherwise.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to three tool sets:

1. **GitHub tools** (github_*): Explore repositories, read files, create issues.
2. **Web Search tools** (web_search, get_answer): Search the web and get direct answers.
3. **Filesystem tools** (fs_*): List, read, and write files in a sandboxed directory.

When a task needs several tools, chain them: for example, search the web to find a repository, read its README with the GitHub tools, then save a summary to the filesystem.

Be concise. If a tool call fails, explain the error and try another approach.";

/// Tool-requesting model rounds allowed per turn.
pub const DEFAULT_MAX_ROUNDS: u32 = 16;

/// Characters of a tool result shown in `tool_end` events.
pub const DEFAULT_DISPLAY_CAP: usize = 2000;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_prompt: String,
    pub max_rounds: u32,
    pub display_cap: usize,
    /// Bound on a single tool call, on top of the provider's own timeout.
    pub tool_timeout: Option<Duration>,
    pub model_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            display_cap: DEFAULT_DISPLAY_CAP,
            tool_timeout: None,
            model_timeout: None,
        }
    }
}

/// Runs turns against a model backend and a shared session manager.
///
/// Stateless across turns apart from the history the caller hands in, so
/// one orchestrator serves every conversation.
pub struct Orchestrator<B, P = mcp::Session> {
    backend: B,
    tools: Arc<SessionManager<P>>,
    specs: Vec<ToolSpec>,
    config: OrchestratorConfig,
}

impl<B: Backend, P: ToolProvider> Orchestrator<B, P> {
    pub fn new(backend: B, tools: Arc<SessionManager<P>>) -> Self {
        let specs = adapt(tools.capabilities());
        Self {
            backend,
            tools,
            specs,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tools(&self) -> &Arc<SessionManager<P>> {
        &self.tools
    }

    /// Tool specs offered to the model, in registry order.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Process one user message.
    ///
    /// Appends the user message, every tool round, and the final answer to
    /// `history`, emitting lifecycle events along the way. Tool failures are
    /// fed back to the model; only model failures and the round limit end a
    /// turn early, and both are reported to `sink` before returning.
    pub async fn run<S: EventSink>(
        &self,
        user_text: &str,
        history: &mut Vec<Message>,
        sink: &S,
    ) -> Result<String, TurnError> {
        history.push(Message::user(user_text));

        let tools = (!self.specs.is_empty()).then_some(self.specs.as_slice());
        let mut rounds = 0u32;
        let mut partial = String::new();

        loop {
            let response = match self.complete(history, tools).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, rounds, "model call failed");
                    let err = TurnError::Model(e);
                    sink.emit(Event::error(err.to_string())).await;
                    return Err(err);
                }
            };

            if let Some(text) = response.content.as_deref().filter(|t| !t.trim().is_empty()) {
                partial = text.to_string();
            }

            if !response.wants_tools() {
                let answer = response.content.unwrap_or_default();
                tracing::info!(rounds, chars = answer.len(), "turn complete");
                history.push(Message::assistant(answer.clone()));
                sink.emit(Event::AssistantMessage {
                    content: answer.clone(),
                })
                .await;
                return Ok(answer);
            }

            rounds += 1;
            if rounds > self.config.max_rounds {
                let rounds = self.config.max_rounds;
                tracing::warn!(rounds, "tool round limit reached");
                history.push(Message::assistant(partial.clone()));
                let err = TurnError::RoundLimit { rounds, partial };
                sink.emit(Event::error(err.to_string())).await;
                return Err(err);
            }

            tracing::debug!(round = rounds, calls = response.tool_calls.len(), "executing tool calls");
            let calls = response.tool_calls.clone();
            history.push(response.into_message());

            for call in &calls {
                let outcome = self.execute(call, sink).await;
                history.push(Message::tool(outcome.call_id, outcome.result_text));
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelResponse, ModelError> {
        let system = Some(self.config.system_prompt.as_str()).filter(|s| !s.is_empty());
        let request = ModelRequest {
            system,
            messages,
            tools,
        };
        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.complete(request))
                .await
                .map_err(|_| ModelError::Timeout(limit))?,
            None => self.backend.complete(request).await,
        }
    }

    async fn execute<S: EventSink>(&self, call: &ToolCall, sink: &S) -> ToolOutcome {
        let args = parse_arguments(call);

        if let Some(capability) = self.tools.capability(&call.name) {
            let missing = missing_required(&capability.parameter_schema, &args);
            if !missing.is_empty() {
                tracing::warn!(tool = %call.name, ?missing, "arguments lack required keys");
            }
        }

        sink.emit(Event::ToolStart {
            tool: call.name.clone(),
            args: args.clone(),
            call_id: call.id.clone(),
        })
        .await;

        let started = Instant::now();
        let result = match self.config.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, self.tools.call_tool(&call.name, args))
                .await
                .unwrap_or_else(|_| {
                    Err(CallError::Timeout {
                        tool: call.name.clone(),
                        after: limit,
                    })
                }),
            None => self.tools.call_tool(&call.name, args).await,
        };

        let outcome = match result {
            Ok(text) => ToolOutcome::success(&call.id, text),
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                ToolOutcome::failure(&call.id, e.to_string())
            }
        };
        tracing::debug!(
            tool = %call.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            is_error = outcome.is_error(),
            "tool call finished"
        );

        sink.emit(Event::ToolEnd {
            tool: call.name.clone(),
            call_id: call.id.clone(),
            result: truncate(&outcome.result_text, self.config.display_cap).to_string(),
            error: outcome.error_text.clone(),
        })
        .await;

        outcome
    }
}

/// Arguments as a JSON object; anything else degrades to `{}`.
fn parse_arguments(call: &ToolCall) -> Value {
    if call.arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(tool = %call.name, arguments = %other, "tool arguments are not an object");
            Value::Object(Map::new())
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "malformed tool arguments");
            Value::Object(Map::new())
        }
    }
}

/// At most `max_chars` characters of `text`.
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeProvider, FakeTool, RecordingSink, ScriptedBackend};
    use crate::tools::{NameOverrides, ProviderConfig};
    use serde_json::json;

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    async fn manager(launcher: &FakeLauncher, ids: &[&str]) -> Arc<SessionManager<FakeProvider>> {
        let configs: Vec<_> = ids.iter().map(|id| ProviderConfig::new(*id, "fake")).collect();
        let overrides =
            NameOverrides::from([("web_web_search".to_string(), "web_search".to_string())]);
        Arc::new(
            SessionManager::connect_with(launcher, &configs, &overrides)
                .await
                .unwrap(),
        )
    }

    fn standard_launcher() -> FakeLauncher {
        FakeLauncher::new()
            .provider(
                "fs",
                [
                    FakeTool::ok("read_file", "file contents")
                        .with_schema(json!({"type": "object", "required": ["file_path"]})),
                    FakeTool::sleeping("echo_args", Duration::ZERO),
                ],
            )
            .provider(
                "web",
                [FakeTool::failing("web_search", "rate limited")],
            )
    }

    #[tokio::test]
    async fn zero_call_turn_appends_one_answer() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([Ok(ModelResponse::text("Hello there"))]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        let answer = orchestrator.run("hi", &mut history, &sink).await.unwrap();

        assert_eq!(answer, "Hello there");
        assert_eq!(history, [Message::user("hi"), Message::assistant("Hello there")]);
        assert_eq!(
            sink.events(),
            [Event::AssistantMessage {
                content: "Hello there".into()
            }]
        );
    }

    #[tokio::test]
    async fn two_calls_one_failure_then_answer() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([
            Ok(ModelResponse::tool_calls(vec![
                call("c1", "fs_read_file", r#"{"file_path":"notes.md"}"#),
                call("c2", "web_search", r#"{"query":"rust"}"#),
            ])),
            Ok(ModelResponse::text("Read the notes; search failed.")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        let answer = orchestrator
            .run("summarize", &mut history, &sink)
            .await
            .unwrap();
        assert_eq!(answer, "Read the notes; search failed.");

        assert_eq!(
            sink.kinds(),
            ["tool_start", "tool_end", "tool_start", "tool_end", "assistant_message"]
        );
        let events = sink.events();
        assert!(matches!(
            &events[1],
            Event::ToolEnd { call_id, result, error: None, .. }
                if call_id == "c1" && result == "file contents"
        ));
        assert!(matches!(
            &events[3],
            Event::ToolEnd { tool, error: Some(e), result, .. }
                if tool == "web_search" && e == "rate limited" && result == "Error: rate limited"
        ));

        assert_eq!(history.len(), 5);
        assert_eq!(history[1].tool_calls().len(), 2);
        assert_eq!(history[2], Message::tool("c1", "file contents"));
        assert_eq!(history[3], Message::tool("c2", "Error: rate limited"));
        assert_eq!(history[4], Message::assistant("Read the notes; search failed."));

        // The second model pass sees both tool results.
        let requests = orchestrator.backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[3], Message::tool("c2", "Error: rate limited"));
    }

    #[tokio::test]
    async fn display_is_capped_but_history_is_full() {
        let long = "é".repeat(DEFAULT_DISPLAY_CAP + 500);
        let launcher = FakeLauncher::new().provider("fs", [FakeTool::ok("read_file", &long)]);
        let backend = ScriptedBackend::new([
            Ok(ModelResponse::tool_calls(vec![call("c1", "fs_read_file", "{}")])),
            Ok(ModelResponse::text("done")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        orchestrator.run("read", &mut history, &sink).await.unwrap();

        let events = sink.events();
        let Event::ToolEnd { result, .. } = &events[1] else {
            panic!("expected tool_end");
        };
        assert_eq!(result.chars().count(), DEFAULT_DISPLAY_CAP);
        assert_eq!(history[2].text(), long);
    }

    #[tokio::test]
    async fn malformed_arguments_degrade_to_empty_object() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([
            Ok(ModelResponse::tool_calls(vec![
                call("c1", "fs_echo_args", "{not json"),
                call("c2", "fs_echo_args", "[1, 2]"),
                call("c3", "fs_echo_args", ""),
            ])),
            Ok(ModelResponse::text("ok")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        orchestrator.run("go", &mut history, &sink).await.unwrap();

        for event in sink.events() {
            if let Event::ToolStart { args, .. } = event {
                assert_eq!(args, json!({}));
            }
        }
        assert_eq!(history[2].text(), "{}");
        assert_eq!(history[3].text(), "{}");
        assert_eq!(history[4].text(), "{}");
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_to_the_model() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([
            Ok(ModelResponse::tool_calls(vec![call("c1", "read_file", "{}")])),
            Ok(ModelResponse::text("sorry")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        let answer = orchestrator.run("go", &mut history, &sink).await.unwrap();

        assert_eq!(answer, "sorry");
        assert_eq!(history[2], Message::tool("c1", "Error: unknown tool: read_file"));
        assert!(!launcher.journal().iter().any(|e| e.starts_with("call")));
    }

    #[tokio::test]
    async fn empty_registry_sends_no_tools() {
        let backend = ScriptedBackend::new([Ok(ModelResponse::text("plain"))]);
        let orchestrator =
            Orchestrator::new(backend, Arc::new(SessionManager::<FakeProvider>::empty()));
        let mut history = Vec::new();

        orchestrator
            .run("hi", &mut history, &RecordingSink::default())
            .await
            .unwrap();

        let requests = orchestrator.backend.requests();
        assert!(requests[0].tools.is_none());
        assert_eq!(requests[0].system.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(requests[0].messages, [Message::user("hi")]);
    }

    #[tokio::test]
    async fn tools_are_offered_in_registry_order() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([Ok(ModelResponse::text("ok"))]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);

        orchestrator
            .run("hi", &mut Vec::new(), &RecordingSink::default())
            .await
            .unwrap();

        let tools = orchestrator.backend.requests()[0].tools.clone().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["fs_read_file", "fs_echo_args", "web_search"]);
    }

    #[tokio::test]
    async fn round_limit_ends_turn_with_partial_answer() {
        let launcher = standard_launcher();
        let looping = ModelResponse {
            content: Some("still looking".into()),
            ..ModelResponse::tool_calls(vec![call("c", "fs_echo_args", "{}")])
        };
        let backend = ScriptedBackend::repeating(looping, 10);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await)
            .with_config(OrchestratorConfig {
                max_rounds: 2,
                ..Default::default()
            });
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        let err = orchestrator.run("go", &mut history, &sink).await.unwrap_err();

        assert!(matches!(
            err,
            TurnError::RoundLimit { rounds: 2, ref partial } if partial == "still looking"
        ));
        assert_eq!(orchestrator.backend.requests().len(), 3);
        assert_eq!(sink.kinds().last().map(String::as_str), Some("error"));
        assert_eq!(history.last(), Some(&Message::assistant("still looking")));
    }

    #[tokio::test]
    async fn model_error_is_reported_and_history_stays_usable() {
        let launcher = standard_launcher();
        let backend = ScriptedBackend::new([
            Err(ModelError::Api("boom".into())),
            Ok(ModelResponse::text("recovered")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs", "web"]).await);
        let sink = RecordingSink::default();
        let mut history = Vec::new();

        let err = orchestrator.run("first", &mut history, &sink).await.unwrap_err();
        assert!(matches!(err, TurnError::Model(ModelError::Api(_))));
        assert_eq!(
            sink.events(),
            [Event::error("Agent error: provider api: boom")]
        );
        assert_eq!(history, [Message::user("first")]);

        let answer = orchestrator.run("second", &mut history, &sink).await.unwrap();
        assert_eq!(answer, "recovered");
        assert_eq!(
            orchestrator.backend.requests()[1].messages,
            [Message::user("first"), Message::user("second")]
        );
    }

    #[tokio::test]
    async fn slow_tool_times_out_into_an_outcome() {
        let launcher =
            FakeLauncher::new().provider("fs", [FakeTool::sleeping("slow", Duration::from_millis(500))]);
        let backend = ScriptedBackend::new([
            Ok(ModelResponse::tool_calls(vec![call("c1", "fs_slow", "{}")])),
            Ok(ModelResponse::text("gave up")),
        ]);
        let orchestrator = Orchestrator::new(backend, manager(&launcher, &["fs"]).await)
            .with_config(OrchestratorConfig {
                tool_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            });
        let mut history = Vec::new();

        orchestrator
            .run("go", &mut history, &RecordingSink::default())
            .await
            .unwrap();

        assert!(history[2].text().starts_with("Error: tool fs_slow timed out"));
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let backend = ScriptedBackend::new([Ok(ModelResponse::text("late"))])
            .with_delay(Duration::from_millis(500));
        let orchestrator =
            Orchestrator::new(backend, Arc::new(SessionManager::<FakeProvider>::empty()))
                .with_config(OrchestratorConfig {
                    model_timeout: Some(Duration::from_millis(20)),
                    ..Default::default()
                });
        let sink = RecordingSink::default();

        let err = orchestrator
            .run("hi", &mut Vec::new(), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Model(ModelError::Timeout(_))));
        assert_eq!(sink.kinds(), ["error"]);
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("", 0), "");
    }
}
