//! Switchboard runtime: tool routing and the model orchestration loop.
//!
//! This crate connects a language-model backend to tools hosted by external
//! provider processes, and streams progress to whoever is listening.
//!
//! # Overview
//!
//! - **SessionManager**: spawns tool providers, discovers their tools, and
//!   routes calls by a process-unique exposed name.
//! - **adapt**: turns the merged registry into tool specs for the model.
//! - **Backend**: a trait abstracting model APIs; [`OpenAiBackend`] speaks
//!   the Chat Completions protocol.
//! - **Orchestrator**: runs one turn, looping through tool rounds until the
//!   model produces a final answer, emitting [`Event`]s as it goes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use runtime::{NameOverrides, OpenAiBackend, Orchestrator, ProviderConfig, SessionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let providers = [ProviderConfig::new("fs", "python3").with_args(["servers/filesystem_server.py"])];
//! let tools = Arc::new(SessionManager::connect_all(&providers, &NameOverrides::new()).await?);
//!
//! let backend = OpenAiBackend::builder("gpt-4o").api_key("sk-...").build();
//! let orchestrator = Orchestrator::new(backend, Arc::clone(&tools));
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut history = Vec::new();
//! let answer = orchestrator.run("List the sandbox files", &mut history, &tx).await?;
//! println!("{answer}");
//! while let Ok(event) = rx.try_recv() {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//!
//! tools.disconnect_all().await;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod backend;
mod error;
mod events;
pub mod llm;
mod orchestrator;
pub mod tools;

#[cfg(test)]
mod testing;

pub use adapter::{adapt, missing_required};
pub use backend::{DEFAULT_BASE_URL, OpenAiBackend, OpenAiBackendBuilder};
pub use error::{Result, TurnError};
pub use events::{Event, EventSink};
pub use llm::{
    Backend, FinishReason, Message, ModelError, ModelRequest, ModelResponse, ToolCall,
    ToolOutcome, ToolSpec, Usage,
};
pub use orchestrator::{
    DEFAULT_DISPLAY_CAP, DEFAULT_MAX_ROUNDS, DEFAULT_SYSTEM_PROMPT, Orchestrator,
    OrchestratorConfig,
};
pub use tools::{
    CallError, CapabilityDescriptor, ConnectError, NameOverrides, NamespaceMapping,
    ProviderConfig, SessionManager, StdioLauncher,
};
