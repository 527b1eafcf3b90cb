//! Stdio MCP sessions as tool providers.

use mcp::{CallToolResult, Session, SessionConfig, Tool};
use serde_json::Value;

use super::{Launcher, ProviderConfig, ToolProvider};

/// Launches each provider as a child process speaking MCP on stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

impl Launcher for StdioLauncher {
    type Provider = Session;

    async fn launch(&self, config: &ProviderConfig) -> mcp::Result<Session> {
        let mut session_config = SessionConfig::new(&config.id, &config.command)
            .with_args(config.args.iter().cloned());
        session_config.env = config.env.clone();
        if let Some(timeout) = config.timeout() {
            session_config.timeout = timeout;
        }
        Session::spawn(session_config).await
    }
}

impl ToolProvider for Session {
    async fn handshake(&self) -> mcp::Result<()> {
        self.initialize().await.map(|_| ())
    }

    async fn list_tools(&self) -> mcp::Result<Vec<Tool>> {
        Session::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> mcp::Result<CallToolResult> {
        Session::call_tool(self, name, arguments).await
    }

    async fn shutdown(&self) -> mcp::Result<()> {
        Session::shutdown(self).await
    }
}
