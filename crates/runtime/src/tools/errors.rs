use std::time::Duration;

use thiserror::Error;

/// Startup failures. Any of these stops the service from coming up.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("provider `{provider}` failed to launch: {source}")]
    Launch {
        provider: String,
        #[source]
        source: mcp::Error,
    },

    #[error("provider `{provider}` handshake failed: {source}")]
    Handshake {
        provider: String,
        #[source]
        source: mcp::Error,
    },

    #[error("provider `{provider}` tool discovery failed: {source}")]
    Discovery {
        provider: String,
        #[source]
        source: mcp::Error,
    },

    #[error("provider id `{0}` is configured more than once")]
    DuplicateProvider(String),

    #[error(
        "exposed name `{name}` is claimed by both {first_provider}/{first_tool} and {second_provider}/{second_tool}"
    )]
    NameCollision {
        name: String,
        first_provider: String,
        first_tool: String,
        second_provider: String,
        second_tool: String,
    },
}

/// Failures of a single tool call. These become tool outcomes, never turn aborts.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The provider ran the tool and reported an error.
    #[error("{message}")]
    Failed { tool: String, message: String },

    #[error("tool {tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("tool {tool} transport failure: {source}")]
    Transport {
        tool: String,
        #[source]
        source: mcp::Error,
    },
}

impl CallError {
    pub(crate) fn from_provider(tool: &str, error: mcp::Error) -> Self {
        let tool = tool.to_string();
        match error {
            mcp::Error::ToolCallFailed(message) => Self::Failed { tool, message },
            mcp::Error::Timeout(after) => Self::Timeout { tool, after },
            source => Self::Transport { tool, source },
        }
    }
}
