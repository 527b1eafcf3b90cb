//! MCP (Model Context Protocol) client library.
//!
//! A [`Session`] owns one tool-provider child process and talks
//! newline-delimited JSON-RPC 2.0 over its stdio. Exchanges on a session are
//! serialized, so a single session can be shared across tasks.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Session, SessionConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = SessionConfig::new("fs", "python3").with_args(["servers/filesystem_server.py"]);
//!
//! let session = Session::spawn(config).await?;
//! session.initialize().await?;
//!
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = session
//!     .call_tool("read_file", serde_json::json!({ "file_path": "notes.md" }))
//!     .await?;
//! println!("{}", result.joined_text());
//!
//! session.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod session;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult, PROTOCOL_VERSION,
    RequestId, ServerCapabilities, ServerInfo, TextTag, Tool, ToolContent,
};
pub use session::{BLANK_ERROR_TEXT, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, Session, SessionConfig};
