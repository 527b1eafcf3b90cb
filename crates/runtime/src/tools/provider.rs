//! Tool provider traits.

use std::future::Future;

use mcp::{CallToolResult, Tool};
use serde_json::Value;

use super::ProviderConfig;

/// One connected tool provider.
///
/// This is the boundary between the session manager and whatever process
/// actually hosts the tools. Implementations must serialize their own
/// request/response exchanges; the manager calls them from many tasks.
pub trait ToolProvider: Send + Sync {
    /// Perform the protocol handshake.
    fn handshake(&self) -> impl Future<Output = mcp::Result<()>> + Send;

    /// Discover the provider's tools, in the provider's order.
    fn list_tools(&self) -> impl Future<Output = mcp::Result<Vec<Tool>>> + Send;

    /// Call a tool by the provider's own name.
    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = mcp::Result<CallToolResult>> + Send;

    /// Release the provider's resources.
    fn shutdown(&self) -> impl Future<Output = mcp::Result<()>> + Send;
}

/// Starts providers from configuration.
pub trait Launcher: Send + Sync {
    type Provider: ToolProvider;

    fn launch(
        &self,
        config: &ProviderConfig,
    ) -> impl Future<Output = mcp::Result<Self::Provider>> + Send;
}
