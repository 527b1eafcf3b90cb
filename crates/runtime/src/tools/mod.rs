//! Tool providers and the session manager that routes calls to them.
//!
//! Every provider's tools are merged into one registry of
//! [`CapabilityDescriptor`]s under process-unique exposed names.

mod errors;
mod manager;
mod mcp_host;
mod provider;
mod types;

pub use errors::{CallError, ConnectError};
pub use manager::{NamespaceMapping, SessionManager, ToolRoute};
pub use mcp_host::StdioLauncher;
pub use provider::{Launcher, ToolProvider};
pub use types::{CapabilityDescriptor, NameOverrides, ProviderConfig, exposed_name};
