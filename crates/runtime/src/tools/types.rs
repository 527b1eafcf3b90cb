//! Tool-related types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Explicit exposed names, keyed by the composite `providerId_realName`.
pub type NameOverrides = HashMap<String, String>;

/// Normalized description of one invocable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Process-wide unique name used by the model.
    pub exposed_name: String,
    pub description: String,
    /// Parameter schema exactly as the provider declared it.
    pub parameter_schema: Value,
}

/// One configured tool provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderConfig {
    /// Namespace prefix for this provider's tools.
    pub id: String,
    /// Launch target.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout; the session default when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Exposed name for a provider tool: an override if one exists for the
/// composite `provider_realName`, otherwise the composite itself.
pub fn exposed_name(provider_id: &str, real_name: &str, overrides: &NameOverrides) -> String {
    let composite = format!("{provider_id}_{real_name}");
    match overrides.get(&composite) {
        Some(name) => name.clone(),
        None => composite,
    }
}
