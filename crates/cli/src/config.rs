//! Configuration loading from switchboard.toml.

use std::path::Path;
use std::time::Duration;

use runtime::{
    DEFAULT_BASE_URL, DEFAULT_DISPLAY_CAP, DEFAULT_MAX_ROUNDS, DEFAULT_SYSTEM_PROMPT,
    NameOverrides, OpenAiBackend, OrchestratorConfig, ProviderConfig,
};
use serde::Deserialize;

/// Environment variable consulted when `backend.api_key` is unset.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Tool providers, connected in listed order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Exposed-name overrides keyed by `providerId_realName`.
    #[serde(default)]
    pub overrides: NameOverrides,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Model backend configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Chat Completions endpoint root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    pub max_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: None,
        }
    }
}

/// Orchestration settings.
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub system_prompt: Option<String>,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Characters of each tool result shown to clients.
    #[serde(default = "default_display_cap")]
    pub display_cap: usize,

    pub tool_timeout_secs: Option<u64>,
    pub model_timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_rounds: default_max_rounds(),
            display_cap: default_display_cap(),
            tool_timeout_secs: None,
            model_timeout_secs: None,
        }
    }
}

impl AgentConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_rounds: self.max_rounds,
            display_cap: self.display_cap,
            tool_timeout: self.tool_timeout_secs.map(Duration::from_secs),
            model_timeout: self.model_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// WebSocket server settings.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_display_cap() -> usize {
    DEFAULT_DISPLAY_CAP
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration: no providers, stock backend.
    pub fn default_config() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_rounds == 0 {
            return Err(ConfigError::Invalid("agent.max_rounds must be at least 1".into()));
        }
        if let Some(provider) = self.providers.iter().find(|p| p.id.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "provider with command `{}` has an empty id",
                provider.command
            )));
        }
        Ok(())
    }

    /// Resolve the API key from config or the environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }

    fn resolve_api_key(&self, from_env: Option<String>) -> Result<String, ConfigError> {
        self.backend
            .api_key
            .clone()
            .or(from_env)
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Build the model backend.
    pub fn backend(&self) -> Result<OpenAiBackend, ConfigError> {
        let mut builder = OpenAiBackend::builder(&self.backend.model)
            .base_url(&self.backend.base_url)
            .api_key(self.api_key()?);
        if let Some(max_tokens) = self.backend.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        Ok(builder.build())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("API key not configured: set backend.api_key or OPENAI_API_KEY")]
    MissingApiKey,
}
