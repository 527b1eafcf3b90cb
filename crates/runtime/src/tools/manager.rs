//! Session manager: many tool providers behind one namespace.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::{
    CallError, CapabilityDescriptor, ConnectError, Launcher, NameOverrides, ProviderConfig,
    StdioLauncher, ToolProvider, exposed_name,
};

/// Where an exposed name routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    /// Index into the manager's sessions, in connection order.
    session: usize,
    pub provider_id: String,
    pub real_name: String,
}

/// Bidirectional mapping `exposed name <-> (provider id, real name)`.
#[derive(Debug, Default, Clone)]
pub struct NamespaceMapping {
    by_exposed: HashMap<String, ToolRoute>,
    by_real: HashMap<(String, String), String>,
}

impl NamespaceMapping {
    /// Route for an exposed name.
    pub fn resolve(&self, exposed: &str) -> Option<&ToolRoute> {
        self.by_exposed.get(exposed)
    }

    /// Exposed name for a provider's tool.
    pub fn exposed_name(&self, provider_id: &str, real_name: &str) -> Option<&str> {
        self.by_real
            .get(&(provider_id.to_string(), real_name.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_exposed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_exposed.is_empty()
    }

    fn insert(&mut self, exposed: String, route: ToolRoute) {
        self.by_real.insert(
            (route.provider_id.clone(), route.real_name.clone()),
            exposed.clone(),
        );
        self.by_exposed.insert(exposed, route);
    }
}

struct ProviderSession<P> {
    id: String,
    provider: P,
}

/// Owns every connected provider and the merged capability registry.
///
/// The registry and mapping are fixed once connecting finishes, so a manager
/// can be shared behind an `Arc` by any number of conversations.
pub struct SessionManager<P = mcp::Session> {
    sessions: Vec<ProviderSession<P>>,
    capabilities: Vec<CapabilityDescriptor>,
    mapping: NamespaceMapping,
}

impl<P> Default for SessionManager<P> {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            capabilities: Vec::new(),
            mapping: NamespaceMapping::default(),
        }
    }
}

impl SessionManager<mcp::Session> {
    /// Spawn every configured provider as a stdio child process.
    pub async fn connect_all(
        configs: &[ProviderConfig],
        overrides: &NameOverrides,
    ) -> Result<Self, ConnectError> {
        Self::connect_with(&StdioLauncher, configs, overrides).await
    }
}

impl<P: ToolProvider> SessionManager<P> {
    /// A manager with no providers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Connect providers in listed order: launch, handshake, discover.
    ///
    /// Fails fast: on the first error, providers already connected are torn
    /// down in reverse order and the error is returned.
    pub async fn connect_with<L>(
        launcher: &L,
        configs: &[ProviderConfig],
        overrides: &NameOverrides,
    ) -> Result<Self, ConnectError>
    where
        L: Launcher<Provider = P>,
    {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.id.as_str()) {
                return Err(ConnectError::DuplicateProvider(config.id.clone()));
            }
        }

        let mut manager = Self::empty();
        for config in configs {
            if let Err(e) = manager.attach(launcher, config, overrides).await {
                tracing::error!(provider = %config.id, error = %e, "provider connect failed");
                manager.disconnect_all().await;
                return Err(e);
            }
        }

        tracing::info!(
            providers = manager.sessions.len(),
            tools = manager.capabilities.len(),
            "all providers connected"
        );
        Ok(manager)
    }

    async fn attach<L>(
        &mut self,
        launcher: &L,
        config: &ProviderConfig,
        overrides: &NameOverrides,
    ) -> Result<(), ConnectError>
    where
        L: Launcher<Provider = P>,
    {
        let provider_id = config.id.clone();
        let provider = launcher
            .launch(config)
            .await
            .map_err(|source| ConnectError::Launch {
                provider: provider_id.clone(),
                source,
            })?;

        let staged = match self.discover(&provider, &provider_id, overrides).await {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(teardown) = provider.shutdown().await {
                    tracing::warn!(provider = %provider_id, error = %teardown, "teardown failed");
                }
                return Err(e);
            }
        };

        let session = self.sessions.len();
        for (descriptor, real_name) in staged {
            self.mapping.insert(
                descriptor.exposed_name.clone(),
                ToolRoute {
                    session,
                    provider_id: provider_id.clone(),
                    real_name,
                },
            );
            self.capabilities.push(descriptor);
        }

        tracing::info!(provider = %provider_id, "provider connected");
        self.sessions.push(ProviderSession {
            id: provider_id,
            provider,
        });
        Ok(())
    }

    /// Handshake, list tools, and resolve exposed names without touching the
    /// registry, so a failing provider leaves no partial entries behind.
    async fn discover(
        &self,
        provider: &P,
        provider_id: &str,
        overrides: &NameOverrides,
    ) -> Result<Vec<(CapabilityDescriptor, String)>, ConnectError> {
        provider
            .handshake()
            .await
            .map_err(|source| ConnectError::Handshake {
                provider: provider_id.to_string(),
                source,
            })?;

        let tools = provider
            .list_tools()
            .await
            .map_err(|source| ConnectError::Discovery {
                provider: provider_id.to_string(),
                source,
            })?;

        let mut staged: Vec<(CapabilityDescriptor, String)> = Vec::with_capacity(tools.len());
        for tool in tools {
            let exposed = exposed_name(provider_id, &tool.name, overrides);

            let clash = self
                .mapping
                .resolve(&exposed)
                .map(|route| (route.provider_id.clone(), route.real_name.clone()))
                .or_else(|| {
                    staged
                        .iter()
                        .find(|(d, _)| d.exposed_name == exposed)
                        .map(|(_, real)| (provider_id.to_string(), real.clone()))
                });
            if let Some((first_provider, first_tool)) = clash {
                return Err(ConnectError::NameCollision {
                    name: exposed,
                    first_provider,
                    first_tool,
                    second_provider: provider_id.to_string(),
                    second_tool: tool.name,
                });
            }

            tracing::debug!(provider = %provider_id, tool = %tool.name, exposed = %exposed, "registered tool");
            staged.push((
                CapabilityDescriptor {
                    exposed_name: exposed,
                    description: tool.description.unwrap_or_default(),
                    parameter_schema: tool.input_schema,
                },
                tool.name,
            ));
        }
        Ok(staged)
    }

    /// Merged registry: connection order, then each provider's discovery order.
    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    /// Descriptor for an exposed name.
    pub fn capability(&self, exposed_name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .find(|c| c.exposed_name == exposed_name)
    }

    pub fn mapping(&self) -> &NamespaceMapping {
        &self.mapping
    }

    /// Provider ids in connection order.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|s| s.id.as_str())
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Route a call by exposed name and return the provider's text.
    ///
    /// Content parts are joined with newlines; non-text parts are rendered as
    /// JSON. Nothing is retried.
    pub async fn call_tool(&self, exposed_name: &str, arguments: Value) -> Result<String, CallError> {
        let route = self
            .mapping
            .resolve(exposed_name)
            .ok_or_else(|| CallError::UnknownTool(exposed_name.to_string()))?;
        let session = &self.sessions[route.session];

        tracing::debug!(
            tool = %exposed_name,
            provider = %session.id,
            real_name = %route.real_name,
            "calling tool"
        );

        let result = session
            .provider
            .call_tool(&route.real_name, arguments)
            .await
            .map_err(|e| CallError::from_provider(exposed_name, e))?;

        Ok(result.joined_text())
    }

    /// Tear down every provider in reverse connection order.
    ///
    /// Best-effort: a failing teardown is logged and the rest still run.
    pub async fn disconnect_all(&self) {
        for session in self.sessions.iter().rev() {
            match session.provider.shutdown().await {
                Ok(()) => tracing::debug!(provider = %session.id, "provider disconnected"),
                Err(e) => {
                    tracing::warn!(provider = %session.id, error = %e, "provider teardown failed")
                }
            }
        }
    }
}

impl<P> std::fmt::Debug for SessionManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field(
                "providers",
                &self.sessions.iter().map(|s| &s.id).collect::<Vec<_>>(),
            )
            .field("tools", &self.capabilities.len())
            .finish()
    }
}
