//! Per-connection server configuration.
//!
//! The host application supplies a closure that fills in a [`ServerBuilder`].
//! The closure runs once for every new connection, so tools and identity can
//! depend on the connecting client's session.

use super::context::ToolCallContext;
use super::session::SessionAccess;
use super::tools::{ToolBuilder, ToolError, ToolRegistry};
use mcp_bridge_types::{
    Icon, Implementation, PromptsCapability, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Configuration closure evaluated once per connection.
pub type Configure = Arc<dyn Fn(&mut ServerBuilder) + Send + Sync>;

/// Error type for invalid server configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServerConfigError {
    #[error("tool '{0}' is registered more than once")]
    DuplicateTool(String),

    #[error("tool '{0}' has no handler")]
    MissingHandler(String),
}

/// Explicit user choice for a capability.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CapabilitySetting<T> {
    /// Not configured; the server may pick a default
    #[default]
    Unset,
    Enabled(T),
    Disabled,
}

/// Collects server identity, capabilities and tools for one connection.
pub struct ServerBuilder {
    session_id: String,
    session: SessionAccess,
    info: Implementation,
    instructions: Option<String>,
    tools_capability: CapabilitySetting<ToolsCapability>,
    prompts: Option<PromptsCapability>,
    resources: Option<ResourcesCapability>,
    logging: bool,
    tools: Vec<ToolBuilder>,
}

impl ServerBuilder {
    pub fn new(session_id: impl Into<String>, session: SessionAccess) -> Self {
        Self {
            session_id: session_id.into(),
            session,
            info: Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            instructions: None,
            tools_capability: CapabilitySetting::Unset,
            prompts: None,
            resources: None,
            logging: false,
            tools: Vec::new(),
        }
    }

    /// Session ID of the connection being configured.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session data of the connecting client.
    pub fn session(&self) -> &SessionAccess {
        &self.session
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.info.name = name.into();
        self
    }

    pub fn version(&mut self, version: impl Into<String>) -> &mut Self {
        self.info.version = version.into();
        self
    }

    pub fn title(&mut self, title: impl Into<String>) -> &mut Self {
        self.info.title = Some(title.into());
        self
    }

    pub fn website_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.info.website_url = Some(url.into());
        self
    }

    pub fn icon(&mut self, icon: Icon) -> &mut Self {
        self.info.icons.push(icon);
        self
    }

    pub fn instructions(&mut self, instructions: impl Into<String>) -> &mut Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn enable_tools(&mut self, capability: ToolsCapability) -> &mut Self {
        self.tools_capability = CapabilitySetting::Enabled(capability);
        self
    }

    /// Do not advertise tools, even if some are registered.
    pub fn disable_tools(&mut self) -> &mut Self {
        self.tools_capability = CapabilitySetting::Disabled;
        self
    }

    pub fn enable_prompts(&mut self, capability: PromptsCapability) -> &mut Self {
        self.prompts = Some(capability);
        self
    }

    pub fn enable_resources(&mut self, capability: ResourcesCapability) -> &mut Self {
        self.resources = Some(capability);
        self
    }

    pub fn enable_logging(&mut self) -> &mut Self {
        self.logging = true;
        self
    }

    /// Register a tool with a name, description, input schema and handler.
    pub fn tool<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(ToolCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ToolError>> + Send + 'static,
    {
        self.add_tool(
            ToolBuilder::new(name)
                .description(description)
                .input_schema(input_schema)
                .handler(handler),
        )
    }

    /// Register a tool built with [`ToolBuilder`].
    pub fn add_tool(&mut self, tool: ToolBuilder) -> &mut Self {
        self.tools.push(tool);
        self
    }

    /// Validate the collected configuration.
    pub fn finish(self) -> Result<ServerSetup, ServerConfigError> {
        let mut registry = ToolRegistry::new();
        for builder in self.tools {
            let name = builder.name().to_string();
            let tool = builder
                .build()
                .ok_or_else(|| ServerConfigError::MissingHandler(name.clone()))?;
            registry
                .insert(tool)
                .map_err(|_| ServerConfigError::DuplicateTool(name))?;
        }

        let capabilities = ServerCapabilities {
            tools: resolve_tools_capability(self.tools_capability, !registry.is_empty()),
            prompts: self.prompts,
            resources: self.resources,
            logging: self.logging.then(Map::new),
            experimental: None,
        };

        Ok(ServerSetup {
            info: self.info,
            instructions: self.instructions,
            capabilities,
            tools: Arc::new(registry),
        })
    }
}

/// Advertise tools when some are registered, unless the user decided.
fn resolve_tools_capability(
    setting: CapabilitySetting<ToolsCapability>,
    has_tools: bool,
) -> Option<ToolsCapability> {
    match setting {
        CapabilitySetting::Enabled(capability) => Some(capability),
        CapabilitySetting::Disabled => None,
        CapabilitySetting::Unset if has_tools => Some(ToolsCapability::default()),
        CapabilitySetting::Unset => None,
    }
}

/// Immutable result of evaluating the configuration for one connection.
#[derive(Debug, Clone)]
pub struct ServerSetup {
    pub info: Implementation,
    pub instructions: Option<String>,
    pub capabilities: ServerCapabilities,
    pub tools: Arc<ToolRegistry>,
}
