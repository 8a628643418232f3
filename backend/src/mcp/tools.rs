//! Tool registration and dispatch.

use super::context::{ArgumentError, ContextError, ToolCallContext};
use super::session::{SessionAccess, SessionError};
use async_trait::async_trait;
use futures::FutureExt;
use mcp_bridge_types::tool::empty_object_schema;
use mcp_bridge_types::{CallToolParams, CallToolResult, Icon, Tool, ToolAnnotations};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Text returned when a handler finishes without setting a result.
pub const NO_RESPONSE_TEXT: &str = "No response";

/// Error type for tool handlers.
///
/// Every variant except [`ToolError::Cancelled`] is reported to the client
/// as an error result. Cancellation terminates the connection.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool call cancelled")]
    Cancelled,

    #[error(transparent)]
    Arguments(#[from] ArgumentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// User logic behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ToolCallContext) -> Result<(), ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolCallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ToolError>> + Send + 'static,
{
    async fn call(&self, ctx: ToolCallContext) -> Result<(), ToolError> {
        (self)(ctx).await
    }
}

/// A tool descriptor bound to its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Builder for a tool with the full set of descriptor fields.
pub struct ToolBuilder {
    tool: Tool,
    handler: Option<Arc<dyn ToolHandler>>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tool: Tool {
                name: name.into(),
                title: None,
                description: None,
                input_schema: empty_object_schema(),
                output_schema: None,
                annotations: None,
                icons: Vec::new(),
                meta: None,
            },
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.tool.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.tool.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.tool.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.tool.output_schema = Some(schema);
        self
    }

    pub fn icon(mut self, icon: Icon) -> Self {
        self.tool.icons.push(icon);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tool
            .meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.tool.annotations = Some(annotations);
        self
    }

    pub fn read_only(mut self, hint: bool) -> Self {
        self.annotations_mut().read_only_hint = Some(hint);
        self
    }

    pub fn destructive(mut self, hint: bool) -> Self {
        self.annotations_mut().destructive_hint = Some(hint);
        self
    }

    pub fn idempotent(mut self, hint: bool) -> Self {
        self.annotations_mut().idempotent_hint = Some(hint);
        self
    }

    pub fn open_world(mut self, hint: bool) -> Self {
        self.annotations_mut().open_world_hint = Some(hint);
        self
    }

    /// Set the handler from an async closure.
    pub fn handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(ToolCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ToolError>> + Send + 'static,
    {
        self.handler_impl(handler)
    }

    /// Set the handler from any [`ToolHandler`] implementation.
    pub fn handler_impl(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    fn annotations_mut(&mut self) -> &mut ToolAnnotations {
        self.tool.annotations.get_or_insert_with(Default::default)
    }

    /// Finish the tool. Returns `None` if no handler was set.
    pub fn build(self) -> Option<RegisteredTool> {
        let handler = self.handler?;
        Some(RegisteredTool {
            descriptor: self.tool,
            handler,
        })
    }
}

/// Ordered, name-indexed set of tools for one connection.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Returns the tool back if the name is already taken.
    pub fn insert(&mut self, tool: RegisteredTool) -> Result<(), RegisteredTool> {
        if self.index.contains_key(&tool.descriptor.name) {
            return Err(tool);
        }
        self.index
            .insert(tool.descriptor.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).and_then(|&i| self.tools.get(i))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Returned when a handler cancels its call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("tool call '{tool}' was cancelled")]
pub struct CallCancelled {
    pub tool: String,
}

/// Run one tool call to completion.
///
/// Lookup misses, handler errors and handler panics all become error
/// results. Only a cancellation from the handler is returned as `Err`.
pub async fn call_tool(
    tools: &ToolRegistry,
    session: &SessionAccess,
    params: CallToolParams,
) -> Result<CallToolResult, CallCancelled> {
    let Some(tool) = tools.get(&params.name) else {
        warn!("MCP: Unknown tool: {}", params.name);
        return Ok(CallToolResult::error(format!(
            "unknown tool: {}",
            params.name
        )));
    };

    debug!("MCP: Calling tool {}", params.name);
    let ctx = ToolCallContext::new(
        &params.name,
        params.arguments.unwrap_or_default(),
        session.clone(),
    );

    let outcome = AssertUnwindSafe(tool.handler.call(ctx.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(ctx
            .take_result()
            .unwrap_or_else(|| CallToolResult::text(NO_RESPONSE_TEXT))),
        Ok(Err(ToolError::Cancelled)) => Err(CallCancelled { tool: params.name }),
        Ok(Err(e)) => {
            warn!("MCP: Tool {} failed: {}", params.name, e);
            Ok(CallToolResult::error(e.to_string()))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("MCP: Tool {} panicked: {}", params.name, message);
            Ok(CallToolResult::error(format!(
                "tool '{}' panicked: {}",
                params.name, message
            )))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
