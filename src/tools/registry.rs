//! Tool registry for dynamic tool registration.

use crate::error::ToolError;
use crate::protocol::{CallToolResult, JsonObject, RequestContext, Tool};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked for `tools/call`.
///
/// Implemented for any `Fn(RequestContext, JsonObject) -> impl Future<Output = CallToolResult>`,
/// so plain async closures can be registered directly.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: RequestContext, arguments: JsonObject) -> CallToolResult;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(RequestContext, JsonObject) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallToolResult> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext, arguments: JsonObject) -> CallToolResult {
        (self)(ctx, arguments).await
    }
}

#[derive(Default)]
struct Inner {
    // Registration order is the order tools/list reports.
    definitions: Vec<Tool>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

/// Named tools and their callbacks.
///
/// Tools may be added while the server is running; a `tools/list` issued
/// afterwards sees them.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name is rejected.
    pub fn add_tool<H>(&self, definition: Tool, handler: H) -> Result<(), ToolError>
    where
        H: ToolHandler + 'static,
    {
        let mut inner = self.inner.write();
        if inner.handlers.contains_key(&definition.name) {
            warn!(tool = %definition.name, "Tool already registered");
            return Err(ToolError::Duplicate(definition.name));
        }

        debug!(tool = %definition.name, "Registering tool");
        inner
            .handlers
            .insert(definition.name.clone(), Arc::new(handler));
        inner.definitions.push(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.inner.read().handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().handlers.contains_key(name)
    }

    /// Definitions of every registered tool, in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.inner.read().definitions.clone()
    }

    /// Invoke the named tool.
    ///
    /// An unknown name is reported as a tool-level error result rather than a
    /// protocol error, so the peer sees `isError: true`.
    pub async fn call(
        &self,
        ctx: RequestContext,
        name: &str,
        arguments: JsonObject,
    ) -> CallToolResult {
        let Some(handler) = self.get(name) else {
            warn!(tool = name, "Call to unknown tool");
            return CallToolResult::error(ToolError::NotFound(name.to_string()).to_string());
        };

        debug!(tool = name, id = %ctx.request_id, "Calling tool");
        handler.call(ctx, arguments).await
    }

    pub fn len(&self) -> usize {
        self.inner.read().definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().definitions.is_empty()
    }
}

/// Build a [`Tool`] definition with a JSON schema literal.
#[macro_export]
macro_rules! define_tool {
    (
        name: $name:expr,
        description: $desc:expr,
        schema: $schema:tt
    ) => {
        $crate::protocol::Tool::new($name, $desc, serde_json::json!($schema))
    };
}
