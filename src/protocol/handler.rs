//! Method table and built-in request handlers.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::*;
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, instrument};

/// Request methods the server knows how to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Ping,
    ListTools,
    CallTool,
}

/// Routes requests to the built-in handlers.
///
/// `tools/list` and `tools/call` are only present in the method table when a
/// tool registry is attached; without one they resolve to method-not-found.
pub struct Dispatcher {
    server_info: ServerInfo,
    protocol_version: String,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    tools: Option<Arc<ToolRegistry>>,
    methods: HashMap<&'static str, Method>,
}

impl Dispatcher {
    pub fn new(
        server_info: ServerInfo,
        protocol_version: impl Into<String>,
        capabilities: ServerCapabilities,
        tools: Option<Arc<ToolRegistry>>,
    ) -> Self {
        let mut methods = HashMap::new();
        methods.insert(METHOD_INITIALIZE, Method::Initialize);
        methods.insert(METHOD_PING, Method::Ping);
        if tools.is_some() {
            methods.insert(METHOD_TOOLS_LIST, Method::ListTools);
            methods.insert(METHOD_TOOLS_CALL, Method::CallTool);
        }

        Self {
            server_info,
            protocol_version: protocol_version.into(),
            capabilities,
            instructions: None,
            tools,
            methods,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Look up a method name in the table.
    pub fn resolve(&self, method: &str) -> Option<Method> {
        self.methods.get(method).copied()
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Run the handler for `method` and build the response for `ctx.request_id`.
    #[instrument(skip(self, ctx, params), fields(id = %ctx.request_id))]
    pub async fn dispatch(
        &self,
        method: Method,
        ctx: RequestContext,
        params: Option<JsonObject>,
    ) -> JsonRpcMessage {
        debug!(method = %ctx.method, "Dispatching request");
        let id = ctx.request_id.clone();

        let result = match method {
            Method::Initialize => self.handle_initialize(params),
            Method::Ping => Ok(JsonObject::new()),
            Method::ListTools => self.handle_list_tools(),
            Method::CallTool => self.handle_call_tool(ctx, params).await,
        };

        match result {
            Ok(result) => JsonRpcMessage::success(id, result),
            Err(e) => {
                error!(error = %e, "Request failed");
                JsonRpcMessage::error_response(Some(id), e.into())
            }
        }
    }

    fn handle_initialize(&self, params: Option<JsonObject>) -> ProtocolResult<JsonObject> {
        if let Some(client) = params.as_ref().and_then(|p| p.get("clientInfo")) {
            let name = client.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let version = client.get("version").and_then(Value::as_str).unwrap_or("unknown");
            info!(client = name, version, "Client connected");
        }
        if let Some(requested) = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
        {
            debug!(requested, offered = %self.protocol_version, "Protocol version negotiation");
        }

        to_object(&InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    fn handle_list_tools(&self) -> ProtocolResult<JsonObject> {
        let tools = self.registry(METHOD_TOOLS_LIST)?.list();
        debug!(count = tools.len(), "Listing tools");
        to_object(&ListToolsResult { tools })
    }

    async fn handle_call_tool(
        &self,
        ctx: RequestContext,
        params: Option<JsonObject>,
    ) -> ProtocolResult<JsonObject> {
        let registry = self.registry(METHOD_TOOLS_CALL)?;
        let params = params.unwrap_or_default();

        let name = match params.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(ProtocolError::InvalidParams("Invalid tool name".into())),
        };

        let arguments = match params.get("arguments") {
            Some(Value::Object(arguments)) => arguments.clone(),
            _ => return Err(ProtocolError::InvalidParams("Invalid tool arguments".into())),
        };

        let result = registry.call(ctx, &name, arguments).await;
        to_object(&result)
    }

    fn registry(&self, method: &str) -> ProtocolResult<&ToolRegistry> {
        self.tools
            .as_deref()
            .ok_or_else(|| ProtocolError::MethodNotFound(method.to_string()))
    }
}

/// Per-request context handed to tool callbacks.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: String,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(request: &Request, cancellation: CancellationToken) -> Self {
        Self {
            request_id: request.id.clone(),
            method: request.method.clone(),
            cancellation,
        }
    }

    /// Whether the peer, a timeout or shutdown has asked this request to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the request is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
