//! MCP server with lifecycle management.
//!
//! The dispatch loop pulls one message at a time from the transport. Requests
//! for known methods are registered in the live set and handed to their own
//! task, so a slow tool never holds up the loop. Each handler task races its
//! handler against the outgoing-message timeout; on expiry the request's
//! token is cancelled and whatever the handler eventually returns is still
//! sent.

use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::protocol::handler::{Dispatcher, RequestContext};
use crate::protocol::transport::{StdioTransport, Transport};
use crate::protocol::types::*;
use crate::server::LiveRequests;
use crate::tools::ToolRegistry;
use parking_lot::RwLock;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built but not yet running.
    Idle,
    /// Dispatch loop is pulling messages.
    Running,
    /// Loop has stopped; in-flight handlers get a grace period.
    Draining,
    /// Stopped. Terminal.
    Closed,
}

/// MCP Server.
pub struct McpServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    live: Arc<LiveRequests>,
    state: RwLock<ServerState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        self.dispatcher.capabilities()
    }

    /// Number of requests whose handlers are still running.
    pub fn active_requests(&self) -> usize {
        self.live.len()
    }

    pub fn is_request_active(&self, id: &RequestId) -> bool {
        self.live.contains(id)
    }

    /// Cancel one in-flight request. Returns `false` if it was not live.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        self.live.cancel(id)
    }

    /// Cancel every in-flight request. Returns how many were cancelled.
    pub fn cancel_all_requests(&self) -> usize {
        self.live.cancel_all()
    }

    /// Ask the dispatch loop to stop. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ServerState::Idle {
                *state = ServerState::Closed;
            }
        }
        if !self.shutdown.is_cancelled() {
            info!("Server close requested");
        }
        self.shutdown.cancel();
    }

    /// Serve over stdin/stdout until end of input, close or cancellation.
    pub async fn serve_stdio(&self, cancel: CancellationToken) -> Result<()> {
        let transport = Arc::new(StdioTransport::stdio(&self.config));
        self.serve(transport, cancel).await
    }

    /// Drive `transport` and the dispatch loop together.
    ///
    /// Returns once both have stopped. A transport read failure is returned
    /// after the loop has drained.
    #[instrument(skip_all, fields(server = %self.config.name))]
    pub async fn serve<R, W>(
        &self,
        transport: Arc<StdioTransport<R, W>>,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let messages: Arc<dyn Transport> = transport.clone();

        let (transport_result, run_result) = tokio::join!(transport.start(cancel.clone()), async {
            let result = self.run(messages, cancel.clone()).await;
            if let Err(e) = transport.close() {
                warn!(error = %e, "Failed to close transport");
            }
            result
        });

        if let Err(e) = transport_result {
            error!(error = %e, "Transport terminated with error");
            run_result?;
            return Err(e.into());
        }
        run_result
    }

    /// Run the dispatch loop until the transport runs dry, [`close`](Self::close)
    /// is called or `cancel` fires. All three are a normal exit.
    pub async fn run(&self, transport: Arc<dyn Transport>, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ServerState::Idle => *state = ServerState::Running,
                other => {
                    return Err(McpError::Internal {
                        message: format!("server cannot run from state {:?}", other).into(),
                    });
                }
            }
        }

        info!(
            "Starting MCP server: {} v{}",
            self.config.name, self.config.version
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Server stopping on close");
                    break;
                }
                _ = cancel.cancelled() => {
                    info!("Server stopping on cancellation");
                    break;
                }
                message = transport.recv() => match message {
                    Some(message) => self.handle_message(&transport, message).await,
                    None => {
                        debug!("Inbound stream ended, shutting down");
                        break;
                    }
                },
            }
        }

        self.drain().await;
        info!("Server stopped");
        Ok(())
    }

    async fn drain(&self) {
        *self.state.write() = ServerState::Draining;

        let cancelled = self.live.cancel_all();
        self.shutdown.cancel();
        self.tasks.close();

        if cancelled > 0 {
            info!(cancelled, "Waiting for in-flight requests");
        }
        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tasks.len(),
                "Shutdown grace period elapsed with handlers still running"
            );
        }

        *self.state.write() = ServerState::Closed;
    }

    async fn handle_message(&self, transport: &Arc<dyn Transport>, message: JsonRpcMessage) {
        if !message.has_valid_version() {
            warn!(version = %message.jsonrpc, "Received message with invalid JSON-RPC version");
            if let Some(id) = message.id {
                let error = JsonRpcError::invalid_request("Invalid JSON-RPC protocol version");
                self.send(transport, JsonRpcMessage::error_response(Some(id), error))
                    .await;
            }
            return;
        }

        match message.classify() {
            MessageKind::Request => match Request::try_from(message) {
                Ok(request) => self.handle_request(transport, request).await,
                Err(e) => error!(error = %e, "Failed to unpack request"),
            },
            MessageKind::Notification => self.handle_notification(message),
            MessageKind::Response => {
                debug!(id = ?message.id, "Ignoring response; no outbound requests are pending");
            }
            MessageKind::Invalid => {
                warn!(id = ?message.id, "Received invalid message");
                if let Some(id) = message.id {
                    let error = JsonRpcError::invalid_request("Invalid message type");
                    self.send(transport, JsonRpcMessage::error_response(Some(id), error))
                        .await;
                }
            }
        }
    }

    async fn handle_request(&self, transport: &Arc<dyn Transport>, request: Request) {
        let Some(method) = self.dispatcher.resolve(&request.method) else {
            warn!(method = %request.method, id = %request.id, "Unknown method");
            let error = JsonRpcError::method_not_found(&request.method);
            self.send(transport, JsonRpcMessage::error_response(Some(request.id), error))
                .await;
            return;
        };

        let token = self.shutdown.child_token();
        let guard = self.live.register(request.id.clone(), token.clone());

        let active = self.live.len();
        if active > self.config.max_active_requests {
            warn!(
                active,
                limit = self.config.max_active_requests,
                "Active request count above configured limit"
            );
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let transport = Arc::clone(transport);
        let timeout = self.config.outgoing_message_timeout;
        let span = info_span!("request", id = %request.id, method = %request.method);

        self.tasks.spawn(
            async move {
                let ctx = RequestContext::new(&request, token.clone());
                let id = request.id;
                let params = request.params;
                // A panicking handler surfaces as a JoinError instead of unwinding this task.
                let mut work = tokio::spawn(
                    async move { dispatcher.dispatch(method, ctx, params).await }.in_current_span(),
                );

                let joined = tokio::select! {
                    joined = &mut work => joined,
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout = ?timeout, "Request timed out, signalling cancellation");
                        token.cancel();
                        (&mut work).await
                    }
                };

                let response = match joined {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Request handler failed");
                        JsonRpcMessage::error_response(
                            Some(id),
                            JsonRpcError::internal_error("Internal error"),
                        )
                    }
                };

                // Leave the live set before the response goes out.
                drop(guard);

                if let Err(e) = transport.write(response, timeout).await {
                    error!(error = %e, "Failed to send response");
                }
            }
            .instrument(span),
        );
    }

    fn handle_notification(&self, message: JsonRpcMessage) {
        let live = Arc::clone(&self.live);
        self.tasks.spawn(async move {
            let method = message.method.as_deref().unwrap_or_default();
            match method {
                NOTIFICATION_CANCELLED => handle_cancelled(&live, message.params.as_ref()),
                NOTIFICATION_INITIALIZED => info!("Client initialized"),
                other => debug!(method = other, "Ignoring notification"),
            }
        });
    }

    async fn send(&self, transport: &Arc<dyn Transport>, message: JsonRpcMessage) {
        if let Err(e) = transport
            .write(message, self.config.outgoing_message_timeout)
            .await
        {
            error!(error = %e, "Failed to send response");
        }
    }
}

fn handle_cancelled(live: &LiveRequests, params: Option<&JsonObject>) {
    let Some(id) = params
        .and_then(|p| p.get("requestId"))
        .and_then(RequestId::from_value)
    else {
        warn!("Cancellation notification without a usable requestId");
        return;
    };

    let reason = params
        .and_then(|p| p.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("unspecified");

    if live.cancel(&id) {
        info!(id = %id, reason, "Request cancelled by peer");
    } else {
        warn!(id = %id, "Cancellation for unknown or finished request");
    }
}

/// Builder for MCP Server.
pub struct McpServerBuilder {
    config: ServerConfig,
    capabilities: ServerCapabilities,
    tools: Option<Arc<ToolRegistry>>,
    instructions: Option<String>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            capabilities: ServerCapabilities::default(),
            tools: None,
            instructions: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Cow::Owned(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = Cow::Owned(version.into());
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    pub fn with_tools(mut self, list_changed: bool, subscribe: bool) -> Self {
        self.capabilities.tools = Some(CapabilityProperties::new(list_changed, subscribe));
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.capabilities.logging = Some(CapabilityProperties::default());
        self
    }

    pub fn with_prompts(mut self, list_changed: bool, subscribe: bool) -> Self {
        self.capabilities.prompts = Some(CapabilityProperties::new(list_changed, subscribe));
        self
    }

    pub fn with_resources(mut self, list_changed: bool, subscribe: bool) -> Self {
        self.capabilities.resources = Some(CapabilityProperties::new(list_changed, subscribe));
        self
    }

    /// Attach a tool registry, enabling `tools/list` and `tools/call`.
    pub fn tool_registry(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn build(mut self) -> Result<McpServer> {
        self.config.validate()?;

        if self.tools.is_some() && self.capabilities.tools.is_none() {
            self.capabilities.tools = Some(CapabilityProperties::default());
        }

        let server_info = ServerInfo {
            name: self.config.name.to_string(),
            version: self.config.version.to_string(),
        };
        let mut dispatcher = Dispatcher::new(
            server_info,
            self.config.protocol_version.clone(),
            self.capabilities,
            self.tools,
        );
        if let Some(instructions) = self.instructions {
            dispatcher = dispatcher.with_instructions(instructions);
        }

        Ok(McpServer {
            config: self.config,
            dispatcher: Arc::new(dispatcher),
            live: Arc::new(LiveRequests::new()),
            state: RwLock::new(ServerState::Idle),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
