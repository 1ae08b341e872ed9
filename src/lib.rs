//! JSON-RPC 2.0 / MCP server runtime over line-delimited byte streams.
//!
//! Reads one JSON message per line, dispatches requests to concurrent
//! handlers, routes cancellation notifications to in-flight requests and
//! writes responses back through a bounded outbound queue.
//!
//! # Example
//!
//! ```no_run
//! use mcp_runtime::{
//!     config::ServerConfig,
//!     protocol::{CallToolResult, JsonObject, McpServerBuilder, RequestContext, Tool},
//!     tools::ToolRegistry,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ToolRegistry::new();
//!     registry.add_tool(
//!         Tool::new("echo", "Echo the arguments", serde_json::json!({"type": "object"})),
//!         |_ctx: RequestContext, args: JsonObject| async move { CallToolResult::json(&args) },
//!     )?;
//!
//!     let server = McpServerBuilder::new()
//!         .config(ServerConfig::default())
//!         .with_tools(false, false)
//!         .tool_registry(Arc::new(registry))
//!         .build()?;
//!
//!     server.serve_stdio(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod tools;

pub use config::{LogLevel, ServerConfig, ServerConfigBuilder};
pub use error::{McpError, Result};
pub use protocol::{McpServer, McpServerBuilder, StdioTransport, Transport};
pub use server::LiveRequests;
pub use tools::{ToolHandler, ToolRegistry};
