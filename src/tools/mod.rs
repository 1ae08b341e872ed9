//! MCP tool definitions and registry.

pub mod registry;
pub mod weather;

pub use registry::{ToolHandler, ToolRegistry};
pub use weather::GetWeatherTool;

use crate::error::Result;

/// Create the registry served by the bundled binary.
pub fn create_registry() -> Result<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.add_tool(GetWeatherTool::definition(), GetWeatherTool::new())?;
    Ok(registry)
}
