//! Demo weather tool served by the bundled binary.

use crate::error::ToolError;
use crate::protocol::{CallToolResult, JsonObject, RequestContext, Tool};
use crate::tools::registry::ToolHandler;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
pub struct GetWeatherArgs {
    pub location: String,
}

/// Reports a fixed temperature for any location.
pub struct GetWeatherTool {
    celsius: i32,
}

impl GetWeatherTool {
    pub const NAME: &'static str = "get_weather";

    pub fn new() -> Self {
        Self { celsius: 27 }
    }

    pub fn with_temperature(mut self, celsius: i32) -> Self {
        self.celsius = celsius;
        self
    }

    pub fn definition() -> Tool {
        crate::define_tool!(
            name: Self::NAME,
            description: "Get the current weather of a location",
            schema: {
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "City name or state name"
                    }
                },
                "required": ["location"]
            }
        )
    }
}

impl Default for GetWeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for GetWeatherTool {
    #[instrument(skip(self, ctx, arguments), fields(id = %ctx.request_id))]
    async fn call(&self, ctx: RequestContext, arguments: JsonObject) -> CallToolResult {
        let args: GetWeatherArgs = match serde_json::from_value(arguments.into()) {
            Ok(args) => args,
            Err(e) => {
                return CallToolResult::error(ToolError::InvalidArguments(e.to_string()).to_string());
            }
        };

        if ctx.is_cancelled() {
            return CallToolResult::error("request cancelled");
        }

        debug!(location = %args.location, "Looking up weather");
        CallToolResult::text(format!(
            "Current weather in {} is {} degree Celsius",
            args.location, self.celsius
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, ToolContent};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn context() -> RequestContext {
        RequestContext::new(&Request::new(1, "tools/call"), CancellationToken::new())
    }

    #[test]
    fn test_definition() {
        let tool = GetWeatherTool::definition();
        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.input_schema["required"], json!(["location"]));
    }

    #[tokio::test]
    async fn test_reports_location() {
        let args = json!({"location": "Jakarta"}).as_object().cloned().unwrap();
        let result = GetWeatherTool::new().call(context(), args).await;
        assert!(!result.is_error);
        assert_eq!(
            result.content,
            vec![ToolContent::text("Current weather in Jakarta is 27 degree Celsius")]
        );
    }

    #[tokio::test]
    async fn test_missing_location_is_tool_error() {
        let result = GetWeatherTool::new()
            .with_temperature(30)
            .call(context(), JsonObject::new())
            .await;
        assert!(result.is_error);
        match &result.content[0] {
            ToolContent::Text { text } => assert!(text.starts_with("invalid arguments: ")),
            other => panic!("unexpected content: {:?}", other),
        }
    }
}
