//! Configuration types and builders.

pub mod duration_format;

use crate::error::{ConfigError, McpError, Result};
use crate::protocol::types::MCP_VERSION;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum severity written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    #[serde(alias = "fatal")]
    Error,
}

impl LogLevel {
    /// Parse a log level from a string.
    ///
    /// Accepts common aliases; `fatal` maps to `error`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "fatal" => Some(Self::Error),
            _ => None,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl TryFrom<&str> for LogLevel {
    type Error = ConfigError;

    fn try_from(s: &str) -> std::result::Result<Self, ConfigError> {
        Self::parse(s).ok_or_else(|| ConfigError::InvalidValue {
            field: "log_level".into(),
            message: format!("Unknown log level: '{}'. Valid levels: debug, info, warn, error", s)
                .into(),
        })
    }
}

/// Server configuration.
///
/// Loaded once at startup and handed to the server by reference. Every field
/// has a default, so a config file only needs the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub protocol_version: String,
    pub log_level: LogLevel,
    pub show_timestamps: bool,
    pub log_json: bool,
    /// Advisory: exceeding it is logged, never rejected.
    #[serde(alias = "maxRequestActive")]
    pub max_active_requests: usize,
    pub log_file: Option<PathBuf>,
    #[serde(with = "duration_format", alias = "outgoingMessageTimeoutSeconds")]
    pub outgoing_message_timeout: Duration,
    #[serde(with = "duration_format")]
    pub shutdown_timeout: Duration,
    pub inbound_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: MCP_VERSION.into(),
            log_level: LogLevel::default(),
            show_timestamps: true,
            log_json: false,
            max_active_requests: 10,
            log_file: None,
            outgoing_message_timeout: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(5),
            inbound_queue_capacity: 10,
            outbound_queue_capacity: 10,
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from a JSON file.
    ///
    /// An empty path yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from environment variables.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(level) = env::var("MCP_LOG_LEVEL") {
            self.log_level = LogLevel::try_from(level.as_str())?;
        }

        if let Ok(file) = env::var("MCP_LOG_FILE") {
            self.log_file = if file.is_empty() {
                None
            } else {
                Some(PathBuf::from(file))
            };
        }

        if let Ok(show) = env::var("MCP_SHOW_TIMESTAMPS") {
            self.show_timestamps = parse_bool(&show).ok_or_else(|| {
                McpError::Config(ConfigError::InvalidValue {
                    field: "MCP_SHOW_TIMESTAMPS".into(),
                    message: format!("Expected true or false, got '{}'", show).into(),
                })
            })?;
        }

        if let Ok(max) = env::var("MCP_MAX_ACTIVE_REQUESTS") {
            self.max_active_requests = max.parse().map_err(|_| {
                McpError::Config(ConfigError::InvalidValue {
                    field: "MCP_MAX_ACTIVE_REQUESTS".into(),
                    message: "Invalid request count".into(),
                })
            })?;
        }

        if let Ok(timeout) = env::var("MCP_OUTGOING_TIMEOUT") {
            self.outgoing_message_timeout = env_duration("MCP_OUTGOING_TIMEOUT", &timeout)?;
        }

        if let Ok(timeout) = env::var("MCP_SHUTDOWN_TIMEOUT") {
            self.shutdown_timeout = env_duration("MCP_SHUTDOWN_TIMEOUT", &timeout)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("name", "Server name must not be empty"));
        }
        if self.outgoing_message_timeout.is_zero() {
            return Err(invalid(
                "outgoing_message_timeout",
                "Timeout must be greater than 0",
            ));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(invalid(
                "inbound_queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(invalid(
                "outbound_queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(invalid(
                "max_message_bytes",
                "Message size limit must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &'static str) -> McpError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
    .into()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_duration(var: &'static str, value: &str) -> Result<Duration> {
    duration_format::parse_duration(value).map_err(|message| {
        ConfigError::InvalidValue {
            field: var.into(),
            message: message.into(),
        }
        .into()
    })
}

/// Builder for ServerConfig.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn show_timestamps(mut self, show: bool) -> Self {
        self.config.show_timestamps = show;
        self
    }

    pub fn log_json(mut self, json: bool) -> Self {
        self.config.log_json = json;
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    pub fn max_active_requests(mut self, max: usize) -> Self {
        self.config.max_active_requests = max;
        self
    }

    pub fn outgoing_message_timeout(mut self, timeout: Duration) -> Self {
        self.config.outgoing_message_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_queue_capacity = capacity;
        self
    }

    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.config.max_message_bytes = max;
        self
    }

    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("fatal"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::try_from("loud").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.protocol_version, MCP_VERSION);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.show_timestamps);
        assert_eq!(config.max_active_requests, 10);
        assert_eq!(config.outgoing_message_timeout, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "logLevel": "debug",
            "showTimestamps": false,
            "outgoingMessageTimeoutSeconds": 3,
            "logFile": "/tmp/mcp.log"
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.show_timestamps);
        assert_eq!(config.outgoing_message_timeout, Duration::from_secs(3));
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/mcp.log")));
        assert_eq!(config.inbound_queue_capacity, 10);
    }

    #[test]
    fn test_max_request_active_key() {
        let config: ServerConfig = serde_json::from_str(r#"{"maxRequestActive": 3}"#).unwrap();
        assert_eq!(config.max_active_requests, 3);

        let config: ServerConfig = serde_json::from_str(r#"{"maxActiveRequests": 7}"#).unwrap();
        assert_eq!(config.max_active_requests, 7);
    }

    #[test]
    fn test_load_empty_path_is_default() {
        let config = ServerConfig::load("").unwrap();
        assert_eq!(config.name, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServerConfig::load("/nonexistent/mcp-runtime.json").unwrap_err();
        assert!(matches!(err, McpError::Config(ConfigError::Read { .. })));
    }

    #[test]
    fn test_builder_validates() {
        let config = ServerConfig::builder()
            .name("weather")
            .version("1.0.0")
            .outgoing_message_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.name, "weather");
        assert_eq!(config.outgoing_message_timeout, Duration::from_secs(2));

        let result = ServerConfig::builder().outbound_queue_capacity(0).build();
        assert!(result.is_err());
    }
}
