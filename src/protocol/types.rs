//! JSON-RPC 2.0 and MCP protocol types.

use crate::error::{ProtocolError, ProtocolResult, codes};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_VERSION: &str = "2024-11-05";

/// Newer MCP protocol revision, selectable through configuration.
pub const MCP_VERSION_2025_03_26: &str = "2025-03-26";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";

/// String-keyed JSON object used for params and results.
pub type JsonObject = Map<String, Value>;

/// JSON-RPC request ID - a number or a string.
///
/// An absent (or `null`) id is modelled as `Option::None` on the envelope.
/// Numbers keep their JSON representation so `1.5` echoes back as `1.5`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    /// Interpret an arbitrary JSON value as a request id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Identity used for matching ids across messages.
    ///
    /// Integral floats collapse to integers so `1.0` and `1` name the same
    /// request. Responses still echo the id exactly as the peer sent it.
    pub fn canonical(&self) -> Self {
        if let Self::Number(n) = self
            && n.is_f64()
            && let Some(f) = n.as_f64()
            && f.fract() == 0.0
        {
            if (0.0..u64::MAX as f64).contains(&f) {
                return Self::Number((f as u64).into());
            }
            if (i64::MIN as f64..0.0).contains(&f) {
                return Self::Number((f as i64).into());
            }
        }
        self.clone()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// What a decoded envelope turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    Invalid,
}

/// Generic JSON-RPC 2.0 envelope, as decoded from one line of input.
///
/// Exactly which of the optional members are present decides the
/// [`MessageKind`]; see [`JsonRpcMessage::classify`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub jsonrpc: Cow<'static, str>,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<JsonObject>,
    #[serde(default)]
    pub result: Option<JsonObject>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JsonRpcMessage", 6)?;
        state.serialize_field("jsonrpc", &self.jsonrpc)?;

        match (&self.id, &self.method) {
            (Some(id), _) => state.serialize_field("id", id)?,
            // A response must carry an id member; null when the request id is unknown.
            (None, None) => state.serialize_field("id", &Value::Null)?,
            (None, Some(_)) => state.skip_field("id")?,
        }

        match &self.method {
            Some(method) => state.serialize_field("method", method)?,
            None => state.skip_field("method")?,
        }
        match &self.params {
            Some(params) => state.serialize_field("params", params)?,
            None => state.skip_field("params")?,
        }
        match &self.result {
            Some(result) => state.serialize_field("result", result)?,
            None => state.skip_field("result")?,
        }
        match &self.error {
            Some(error) => state.serialize_field("error", error)?,
            None => state.skip_field("error")?,
        }

        state.end()
    }
}

impl Default for JsonRpcMessage {
    fn default() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

impl JsonRpcMessage {
    /// Build a success response.
    pub fn success(id: RequestId, result: JsonObject) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Build an error response. `id` is `None` when the request id is unknown.
    pub fn error_response(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            id,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Response to a `ping` request: an empty result object.
    pub fn ping_response(id: RequestId) -> Self {
        Self::success(id, JsonObject::new())
    }

    /// Whether the protocol tag is exactly `"2.0"`.
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Classify the envelope. Pure and total.
    pub fn classify(&self) -> MessageKind {
        if self.result.is_some() && self.error.is_some() {
            return MessageKind::Invalid;
        }

        match (&self.id, &self.method) {
            (Some(_), Some(_)) => MessageKind::Request,
            (None, Some(_)) => MessageKind::Notification,
            (Some(_), None) if self.result.is_some() || self.error.is_some() => {
                MessageKind::Response
            }
            _ => MessageKind::Invalid,
        }
    }

    pub fn is_request(&self) -> bool {
        self.classify() == MessageKind::Request
    }

    pub fn is_notification(&self) -> bool {
        self.classify() == MessageKind::Notification
    }

    pub fn is_response(&self) -> bool {
        self.classify() == MessageKind::Response
    }
}

/// JSON-RPC 2.0 Request: carries an id and expects exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonObject>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: JsonObject) -> Self {
        self.params = Some(params);
        self
    }

    pub fn ping(id: impl Into<RequestId>) -> Self {
        Self::new(id, METHOD_PING)
    }

    /// Ask the peer to report progress for this request under `token`.
    pub fn with_progress_token(mut self, token: impl Into<String>) -> Self {
        let params = self.params.get_or_insert_with(JsonObject::new);
        let meta = params
            .entry("_meta")
            .or_insert_with(|| Value::Object(JsonObject::new()));
        if !meta.is_object() {
            *meta = Value::Object(JsonObject::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert("progressToken".into(), Value::String(token.into()));
        }
        self
    }

    /// Look up a single parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }
}

impl TryFrom<JsonRpcMessage> for Request {
    type Error = ProtocolError;

    /// Only meaningful for envelopes classified as [`MessageKind::Request`].
    fn try_from(message: JsonRpcMessage) -> ProtocolResult<Self> {
        match (message.id, message.method) {
            (Some(id), Some(method)) => Ok(Self {
                jsonrpc: message.jsonrpc,
                id,
                method,
                params: message.params,
            }),
            _ => Err(ProtocolError::InvalidRequest(
                "envelope is not a request".into(),
            )),
        }
    }
}

impl From<Request> for JsonRpcMessage {
    fn from(request: Request) -> Self {
        Self {
            jsonrpc: request.jsonrpc,
            id: Some(request.id),
            method: Some(request.method),
            params: request.params,
            ..Self::default()
        }
    }
}

/// JSON-RPC 2.0 Notification: no id, no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonObject>,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: JsonObject) -> Self {
        self.params = Some(params);
        self
    }

    /// `notifications/cancelled` for an arbitrary request id.
    pub fn cancellation(request_id: RequestId, reason: impl Into<String>) -> Self {
        let mut params = JsonObject::new();
        params.insert("requestId".into(), request_id.to_value());
        params.insert("reason".into(), Value::String(reason.into()));
        Self::new(NOTIFICATION_CANCELLED).with_params(params)
    }

    /// `notifications/cancelled` targeting `request`.
    pub fn cancellation_of(request: &Request, reason: impl Into<String>) -> Self {
        let mut notification = Self::cancellation(request.id.clone(), reason);
        notification.jsonrpc = request.jsonrpc.clone();
        notification
    }

    /// `notifications/progress` for a progress token handed out by the peer.
    pub fn progress(
        token: impl Into<String>,
        progress: f64,
        total: f64,
        message: impl Into<String>,
    ) -> Self {
        let mut params = JsonObject::new();
        params.insert("progressToken".into(), Value::String(token.into()));
        params.insert("progress".into(), serde_json::json!(progress));
        params.insert("total".into(), serde_json::json!(total));
        params.insert("message".into(), Value::String(message.into()));
        Self::new(NOTIFICATION_PROGRESS).with_params(params)
    }
}

impl From<Notification> for JsonRpcMessage {
    fn from(notification: Notification) -> Self {
        Self {
            jsonrpc: notification.jsonrpc,
            method: Some(notification.method),
            params: notification.params,
            ..Self::default()
        }
    }
}

/// JSON-RPC 2.0 Error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    // Standard JSON-RPC 2.0 errors
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, msg)
    }
}

impl From<ProtocolError> for JsonRpcError {
    fn from(err: ProtocolError) -> Self {
        let message = match &err {
            ProtocolError::ParseError => "Parse error".to_string(),
            ProtocolError::InvalidRequest(msg)
            | ProtocolError::InvalidParams(msg)
            | ProtocolError::InternalError(msg) => msg.to_string(),
            ProtocolError::MethodNotFound(method) => format!("Method not found: {}", method),
        };
        Self::new(err.code(), message)
    }
}

/// Convert a serializable value into a JSON object for use as a result.
pub fn to_object<T: Serialize>(value: &T) -> ProtocolResult<JsonObject> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::InternalError(
            format!("result is not an object: {}", other).into(),
        )),
        Err(e) => Err(ProtocolError::InternalError(e.to_string().into())),
    }
}

/// MCP Server information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Flags attached to one advertised capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
}

impl CapabilityProperties {
    /// Only `true` flags are advertised.
    pub fn new(list_changed: bool, subscribe: bool) -> Self {
        Self {
            list_changed: list_changed.then_some(true),
            subscribe: subscribe.then_some(true),
        }
    }
}

/// Server capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<CapabilityProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<CapabilityProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<CapabilityProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<CapabilityProperties>,
}

/// Initialize response result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            annotations: None,
        }
    }

    pub fn with_annotations(mut self, annotations: Value) -> Self {
        self.annotations = Some(annotations);
        self
    }
}

/// Tool list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    pub fn json<T: Serialize>(data: &T) -> Self {
        match serde_json::to_string_pretty(data) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Tool content types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// Base64-encoded binary payload.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data_base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data_base64.into(),
            mime_type: mime_type.into(),
        }
    }
}
