//! JSON-RPC 2.0 message types and framing.
//!
//! Every message exchanged with a client is a single JSON object. Requests
//! carry an `id` and expect a response; notifications carry no `id` and
//! expect nothing. Responses correlate to requests by `id` and may be
//! emitted out of arrival order.
//!
//! # Reserved error codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | −32700 | Parse error (malformed JSON) |
//! | −32600 | Invalid request (not JSON-RPC) |
//! | −32601 | Method not found / tool not registered |
//! | −32602 | Invalid params |
//! | −32603 | Internal error (handler failure, timeout) |
//! | −32002 | Server not initialised |
//! | −32000 | Application error (rate limited, circuit open, auth) |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Server name advertised during initialisation.
pub const SERVER_NAME: &str = "mcp-gateway";

/// Protocol version this server speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: 2024,
    minor: 11,
    patch: 5,
};

/// An ordered protocol version triple.
///
/// A session's negotiated version is immutable after `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Year component.
    pub major: u32,
    /// Month component.
    pub minor: u32,
    /// Revision component.
    pub patch: u32,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// JSON-RPC request identifier.
///
/// The spec allows numbers and strings. `null` ids are reserved for
/// parse-error responses where the original id is unknowable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// Error codes used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed JSON was received.
    ParseError,
    /// The message was valid JSON but not a valid JSON-RPC request.
    InvalidRequest,
    /// The method does not exist / tool is not registered.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal server error (handler failure or timeout).
    InternalError,
    /// A non-`initialize` request arrived before `initialize`.
    NotInitialized,
    /// Application-level rejection: rate limit, circuit breaker, auth.
    ApplicationError,
}

impl ErrorCode {
    /// Returns the wire integer for this code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::NotInitialized => -32002,
            Self::ApplicationError => -32000,
        }
    }
}

/// A JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A JSON-RPC notification (no `id`, no response).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A parsed inbound message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification expecting nothing.
    Notification(JsonRpcNotification),
}

/// A successful JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlating request identifier.
    pub id: RequestId,
    /// The result payload.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a successful response for the given request id.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result,
        }
    }
}

/// The `error` member of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code.
    pub code: i64,
    /// Stable, machine-matchable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates error data with the default message for a code.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::NotInitialized => "Server not initialized",
            ErrorCode::ApplicationError => "Application error",
        };
        Self {
            code: code.code(),
            message: message.to_string(),
            data: None,
        }
    }

    /// Creates error data with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail to this error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC error response.
///
/// The `id` is `None` only when the request id could not be recovered
/// (parse errors), which serialises as `id: null`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Protocol marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlating request id, or `null` when unknowable.
    pub id: Option<RequestId>,
    /// Error payload.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates an error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            error,
        }
    }

    /// Parse error with a `null` id.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::new(ErrorCode::ParseError))
    }

    /// Invalid request, with the id when it could be recovered.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, message),
        )
    }

    /// Method-not-found for an unknown method or unregistered tool.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Invalid-params with a human-readable reason.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Internal error with an optional cause chain in `data`.
    #[must_use]
    pub fn internal(id: RequestId, message: impl Into<String>, data: Option<Value>) -> Self {
        let mut payload = JsonRpcErrorData::with_message(ErrorCode::InternalError, message);
        payload.data = data;
        Self::new(Some(id), payload)
    }

    /// Server-not-initialised rejection.
    #[must_use]
    pub fn not_initialized(id: RequestId) -> Self {
        Self::new(Some(id), JsonRpcErrorData::new(ErrorCode::NotInitialized))
    }

    /// Application-level rejection (−32000) with a discriminating message.
    #[must_use]
    pub fn application(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::ApplicationError, message),
        )
    }
}

/// A serialisable outbound message: success or error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    /// Successful response.
    Response(JsonRpcResponse),
    /// Error response.
    Error(JsonRpcError),
}

impl OutgoingMessage {
    /// Returns the error code when this is an error response.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Response(_) => None,
            Self::Error(e) => Some(e.error.code),
        }
    }
}

impl From<JsonRpcResponse> for OutgoingMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcError> for OutgoingMessage {
    fn from(err: JsonRpcError) -> Self {
        Self::Error(err)
    }
}

impl From<Result<JsonRpcResponse, JsonRpcError>> for OutgoingMessage {
    fn from(result: Result<JsonRpcResponse, JsonRpcError>) -> Self {
        match result {
            Ok(resp) => Self::Response(resp),
            Err(err) => Self::Error(err),
        }
    }
}

/// Parses a single framed message.
///
/// # Errors
///
/// Returns a ready-to-send [`JsonRpcError`]: −32700 for malformed JSON,
/// −32600 for valid JSON that is not a JSON-RPC 2.0 message.
pub fn parse_message(input: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(input).map_err(|_| JsonRpcError::parse_error())?;

    let Some(obj) = value.as_object() else {
        return Err(JsonRpcError::invalid_request(
            None,
            "Message must be a JSON object",
        ));
    };

    // The id is recovered first so later failures can still correlate.
    let id: Option<RequestId> = obj
        .get("id")
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcError::invalid_request(
            id,
            "Missing or invalid jsonrpc version",
        ));
    }

    if obj.get("method").and_then(Value::as_str).is_none() {
        return Err(JsonRpcError::invalid_request(id, "Missing method"));
    }

    if obj.contains_key("id") && !obj["id"].is_null() {
        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|e| JsonRpcError::invalid_request(id, format!("Invalid request: {e}")))?;
        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification = serde_json::from_value(value)
            .map_err(|e| JsonRpcError::invalid_request(None, format!("Invalid notification: {e}")))?;
        Ok(IncomingMessage::Notification(notification))
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    pub protocol_version: ProtocolVersion,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
    /// Client capabilities, stored on the session as received.
    #[serde(default)]
    pub capabilities: Value,
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Tool-related server capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the tool list can change during the session.
    pub list_changed: bool,
}

/// Resource-related server capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether the resource list can change during the session.
    pub list_changed: bool,
    /// Whether resource subscriptions are supported.
    pub subscribe: bool,
}

/// Prompt-related server capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    /// Whether the prompt list can change during the session.
    pub list_changed: bool,
}

/// Logging capability.
#[derive(Debug, Clone, Serialize)]
pub struct LoggingCapability {
    /// Minimum level the server emits to the client.
    pub level: String,
}

impl Default for LoggingCapability {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Capabilities advertised by this server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool capabilities.
    pub tools: ToolsCapability,
    /// Resource capabilities.
    pub resources: ResourcesCapability,
    /// Prompt capabilities.
    pub prompts: PromptsCapability,
    /// Logging capability.
    pub logging: LoggingCapability,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolsCapability { list_changed: true },
            resources: ResourcesCapability::default(),
            prompts: PromptsCapability::default(),
            logging: LoggingCapability::default(),
        }
    }
}

/// Builds the `initialize` result payload.
///
/// The server always answers with its own version triple. An incompatible
/// client version is still accepted, with the mismatch documented in
/// `instructions`.
#[must_use]
pub fn initialize_result(client_version: ProtocolVersion) -> Value {
    let instructions = if client_version == PROTOCOL_VERSION {
        None
    } else {
        Some(format!(
            "Client requested protocol version {client_version}; server speaks {PROTOCOL_VERSION}"
        ))
    };

    let mut result = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": ServerCapabilities::default(),
        "serverInfo": ServerInfo::default(),
    });
    if let Some(note) = instructions {
        result["instructions"] = Value::String(note);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_with_numeric_id() {
        let json = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let msg = parse_message(json).unwrap();

        match msg {
            IncomingMessage::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, RequestId::Number(1));
            }
            IncomingMessage::Notification(_) => panic!("Expected request"),
        }
    }

    #[test]
    fn parse_request_with_string_id() {
        let json = r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#;
        let msg = parse_message(json).unwrap();

        match msg {
            IncomingMessage::Request(req) => {
                assert_eq!(req.id, RequestId::String("abc".to_string()));
            }
            IncomingMessage::Notification(_) => panic!("Expected request"),
        }
    }

    #[test]
    fn parse_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let msg = parse_message(json).unwrap();

        match msg {
            IncomingMessage::Notification(notif) => {
                assert_eq!(notif.method, "notifications/initialized");
            }
            IncomingMessage::Request(_) => panic!("Expected notification"),
        }
    }

    #[test]
    fn parse_invalid_json_is_parse_error() {
        let error = parse_message("not json at all").unwrap_err();
        assert_eq!(error.error.code, -32700);
        assert!(error.id.is_none());
    }

    #[test]
    fn parse_missing_jsonrpc_is_invalid_request() {
        let error = parse_message(r#"{"id":1,"method":"x"}"#).unwrap_err();
        assert_eq!(error.error.code, -32600);
        // The id is still recovered for correlation.
        assert_eq!(error.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn parse_missing_method_is_invalid_request() {
        let error = parse_message(r#"{"jsonrpc":"2.0","id":2}"#).unwrap_err();
        assert_eq!(error.error.code, -32600);
    }

    #[test]
    fn parse_non_object_is_invalid_request() {
        let error = parse_message("[1,2,3]").unwrap_err();
        assert_eq!(error.error.code, -32600);
    }

    #[test]
    fn error_response_null_id_serialisation() {
        let error = JsonRpcError::parse_error();
        let json = serde_json::to_value(&error).unwrap();

        assert!(json["id"].is_null());
        assert_eq!(json["error"]["code"], -32700);
        assert_eq!(json["error"]["message"], "Parse error");
    }

    #[test]
    fn protocol_version_ordering() {
        let older = ProtocolVersion {
            major: 2024,
            minor: 10,
            patch: 0,
        };
        assert!(older < PROTOCOL_VERSION);
        assert_eq!(PROTOCOL_VERSION.to_string(), "2024.11.5");
    }

    #[test]
    fn initialize_result_matching_version_has_no_instructions() {
        let result = initialize_result(PROTOCOL_VERSION);
        assert_eq!(result["protocolVersion"]["major"], 2024);
        assert_eq!(result["protocolVersion"]["minor"], 11);
        assert_eq!(result["protocolVersion"]["patch"], 5);
        assert!(result.get("instructions").is_none());
    }

    #[test]
    fn initialize_result_mismatch_documented_in_instructions() {
        let result = initialize_result(ProtocolVersion {
            major: 2023,
            minor: 1,
            patch: 0,
        });
        let note = result["instructions"].as_str().unwrap();
        assert!(note.contains("2023.1.0"));
        assert!(note.contains("2024.11.5"));
    }

    #[test]
    fn initialize_params_deserialise() {
        let json = r#"{
            "protocolVersion": {"major": 2024, "minor": 11, "patch": 5},
            "clientInfo": {"name": "test-client", "version": "1.0.0"},
            "capabilities": {}
        }"#;

        let params: InitializeParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.protocol_version, PROTOCOL_VERSION);
        assert_eq!(params.client_info.unwrap().name, "test-client");
    }

    #[test]
    fn server_capabilities_serialisation() {
        let caps = ServerCapabilities::default();
        let json = serde_json::to_value(&caps).unwrap();

        assert_eq!(json["tools"]["listChanged"], true);
        assert_eq!(json["resources"]["subscribe"], false);
        assert_eq!(json["logging"]["level"], "info");
    }

    #[test]
    fn outgoing_message_untagged_serialisation() {
        let ok: OutgoingMessage =
            JsonRpcResponse::success(RequestId::Number(7), json!({"x": 1})).into();
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["result"]["x"], 1);
        assert!(json.get("error").is_none());

        let err: OutgoingMessage =
            JsonRpcError::application(RequestId::Number(8), "Rate limit exceeded").into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], -32000);
        assert!(json.get("result").is_none());
    }
}
