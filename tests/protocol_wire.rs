//! Wire-level tests of the JSON-RPC 2.0 protocol surface.
//!
//! These exercise the public parsing and serialisation API the
//! transports rely on: request/notification splitting, error envelope
//! shapes, and the reserved error codes.

use mcp_gateway::protocol::{
    parse_message, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcResponse, ErrorCode,
    OutgoingMessage, RequestId, PROTOCOL_VERSION,
};
use serde_json::json;

#[test]
fn parse_initialize_request() {
    let raw = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": {"major": 2024, "minor": 11, "patch": 5},
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    }"#;

    let message = parse_message(raw).unwrap();
    let IncomingMessage::Request(request) = message else {
        panic!("expected request");
    };
    assert_eq!(request.method, "initialize");
    assert_eq!(request.id, RequestId::Number(1));
    assert!(request.params.is_some());
}

#[test]
fn parse_request_without_params() {
    let raw = r#"{"jsonrpc": "2.0", "id": 2, "method": "tools/list"}"#;

    let message = parse_message(raw).unwrap();
    let IncomingMessage::Request(request) = message else {
        panic!("expected request");
    };
    assert_eq!(request.method, "tools/list");
    assert!(request.params.is_none());
}

#[test]
fn parse_notification_has_no_id() {
    let raw = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;

    let message = parse_message(raw).unwrap();
    let IncomingMessage::Notification(notification) = message else {
        panic!("expected notification");
    };
    assert_eq!(notification.method, "notifications/initialized");
}

#[test]
fn null_id_is_treated_as_notification() {
    let raw = r#"{"jsonrpc": "2.0", "id": null, "method": "noise"}"#;

    let message = parse_message(raw).unwrap();
    assert!(matches!(message, IncomingMessage::Notification(_)));
}

#[test]
fn malformed_json_is_parse_error_with_null_id() {
    let error = parse_message("not valid json").unwrap_err();
    assert_eq!(error.error.code, -32700);

    let wire = serde_json::to_value(&error).unwrap();
    assert!(wire["id"].is_null());
    assert_eq!(wire["jsonrpc"], "2.0");
}

#[test]
fn missing_jsonrpc_version_is_invalid_request() {
    let error = parse_message(r#"{"id": 1, "method": "test"}"#).unwrap_err();
    assert_eq!(error.error.code, -32600);
}

#[test]
fn wrong_jsonrpc_version_is_invalid_request() {
    let error = parse_message(r#"{"jsonrpc": "1.0", "id": 1, "method": "test"}"#).unwrap_err();
    assert_eq!(error.error.code, -32600);
}

#[test]
fn reserved_codes_match_the_wire_contract() {
    assert_eq!(ErrorCode::ParseError.code(), -32700);
    assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
    assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
    assert_eq!(ErrorCode::InvalidParams.code(), -32602);
    assert_eq!(ErrorCode::InternalError.code(), -32603);
    assert_eq!(ErrorCode::NotInitialized.code(), -32002);
    assert_eq!(ErrorCode::ApplicationError.code(), -32000);
}

#[test]
fn success_response_shape() {
    let response = JsonRpcResponse::success(RequestId::String("req-1".to_string()), json!({"ok": true}));
    let wire = serde_json::to_value(&response).unwrap();

    assert_eq!(wire["jsonrpc"], "2.0");
    assert_eq!(wire["id"], "req-1");
    assert_eq!(wire["result"]["ok"], true);
    assert!(wire.get("error").is_none());
}

#[test]
fn error_response_shape_with_data() {
    let error = JsonRpcError::new(
        Some(RequestId::Number(7)),
        JsonRpcErrorData::with_message(ErrorCode::InternalError, "backend exploded")
            .with_data(json!({"cause": "io"})),
    );
    let wire = serde_json::to_value(&error).unwrap();

    assert_eq!(wire["id"], 7);
    assert_eq!(wire["error"]["code"], -32603);
    assert_eq!(wire["error"]["message"], "backend exploded");
    assert_eq!(wire["error"]["data"]["cause"], "io");
}

#[test]
fn outgoing_message_serialises_untagged() {
    let success: OutgoingMessage =
        JsonRpcResponse::success(RequestId::Number(1), json!(42)).into();
    let failure: OutgoingMessage =
        JsonRpcError::application(RequestId::Number(2), "Rate limit exceeded").into();

    let success = serde_json::to_value(&success).unwrap();
    let failure = serde_json::to_value(&failure).unwrap();

    assert_eq!(success["result"], 42);
    assert_eq!(failure["error"]["code"], -32000);
}

#[test]
fn server_version_triple_is_stable() {
    let wire = serde_json::to_value(PROTOCOL_VERSION).unwrap();
    assert_eq!(wire, json!({"major": 2024, "minor": 11, "patch": 5}));
}
