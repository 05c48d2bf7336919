//! Request routing: the per-request pipeline.
//!
//! Sequence for every tool dispatch:
//!
//! 1. Parse (−32700 / −32600 handled by the caller-facing error)
//! 2. `initialize` fast-path
//! 3. Session resolve (lazy, uninitialised for stdio)
//! 4. Initialisation gate (−32002)
//! 5. Authentication (−32000 Unauthorized)
//! 6. Tool resolution (−32601)
//! 7. Authorisation (−32000 Forbidden)
//! 8. Structural validation (−32602)
//! 9. Admission (−32000, possibly deferred through the queue)
//! 10. Deadline-scoped handler dispatch (−32603 on timeout)
//! 11. Outcome recording and response

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::audit::AuditEvent;
use crate::balance::{Admission, RequestOutcome, RequestPriority};
use crate::config::TransportKind;
use crate::error::ToolError;
use crate::protocol::{
    initialize_result, parse_message, ErrorCode, IncomingMessage, InitializeParams, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, OutgoingMessage, RequestId,
};
use crate::registry::{schema, ToolDescriptor};
use crate::server::{Lifecycle, Server};
use crate::session::{InitializeOutcome, Session};

/// Extra slack the router grants a queue ticket beyond the queue's own
/// deadline, so the sweep always answers first.
const QUEUE_AWAIT_GRACE: Duration = Duration::from_millis(250);

/// What a transport knows about an inbound message.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Transport the message arrived on.
    pub transport: Option<TransportKind>,
    /// Session id presented by the client (HTTP header).
    pub session_hint: Option<String>,
    /// Credential presented by the client (HTTP Authorization header).
    pub credential: Option<String>,
}

impl RequestContext {
    /// Context for the stdio transport.
    #[must_use]
    pub const fn stdio() -> Self {
        Self {
            transport: Some(TransportKind::Stdio),
            session_hint: None,
            credential: None,
        }
    }

    /// Context for an HTTP request.
    #[must_use]
    pub const fn http(session_hint: Option<String>, credential: Option<String>) -> Self {
        Self {
            transport: Some(TransportKind::Http),
            session_hint,
            credential,
        }
    }
}

/// Result of handling one framed message.
#[derive(Debug)]
pub struct Handled {
    /// The response to write back, absent for notifications.
    pub message: Option<OutgoingMessage>,
    /// The session the message was bound to, when one was resolved.
    pub session_id: Option<String>,
}

impl Handled {
    fn response(message: impl Into<OutgoingMessage>, session_id: Option<String>) -> Self {
        Self {
            message: Some(message.into()),
            session_id,
        }
    }

    const fn silent() -> Self {
        Self {
            message: None,
            session_id: None,
        }
    }
}

impl Server {
    /// Handles one framed JSON-RPC message from a transport.
    ///
    /// Always produces a response for requests; notifications and
    /// unrecoverable frames produce `None`.
    pub async fn handle_message(&self, ctx: &RequestContext, raw: &str) -> Handled {
        match parse_message(raw) {
            Err(error) => Handled::response(error, None),
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(&notification);
                Handled::silent()
            }
            Ok(IncomingMessage::Request(request)) => self.handle_request(ctx, request).await,
        }
    }

    fn handle_notification(&self, notification: &JsonRpcNotification) {
        // Notifications carry no response; unknown ones are ignored per
        // the JSON-RPC spec.
        debug!(method = %notification.method, "notification received");
    }

    async fn handle_request(&self, ctx: &RequestContext, request: JsonRpcRequest) -> Handled {
        if self.inner.lifecycle() != Lifecycle::Running {
            return Handled::response(
                JsonRpcError::application(request.id, "Server shutting down"),
                None,
            );
        }

        let session = self.resolve_session(ctx);

        if request.method == "initialize" {
            let message = self.handle_initialize(ctx, &session, &request);
            return Handled::response(message, Some(session.id.clone()));
        }

        if !session.is_initialized() {
            self.inner.audit.log_silent(&AuditEvent::request_blocked(
                session.id.clone(),
                Some(request.method.clone()),
                ErrorCode::NotInitialized.code(),
                "Server not initialized",
            ));
            return Handled::response(
                JsonRpcError::not_initialized(request.id),
                Some(session.id.clone()),
            );
        }

        let message = self.dispatch_tool(ctx, &session, request).await;
        Handled::response(message, Some(session.id.clone()))
    }

    /// Finds or creates the session a request belongs to.
    ///
    /// Stdio carries a single logical session per process, created
    /// lazily and uninitialised so the −32002 contract holds. HTTP
    /// clients bind via the session header; an unknown or absent id
    /// yields a fresh uninitialised session.
    fn resolve_session(&self, ctx: &RequestContext) -> Arc<Session> {
        if let Some(hint) = &ctx.session_hint {
            if let Some(session) = self.inner.sessions.get(hint) {
                return session;
            }
        }

        let transport = ctx.transport.unwrap_or(TransportKind::Stdio);
        if transport == TransportKind::Stdio {
            let mut stdio_session = self.inner.stdio_session.lock().unwrap();
            if let Some(id) = stdio_session.as_ref() {
                if let Some(session) = self.inner.sessions.get(id) {
                    return session;
                }
            }
            let session = self.inner.sessions.create(transport);
            *stdio_session = Some(session.id.clone());
            return session;
        }

        self.inner.sessions.create(transport)
    }

    fn handle_initialize(
        &self,
        ctx: &RequestContext,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
    ) -> OutgoingMessage {
        let auth_context = match self.inner.auth.authenticate(ctx.credential.as_deref()) {
            Ok(context) => context,
            Err(error) => {
                return JsonRpcError::application(request.id.clone(), error.to_string()).into();
            }
        };

        let params: InitializeParams = match request
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
        {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcError::invalid_params(
                    request.id.clone(),
                    format!("Invalid params: {e}"),
                )
                .into();
            }
            None => {
                return JsonRpcError::invalid_params(
                    request.id.clone(),
                    "Invalid params: missing initialize params",
                )
                .into();
            }
        };

        match session.initialize(&params) {
            InitializeOutcome::Initialized | InitializeOutcome::AlreadyInitialized => {
                session.set_auth(auth_context);
                session.update_activity();
                debug!(session = %session.id, version = %params.protocol_version, "session initialised");
                JsonRpcResponse::success(
                    request.id.clone(),
                    initialize_result(params.protocol_version),
                )
                .into()
            }
            InitializeOutcome::Conflict => JsonRpcError::invalid_request(
                Some(request.id.clone()),
                "Server already initialized",
            )
            .into(),
        }
    }

    async fn dispatch_tool(
        &self,
        ctx: &RequestContext,
        session: &Arc<Session>,
        request: JsonRpcRequest,
    ) -> OutgoingMessage {
        let id = request.id.clone();
        let priority = RequestPriority::from_meta(
            request
                .params
                .as_ref()
                .and_then(|p| p.get("_meta"))
                .and_then(|m| m.get("priority")),
        );

        let auth_context = match self.inner.auth.authenticate(ctx.credential.as_deref()) {
            Ok(context) => context,
            Err(error) => {
                self.audit_blocked(session, &request.method, &error.to_string());
                return JsonRpcError::application(id, error.to_string()).into();
            }
        };
        if session.auth().is_none() {
            session.set_auth(auth_context.clone());
        }

        // `tools/call` wraps the target; any other method is resolved
        // directly as a tool name.
        let (tool_name, args) = if request.method == "tools/call" {
            let params = request.params.unwrap_or_else(|| json!({}));
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return JsonRpcError::invalid_params(
                    id,
                    "Invalid params: missing tool name",
                )
                .into();
            };
            let args = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            (name.to_string(), args)
        } else {
            (
                request.method.clone(),
                request.params.unwrap_or_else(|| json!({})),
            )
        };

        let Some(tool) = self.inner.registry.get(&tool_name) else {
            return JsonRpcError::method_not_found(id, &tool_name).into();
        };

        if let Err(error) = self
            .inner
            .auth
            .authorize(&auth_context, tool.required_permission.as_deref())
        {
            self.audit_blocked(session, &tool_name, &error.to_string());
            return JsonRpcError::application(id, error.to_string()).into();
        }

        if let Err(error) = schema::validate(&tool.input_schema, &args) {
            return JsonRpcError::invalid_params(id, error.to_string()).into();
        }

        match self.inner.balancer.should_allow(&session.id, priority) {
            Ok(Admission::Ready) => {}
            Ok(Admission::Deferred(ticket)) => {
                let deadline = self.inner.balancer.queue_deadline() + QUEUE_AWAIT_GRACE;
                match tokio::time::timeout(deadline, ticket).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(error))) => {
                        self.audit_blocked(session, &tool_name, &error.to_string());
                        return JsonRpcError::application(id, error.to_string()).into();
                    }
                    Ok(Err(_)) | Err(_) => {
                        self.audit_blocked(session, &tool_name, "Request timeout in queue");
                        return JsonRpcError::application(id, "Request timeout in queue").into();
                    }
                }
            }
            Err(error) => {
                self.audit_blocked(session, &tool_name, &error.to_string());
                return JsonRpcError::application(id, error.to_string()).into();
            }
        }

        self.invoke(session, &tool, &tool_name, id, args).await
    }

    /// Runs the handler under its deadline and records the outcome.
    async fn invoke(
        &self,
        session: &Arc<Session>,
        tool: &ToolDescriptor,
        tool_name: &str,
        id: RequestId,
        args: Value,
    ) -> OutgoingMessage {
        session.begin_request();
        let record = self.inner.balancer.record_start(&session.id);
        let deadline = tool.timeout.unwrap_or(self.inner.balancer.default_timeout());

        let result = tokio::time::timeout(deadline, tool.handler.call(args)).await;
        let elapsed = record.elapsed();

        let (outcome, message): (RequestOutcome, OutgoingMessage) = match result {
            Ok(Ok(value)) => (
                RequestOutcome::Success,
                JsonRpcResponse::success(id, value).into(),
            ),
            Ok(Err(ToolError::InvalidParams(reason))) => (
                RequestOutcome::InvalidParams,
                JsonRpcError::invalid_params(id, format!("Invalid params: {reason}")).into(),
            ),
            Ok(Err(ToolError::NotFound(name))) => (
                RequestOutcome::InvalidParams,
                JsonRpcError::new(
                    Some(id),
                    crate::protocol::JsonRpcErrorData::with_message(
                        ErrorCode::MethodNotFound,
                        format!("Tool not found: {name}"),
                    ),
                )
                .into(),
            ),
            Ok(Err(ToolError::Failed { message, detail })) => {
                // Handlers signal domain validation failures with the
                // "Invalid params" prefix.
                if message.starts_with("Invalid params") {
                    (
                        RequestOutcome::InvalidParams,
                        JsonRpcError::invalid_params(id, message).into(),
                    )
                } else {
                    (
                        RequestOutcome::Failure,
                        JsonRpcError::internal(id, message, detail).into(),
                    )
                }
            }
            Err(_) => {
                warn!(tool = %tool_name, timeout_ms = deadline.as_millis() as u64, "handler timeout");
                (
                    RequestOutcome::Failure,
                    JsonRpcError::internal(id, "Handler timeout", None).into(),
                )
            }
        };

        session.end_request();
        self.inner.balancer.record_end(record, outcome);
        self.inner.audit.log_silent(&AuditEvent::request_completed(
            session.id.clone(),
            tool_name,
            message.error_code(),
            elapsed,
        ));

        message
    }

    fn audit_blocked(&self, session: &Arc<Session>, tool: &str, reason: &str) {
        self.inner.audit.log_silent(&AuditEvent::request_blocked(
            session.id.clone(),
            Some(tool.to_string()),
            ErrorCode::ApplicationError.code(),
            reason,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::PROTOCOL_VERSION;

    async fn started_server() -> Server {
        let server = Server::new(Config::default()).unwrap();
        server.start().unwrap();
        server
    }

    fn init_request(id: u64) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": {"major": 2024, "minor": 11, "patch": 5},
                "clientInfo": {"name": "t", "version": "0"},
                "capabilities": {}
            }
        })
        .to_string()
    }

    fn request(id: u64, method: &str, params: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
    }

    async fn roundtrip(server: &Server, ctx: &RequestContext, raw: &str) -> Value {
        let handled = server.handle_message(ctx, raw).await;
        serde_json::to_value(handled.message.expect("expected a response")).unwrap()
    }

    #[tokio::test]
    async fn parse_error_yields_minus_32700() {
        let server = started_server().await;
        let response = roundtrip(&server, &RequestContext::stdio(), "{nope").await;
        assert_eq!(response["error"]["code"], -32700);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn uninitialised_request_yields_minus_32002() {
        let server = started_server().await;
        let ctx = RequestContext::stdio();

        let response = roundtrip(&server, &ctx, &request(1, "tools/list", json!({}))).await;
        assert_eq!(response["error"]["code"], -32002);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_then_dispatch() {
        let server = started_server().await;
        let ctx = RequestContext::stdio();

        let response = roundtrip(&server, &ctx, &init_request(1)).await;
        assert_eq!(response["result"]["protocolVersion"]["major"], 2024);
        assert_eq!(
            response["result"]["protocolVersion"],
            serde_json::to_value(PROTOCOL_VERSION).unwrap()
        );

        let response = roundtrip(&server, &ctx, &request(2, "tools/list", json!({}))).await;
        let names: Vec<&str> = response["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"discover_tools"));
        assert!(names.contains(&"system/health"));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_yields_minus_32601() {
        let server = started_server().await;
        let ctx = RequestContext::stdio();
        roundtrip(&server, &ctx, &init_request(1)).await;

        let response = roundtrip(&server, &ctx, &request(3, "does/not/exist", json!({}))).await;
        assert_eq!(response["error"]["code"], -32601);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn tools_call_unwraps_target() {
        let server = started_server().await;
        let ctx = RequestContext::stdio();
        roundtrip(&server, &ctx, &init_request(1)).await;

        let response = roundtrip(
            &server,
            &ctx,
            &request(
                2,
                "tools/call",
                json!({"name": "system/info", "arguments": {}}),
            ),
        )
        .await;
        assert_eq!(response["result"]["version"], env!("CARGO_PKG_VERSION"));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn ping_is_rejected_before_initialize() {
        let server = started_server().await;
        let response = roundtrip(
            &server,
            &RequestContext::stdio(),
            &request(1, "ping", json!({})),
        )
        .await;
        // No method skips the initialisation gate.
        assert_eq!(response["error"]["code"], -32002);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn notification_is_silent() {
        let server = started_server().await;
        let handled = server
            .handle_message(
                &RequestContext::stdio(),
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            )
            .await;
        assert!(handled.message.is_none());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn conflicting_reinitialize_is_rejected() {
        let server = started_server().await;
        let ctx = RequestContext::stdio();
        roundtrip(&server, &ctx, &init_request(1)).await;

        let different = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "initialize",
            "params": {
                "protocolVersion": {"major": 2024, "minor": 11, "patch": 5},
                "clientInfo": {"name": "other", "version": "1"},
                "capabilities": {}
            }
        })
        .to_string();
        let response = roundtrip(&server, &ctx, &different).await;
        assert_eq!(response["error"]["code"], -32600);

        // An identical repeat stays idempotent.
        let response = roundtrip(&server, &ctx, &init_request(3)).await;
        assert!(response.get("result").is_some());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stopped_server_rejects_requests() {
        let server = Server::new(Config::default()).unwrap();
        let response = roundtrip(
            &server,
            &RequestContext::stdio(),
            &request(1, "tools/list", json!({})),
        )
        .await;
        assert_eq!(response["error"]["code"], -32000);
        assert_eq!(response["error"]["message"], "Server shutting down");
    }
}
