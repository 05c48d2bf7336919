//! HTTP transport: one JSON-RPC object per POST.
//!
//! An axum router exposes the configured path (default `/mcp`) plus a
//! `/health` probe. Each request carries its credential in the
//! `Authorization: Bearer` header; multi-session clients bind to a
//! session via the `Mcp-Session-Id` header, which the server echoes on
//! every response once a session is resolved.
//!
//! TLS is not terminated in-process; front the listener with the
//! operator's proxy when `tls_enabled` is set.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::server::{Handled, RequestContext, Server};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state behind the router.
pub struct HttpState {
    server: Server,
}

impl HttpState {
    /// Creates HTTP state wrapping a server.
    #[must_use]
    pub const fn new(server: Server) -> Self {
        Self { server }
    }
}

/// Builds the axum router for the MCP endpoint and health probe.
#[must_use]
pub fn create_router(state: Arc<HttpState>, rpc_path: &str) -> Router {
    Router::new()
        .route(rpc_path, post(handle_rpc))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Extracts the bearer credential from the Authorization header.
fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| token.trim().to_string())
        })
}

fn session_hint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn handle_rpc(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let counters = state.server.transport_counters();
    counters.add_bytes_in(body.len() as u64);

    let ctx = RequestContext::http(session_hint(&headers), bearer_credential(&headers));
    debug!(session = ?ctx.session_hint, "http request received");

    let handled = state.server.handle_message(&ctx, &body).await;
    into_http_response(handled, &counters)
}

fn into_http_response(
    handled: Handled,
    counters: &crate::transport::TransportCounters,
) -> Response {
    let Handled {
        message,
        session_id,
    } = handled;

    let (status, payload) = match message {
        Some(message) => match serde_json::to_string(&message) {
            Ok(serialised) => (StatusCode::OK, Some(serialised)),
            Err(e) => {
                counters.record_error(format!("response serialisation failed: {e}"));
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        },
        // Notifications produce no body; HTTP still needs a status.
        None => (StatusCode::NO_CONTENT, None),
    };

    let mut builder = Response::builder().status(status);
    if let Some(id) = session_id {
        builder = builder.header(SESSION_HEADER, id);
    }

    let response = match payload {
        Some(serialised) => {
            counters.add_bytes_out(serialised.len() as u64);
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serialised))
        }
        None => builder.body(Body::empty()),
    };

    response.unwrap_or_else(|e| {
        counters.record_error(format!("response build failed: {e}"));
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn handle_health(State(state): State<Arc<HttpState>>) -> Response {
    (StatusCode::OK, Json(state.server.health())).into_response()
}

/// Binds the listener and serves until the server's shutdown signal.
///
/// # Errors
///
/// Returns a [`ServerError::Transport`] when the bind or accept loop
/// fails.
pub async fn serve(server: Server) -> Result<(), ServerError> {
    let config = server.transport_config().clone();
    if config.tls_enabled {
        warn!("tls_enabled is set; terminate TLS at the fronting proxy");
    }

    let counters = server.transport_counters();
    let mut shutdown = server.shutdown_signal();

    let state = Arc::new(HttpState::new(server));
    let router = create_router(state, &config.path);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ServerError::transport_io(format!("bind {bind_addr}"), e))?;

    counters.connection_opened();
    info!(addr = %bind_addr, path = %config.path, "http transport listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| ServerError::transport_io("http serve", e));

    counters.connection_closed();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn http_config(auth_enabled: bool) -> Config {
        let mut raw = json!({
            "transport": {"kind": "http"},
        });
        if auth_enabled {
            raw["auth"] = json!({
                "enabled": true,
                "method": "token",
                "tokens": [{"token": "secret-token", "principal": "ci", "permissions": []}]
            });
        }
        serde_json::from_value(raw).unwrap()
    }

    fn router_for(server: &Server) -> Router {
        create_router(Arc::new(HttpState::new(server.clone())), "/mcp")
    }

    fn init_body() -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": {"major": 2024, "minor": 11, "patch": 5},
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0.0"}
            }
        })
        .to_string()
    }

    fn post_request(body: String, session: Option<&str>, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_status() {
        let server = Server::new(http_config(false)).unwrap();
        server.start().unwrap();
        let router = router_for(&server);

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "running");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_returns_session_header() {
        let server = Server::new(http_config(false)).unwrap();
        server.start().unwrap();
        let router = router_for(&server);

        let response = router
            .oneshot(post_request(init_body(), None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        assert!(session.is_some());

        let json = body_json(response).await;
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["result"]["protocolVersion"]["major"], 2024);
        assert_eq!(json["result"]["serverInfo"]["name"], "mcp-gateway");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn session_header_binds_follow_up_requests() {
        let server = Server::new(http_config(false)).unwrap();
        server.start().unwrap();

        let response = router_for(&server)
            .oneshot(post_request(init_body(), None, None))
            .await
            .unwrap();
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string();
        let response = router_for(&server)
            .oneshot(post_request(list, Some(&session), None))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert!(json["result"].is_array());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn request_without_session_is_uninitialised() {
        let server = Server::new(http_config(false)).unwrap();
        server.start().unwrap();

        let list = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string();
        let response = router_for(&server)
            .oneshot(post_request(list, None, None))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], -32002);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_bearer_token_is_unauthorized() {
        let server = Server::new(http_config(true)).unwrap();
        server.start().unwrap();

        let response = router_for(&server)
            .oneshot(post_request(init_body(), None, None))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], -32000);
        assert_eq!(json["error"]["message"], "Unauthorized");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn valid_bearer_token_initialises() {
        let server = Server::new(http_config(true)).unwrap();
        server.start().unwrap();

        let response = router_for(&server)
            .oneshot(post_request(init_body(), None, Some("secret-token")))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert!(json["result"]["protocolVersion"].is_object());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn notification_returns_no_content() {
        let server = Server::new(http_config(false)).unwrap();
        server.start().unwrap();

        let body = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        let response = router_for(&server)
            .oneshot(post_request(body, None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        server.stop().await.unwrap();
    }

    #[test]
    fn bearer_extraction_is_scheme_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bearer abc123".parse().unwrap());
        assert_eq!(bearer_credential(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(bearer_credential(&headers), None);
    }
}
