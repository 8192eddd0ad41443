//! The outer axum HTTP server.
//!
//! All routing decisions belong to the [`DynamicMux`]; axum contributes the
//! listener, the middleware chain, and the request/response conversion.  The
//! router therefore has a single fallback service that translates the hyper
//! request into an [`HttpContext`], dispatches it through the mux, and
//! translates the context's response back.

use crate::middleware::{access_log, attach_config_version, recover_panic};
use crate::mux::DynamicMux;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use flowgate_kernel::{ApiRegistry, HttpContext, HttpMethod, HttpRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tracing::{error, info};

use crate::error::{GatewayImplError, GatewayResult};

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone)]
pub struct GatewayServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl GatewayServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.port)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State & dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// State shared across the dispatch path.
#[derive(Clone)]
struct AppState {
    mux: Arc<DynamicMux>,
    max_body_bytes: usize,
}

/// Fallback service: every request funnels through the dynamic mux.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(method) = HttpMethod::from_str_ci(parts.method.as_str()) else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            axum::Json(serde_json::json!({ "error": "unsupported method" })),
        )
            .into_response();
    };

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                axum::Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let mut inbound = HttpRequest::new(method, parts.uri.path());
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            inbound
                .headers
                .insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    inbound.body = bytes.to_vec();

    let mut ctx = HttpContext::new(inbound);
    state.mux.serve(&mut ctx).await;

    if !ctx.tags().is_empty() {
        info!(path = %parts.uri.path(), tags = ?ctx.tags(), "request tags");
    }

    into_axum_response(&ctx)
}

fn into_axum_response(ctx: &HttpContext) -> Response {
    let outbound = ctx.response();
    let mut builder = Response::builder().status(outbound.status);
    for (name, value) in &outbound.headers {
        builder = builder.header(name, value);
    }
    match builder.body(Body::from(outbound.body.clone())) {
        Ok(response) => response,
        Err(err) => {
            error!(%err, "building response failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// The gateway's HTTP front end.
pub struct GatewayServer {
    config: GatewayServerConfig,
    mux: Arc<DynamicMux>,
    registry: Arc<ApiRegistry>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayServerConfig,
        mux: Arc<DynamicMux>,
        registry: Arc<ApiRegistry>,
    ) -> Self {
        Self {
            config,
            mux,
            registry,
        }
    }

    /// Build the axum `Router` without starting the server.
    ///
    /// Useful for integration tests that drive the server via
    /// `tower::ServiceExt` instead of a socket.  Layer order (outermost
    /// first): slash normalization, access log, panic recovery,
    /// config-version attachment, mux dispatch.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            mux: self.mux.clone(),
            max_body_bytes: self.config.max_body_bytes,
        };

        Router::new()
            .fallback(dispatch)
            .layer(middleware::from_fn_with_state(
                self.registry.clone(),
                attach_config_version,
            ))
            .layer(CatchPanicLayer::custom(recover_panic))
            .layer(middleware::from_fn(access_log))
            .layer(NormalizePathLayer::trim_trailing_slash())
            .with_state(state)
    }

    /// Start the server and block until it exits.
    pub async fn start(self) -> GatewayResult<()> {
        let addr = self.config.socket_addr();
        info!("flowgate listening on http://{addr}");

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayImplError::Bind { addr, source })?;
        axum::serve(listener, router)
            .await
            .map_err(GatewayImplError::Serve)?;
        Ok(())
    }

    /// Start the server in a background Tokio task.
    pub fn start_background(self) -> tokio::task::JoinHandle<GatewayResult<()>> {
        tokio::spawn(async move { self.start().await })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = GatewayServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn builder_methods() {
        let config = GatewayServerConfig::new()
            .with_host("127.0.0.1")
            .with_port(9000)
            .with_max_body_bytes(1024);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_body_bytes, 1024);
    }

    #[test]
    fn socket_addr_parses() {
        let config = GatewayServerConfig::new().with_host("127.0.0.1").with_port(8080);
        assert_eq!(config.socket_addr().port(), 8080);
    }
}
