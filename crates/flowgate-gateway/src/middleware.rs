//! Fixed middleware chain applied around every dispatched request.
//!
//! Slash normalization and panic recovery come from `tower-http`
//! (`NormalizePathLayer`, `CatchPanicLayer`); this module supplies the two
//! gateway-specific members of the chain: structured access logging and the
//! configuration-version response header.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use flowgate_kernel::ApiRegistry;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Response header carrying the API registry's configuration version.
pub const CONFIG_VERSION_HEADER: &str = "x-config-version";

/// Log one line per request: id, method, path, status, duration.
pub async fn access_log(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration = ?start.elapsed(),
        "access"
    );
    response
}

/// Attach the current configuration version to every response, so callers
/// can tell which routing-table generation served them.
pub async fn attach_config_version(
    State(registry): State<Arc<ApiRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&registry.version().to_string()) {
        response.headers_mut().insert(CONFIG_VERSION_HEADER, value);
    }
    response
}

/// Convert a panic escaping a handler into a 500 response instead of tearing
/// the connection (or the process) down.  Installed via
/// `CatchPanicLayer::custom`.
pub fn recover_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    };
    error!(panic = %detail, "request handler panicked");

    let mut response = Response::new(Body::from(r#"{"error":"internal server error"}"#));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
}
