//! flowgate — entry point.
//!
//! Reads configuration from environment variables and starts the gateway.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FLOWGATE_HOST` | `0.0.0.0` | Bind host. |
//! | `FLOWGATE_PORT` | `8080` | TCP port to listen on. |
//! | `RUST_LOG` | `flowgate_gateway=info` | tracing filter directives. |

use flowgate_gateway::{
    admin, filters, DynamicMux, GatewayServer, GatewayServerConfig, PipelineController,
};
use flowgate_kernel::{ApiRegistry, FilterRegistry, Services};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Structured logging must come up before anything else; a gateway that
    // cannot log is not allowed to serve.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flowgate_gateway=info,flowgate_kernel=info"));
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("logger initialization failed: {err}");
        std::process::exit(1);
    }

    let host = std::env::var("FLOWGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("FLOWGATE_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);

    // Filter kinds register during startup; the registry is sealed before
    // the first request.
    let mut kinds = FilterRegistry::new();
    if let Err(err) = filters::register_builtin(&mut kinds) {
        eprintln!("filter registration failed: {err}");
        std::process::exit(1);
    }

    let api = Arc::new(ApiRegistry::new());
    let services = Services::new(api.clone());
    let controller = PipelineController::new(kinds.seal(), services);
    admin::register(&controller, &api);

    let mux = DynamicMux::new(api.clone());

    info!(host = %host, port, "flowgate configuration loaded");

    let config = GatewayServerConfig::new().with_host(host).with_port(port);
    if let Err(err) = GatewayServer::new(config, mux, api).start().await {
        eprintln!("gateway error: {err}");
        std::process::exit(1);
    }
}
