//! flowgate gateway runtime — hot-swappable HTTP request pipelines.
//!
//! Administrative updates mutate declarative pipeline specifications; the
//! routing table and pipelines rebuild themselves and take effect on the next
//! request boundary, while in-flight requests finish against the generation
//! they started on.
//!
//! # Pieces
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Pipeline`] | Ordered filter chain with conditional jumps, per-request stats, and `inherit`-based generation transfer |
//! | [`DynamicMux`] | Atomically swapped routing table fed by the API registry's change channel |
//! | [`PipelineController`] | Create / update / delete / status over pipeline specs |
//! | [`admin`] | The administrative endpoints, dispatched through the mux itself |
//! | [`GatewayServer`] | axum front end with the fixed middleware chain |
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate_gateway::{
//!     admin, filters, DynamicMux, GatewayServer, GatewayServerConfig, PipelineController,
//! };
//! use flowgate_kernel::{ApiRegistry, FilterRegistry, Services};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut kinds = FilterRegistry::new();
//!     filters::register_builtin(&mut kinds).expect("builtin kinds register");
//!
//!     let api = Arc::new(ApiRegistry::new());
//!     let services = Services::new(api.clone());
//!     let controller = PipelineController::new(kinds.seal(), services);
//!     admin::register(&controller, &api);
//!
//!     let mux = DynamicMux::new(api.clone());
//!     GatewayServer::new(GatewayServerConfig::new().with_port(8080), mux, api)
//!         .start()
//!         .await
//!         .expect("server runs");
//! }
//! ```

pub mod admin;
pub mod controller;
pub mod error;
pub mod filters;
pub mod middleware;
pub mod mux;
pub mod pipeline;
pub mod server;

pub use controller::PipelineController;
pub use error::{GatewayImplError, GatewayResult};
pub use mux::{DynamicMux, MuxRouter};
pub use pipeline::{Pipeline, PipelineStatus};
pub use server::{GatewayServer, GatewayServerConfig};
