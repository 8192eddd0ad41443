//! Kernel contract for the flowgate HTTP gateway.
//!
//! This crate defines the *trait interfaces and declarative data types* of the
//! gateway core.  No runtime lives here — the pipeline executor, the dynamic
//! mux, and the HTTP server belong in `flowgate-gateway`.
//!
//! # Architecture mapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              flowgate-kernel  (this crate)                  │
//! │  Filter trait + FilterRegistry    PipelineSpec + validate() │
//! │  HttpContext / PipelineContext    HttpTemplate              │
//! │  ApiRegistry + change channel     PipelineError             │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │  depends on
//! ┌──────────────────────────▼──────────────────────────────────┐
//! │              flowgate-gateway  (runtime crate)              │
//! │  Pipeline  (filter-chain executor, generation transfer)     │
//! │  DynamicMux  (atomically swapped routing table)             │
//! │  PipelineController + admin API  (spec lifecycle)           │
//! │  GatewayServer  (axum HTTP server)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use flowgate_kernel::{FilterRegistry, PipelineSpec};
//!
//! let registry = FilterRegistry::new();
//! let spec = PipelineSpec::from_yaml(
//!     "name: demo\nfilters:\n  - name: hello\n    kind: Mock\n",
//! )
//! .expect("spec parses");
//!
//! // Validation needs the Mock kind registered; see flowgate-gateway.
//! assert!(spec.validate(&registry).is_err());
//! ```

pub mod api;
pub mod context;
pub mod error;
pub mod filter;
pub mod services;
pub mod spec;
pub mod template;

// ── Flat re-exports ────────────────────────────────────────────────────────

pub use api::{ApiEntry, ApiGroup, ApiHandler, ApiRegistry, HttpMethod, API_PREFIX};
pub use context::{
    FilterStat, HandlerCaller, HttpContext, HttpRequest, HttpResponse, PipelineContext,
};
pub use error::{PipelineError, TemplateError};
pub use filter::{Filter, FilterRegistry};
pub use services::Services;
pub use spec::{FilterSpec, FlowNode, PipelineSpec, LABEL_END};
pub use template::HttpTemplate;
