//! Filter capability contract and the process-wide kind registry.
//!
//! A *filter* is a pluggable unit that consumes the request context and
//! returns a result token — the empty string for "success, continue", or one
//! of its declared [`results`](Filter::results) for conditional jumps.  A
//! registered *prototype* is distinct from live instances: the pipeline asks
//! the prototype to [`create`](Filter::create) a fresh instance per
//! generation and then initializes it, either from scratch or by inheriting
//! the same-named instance of the previous generation.

use crate::context::HttpContext;
use crate::error::PipelineError;
use crate::services::Services;
use crate::spec::FilterSpec;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Filter trait
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel contract for a single pipeline filter.
///
/// Implementations must be `Send + Sync`: one instance serves concurrent
/// requests, so mutable runtime state uses interior mutability.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    /// Kind identifier, unique per process.
    fn kind(&self) -> &'static str;

    /// Default configuration body for this kind, served by the admin API so
    /// operators can discover the expected shape.
    fn default_spec(&self) -> serde_yaml::Value {
        serde_yaml::Value::Null
    }

    /// Create a fresh, uninitialized instance of this kind.
    ///
    /// Called on the registered prototype once per generation and filter
    /// slot; the instance is then handed to [`init`](Filter::init) or
    /// [`inherit`](Filter::inherit).
    fn create(&self) -> Box<dyn Filter>;

    /// Initialize a fresh instance from its spec.
    fn init(&mut self, spec: &FilterSpec, services: &Services) -> Result<(), PipelineError>;

    /// Take over from `previous`, the same-named live instance of the
    /// previous generation.
    ///
    /// The implementation owns the handoff: it keeps whatever state it wants
    /// to preserve (shared interior state stays valid for the previous
    /// generation's in-flight requests) and must [`close`](Filter::close)
    /// `previous` if it keeps nothing.  The generation boundary itself never
    /// closes superseded instances.
    fn inherit(
        &mut self,
        spec: &FilterSpec,
        previous: Arc<dyn Filter>,
        services: &Services,
    ) -> Result<(), PipelineError> {
        previous.close();
        self.init(spec, services)
    }

    /// Process one request.
    ///
    /// Must return the empty string or a token from
    /// [`results`](Filter::results); anything else is a logged bug the
    /// driver treats as an unhandled result.  May block internally — the
    /// driver measures wall-clock duration around the call.
    async fn handle(&self, ctx: &mut HttpContext) -> String;

    /// The fixed set of non-empty result tokens this filter may emit.
    fn results(&self) -> &[&'static str] {
        &[]
    }

    /// Opaque runtime status, aggregated into the pipeline status output.
    fn status(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Release held resources.  Called when the filter's slot is not carried
    /// into the next generation, or when its pipeline is removed.
    fn close(&self) {}

    /// Downcast support for [`inherit`](Filter::inherit) implementations
    /// that reach into the previous instance's concrete state.
    fn as_any(&self) -> &dyn Any;
}

// ─────────────────────────────────────────────────────────────────────────────
// FilterRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide mapping from filter kind to registered prototype.
///
/// Built mutably during startup, then sealed behind an `Arc` before serving
/// begins; reads afterwards are lock-free.  Kinds are never removed.
#[derive(Default)]
pub struct FilterRegistry {
    kinds: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype under its [`kind`](Filter::kind).
    pub fn register(&mut self, prototype: Arc<dyn Filter>) -> Result<(), PipelineError> {
        let kind = prototype.kind().to_string();
        if self.kinds.contains_key(&kind) {
            return Err(PipelineError::KindAlreadyRegistered(kind));
        }
        self.kinds.insert(kind, prototype);
        Ok(())
    }

    /// Look up a prototype by kind.
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Filter>> {
        self.kinds.get(kind)
    }

    /// All registered kind identifiers, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Seal the registry for the serving phase.
    pub fn seal(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
