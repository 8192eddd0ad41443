//! Request context types shared between the mux, the pipeline driver, and
//! filters.
//!
//! [`HttpContext`] is the single mutable value that flows through a request:
//! the inbound request, the response under construction, path parameters, the
//! pipeline's template dictionary, the handler-caller slot for recursive
//! filter invocation, and the per-request [`PipelineContext`] stats slot.
//!
//! All fields use owned, allocation-friendly types so the context can cross
//! async task boundaries without lifetime complications.

use crate::api::HttpMethod;
use crate::error::TemplateError;
use crate::template::HttpTemplate;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// An inbound request as seen by the gateway core.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path, e.g. `/apis/v1/pipelines`.
    pub path: String,
    /// HTTP headers (header names are lowercased).
    pub headers: HashMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Construct a minimal request.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Builder helper: attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Builder helper: set the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// The response under construction for one request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

impl HttpResponse {
    /// Set a header, lowercasing the name.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into().to_lowercase(), value.into());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter stats
// ─────────────────────────────────────────────────────────────────────────────

/// Execution record of one filter invocation.
///
/// Appended to the [`PipelineContext`] *before* the filter runs so that the
/// stat list stays in execution-start order even when filters invoke each
/// other recursively; result and duration are filled in on return.
#[derive(Debug, Clone)]
pub struct FilterStat {
    pub name: String,
    pub kind: String,
    /// Result token; empty means "success, continue".
    pub result: String,
    pub duration: Duration,
}

impl FilterStat {
    /// Record that `name` (of `kind`) is about to run.
    pub fn started(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            result: String::new(),
            duration: Duration::ZERO,
        }
    }

    fn summary(&self) -> String {
        format!("{}({},{:?})", self.name, self.result, self.duration)
    }
}

/// Per-request record of the filters a pipeline executed.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// Append-only, ordered by execution start time.
    pub filter_stats: Vec<FilterStat>,
}

impl PipelineContext {
    /// Human-readable execution trace: `name(result,duration)->…`, or
    /// `<empty>` when no filter ran.
    pub fn summary(&self) -> String {
        if self.filter_stats.is_empty() {
            return "<empty>".to_string();
        }
        self.filter_stats
            .iter()
            .map(FilterStat::summary)
            .collect::<Vec<_>>()
            .join("->")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler caller
// ─────────────────────────────────────────────────────────────────────────────

/// The pipeline driver's re-entrant step function, exposed on the request
/// context so filters can invoke the rest of the chain themselves (retries,
/// wrapping, …).
///
/// `last_result` is the token the previous filter returned; the empty string
/// advances to the next filter.  Returns the token the invoked tail of the
/// chain completed with (empty on normal completion).
#[async_trait]
pub trait HandlerCaller: Send + Sync {
    async fn call(&self, ctx: &mut HttpContext, last_result: &str) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpContext
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable context of one in-flight request.
pub struct HttpContext {
    request: HttpRequest,
    response: HttpResponse,
    params: HashMap<String, String>,
    tags: Vec<String>,
    template: Option<Arc<HttpTemplate>>,
    dict: HashMap<String, Value>,
    handler_caller: Option<Arc<dyn HandlerCaller>>,
    pipeline: Option<PipelineContext>,
}

impl HttpContext {
    /// Create a fresh context from an inbound request.
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: HttpResponse::default(),
            params: HashMap::new(),
            tags: Vec::new(),
            template: None,
            dict: HashMap::new(),
            handler_caller: None,
            pipeline: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Replace the path parameters captured by the router.
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// A path parameter captured by the router, e.g. `name` for
    /// `/pipelines/{name}`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Append a diagnostic tag, surfaced in the access log.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    // ── Template ────────────────────────────────────────────────────────────

    /// Attach the pipeline's template.  Clears any snapshots from a previous
    /// template.
    pub fn set_template(&mut self, template: Arc<HttpTemplate>) {
        self.template = Some(template);
        self.dict.clear();
    }

    /// Snapshot of the template dictionary.
    pub fn template_dict(&self) -> HashMap<String, Value> {
        self.dict.clone()
    }

    /// Record the current request as filter `name`'s pre-call snapshot.
    /// A context without a template accepts the call and records nothing.
    pub fn save_req_to_template(&mut self, name: &str) -> Result<(), TemplateError> {
        match self.template.clone() {
            Some(template) => template.save_request(name, &self.request, &mut self.dict),
            None => Ok(()),
        }
    }

    /// Record the current response as filter `name`'s post-call snapshot.
    pub fn save_rsp_to_template(&mut self, name: &str) -> Result<(), TemplateError> {
        match self.template.clone() {
            Some(template) => template.save_response(name, &self.response, &mut self.dict),
            None => Ok(()),
        }
    }

    /// Substitute template references in `text` against the recorded
    /// snapshots.  Without a template the text passes through unchanged.
    pub fn render(&self, text: &str) -> Result<String, TemplateError> {
        match &self.template {
            Some(template) => template.render(text, &self.dict),
            None => Ok(text.to_string()),
        }
    }

    // ── Handler caller ──────────────────────────────────────────────────────

    /// Install the pipeline driver's step function for this request.
    pub fn set_handler_caller(&mut self, caller: Arc<dyn HandlerCaller>) {
        self.handler_caller = Some(caller);
    }

    /// The installed step function, if a pipeline is driving this request.
    pub fn handler_caller(&self) -> Option<Arc<dyn HandlerCaller>> {
        self.handler_caller.clone()
    }

    // ── Pipeline stats slot ─────────────────────────────────────────────────

    /// Start a fresh stats record for a pipeline run.
    pub fn begin_pipeline(&mut self) {
        self.pipeline = Some(PipelineContext::default());
    }

    /// The stats of the pipeline run driving this request, if any.
    pub fn pipeline(&self) -> Option<&PipelineContext> {
        self.pipeline.as_ref()
    }

    /// Mutable access to the stats record, creating it on first use.
    pub fn pipeline_mut(&mut self) -> &mut PipelineContext {
        self.pipeline.get_or_insert_with(PipelineContext::default)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = HttpRequest::new(HttpMethod::Get, "/x").with_header("X-User", "alice");
        let ctx = HttpContext::new(request);
        assert_eq!(ctx.header("x-user"), Some("alice"));
        assert_eq!(ctx.header("X-USER"), Some("alice"));
        assert_eq!(ctx.header("missing"), None);
    }

    #[test]
    fn empty_stats_summary_is_the_empty_marker() {
        assert_eq!(PipelineContext::default().summary(), "<empty>");
    }

    #[test]
    fn stats_summary_joins_in_execution_order() {
        let mut pc = PipelineContext::default();

        let mut a = FilterStat::started("a", "Mock");
        a.result = "fail".to_string();
        a.duration = Duration::from_millis(10);
        pc.filter_stats.push(a);

        let mut b = FilterStat::started("b", "Mock");
        b.duration = Duration::from_millis(5);
        pc.filter_stats.push(b);

        assert_eq!(pc.summary(), "a(fail,10ms)->b(,5ms)");
    }

    #[test]
    fn save_without_template_is_a_no_op() {
        let mut ctx = HttpContext::new(HttpRequest::new(HttpMethod::Get, "/x"));
        assert!(ctx.save_req_to_template("a").is_ok());
        assert!(ctx.template_dict().is_empty());
    }

    #[test]
    fn render_without_template_passes_through() {
        let ctx = HttpContext::new(HttpRequest::new(HttpMethod::Get, "/x"));
        assert_eq!(ctx.render("as-is").unwrap(), "as-is");
    }

    #[test]
    fn begin_pipeline_resets_the_stats_slot() {
        let mut ctx = HttpContext::new(HttpRequest::new(HttpMethod::Get, "/x"));
        ctx.pipeline_mut()
            .filter_stats
            .push(FilterStat::started("a", "Mock"));
        ctx.begin_pipeline();
        assert!(ctx.pipeline().unwrap().filter_stats.is_empty());
    }
}
