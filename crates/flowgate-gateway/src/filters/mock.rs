//! Canned-response filter.
//!
//! Writes a configured status, headers, and body into the response and
//! succeeds.  The body may reference earlier filters' snapshots through the
//! HTTP template (`[[filter.<name>.req.…]]`); rendering failures are logged
//! and the raw body is served instead.

use async_trait::async_trait;
use flowgate_kernel::{Filter, FilterSpec, HttpContext, PipelineError, Services};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

fn default_code() -> u16 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockConfig {
    /// Response status code.
    #[serde(default = "default_code")]
    code: u16,
    /// Response body; may contain template references.
    #[serde(default)]
    body: String,
    /// Extra response headers.
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            code: default_code(),
            body: String::new(),
            headers: HashMap::new(),
        }
    }
}

/// Filter answering every request with a configured response.
#[derive(Default)]
pub struct MockFilter {
    config: MockConfig,
    served: Arc<AtomicU64>,
}

#[async_trait]
impl Filter for MockFilter {
    fn kind(&self) -> &'static str {
        "Mock"
    }

    fn default_spec(&self) -> serde_yaml::Value {
        serde_yaml::to_value(MockConfig::default()).unwrap_or(serde_yaml::Value::Null)
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(MockFilter::default())
    }

    fn init(&mut self, spec: &FilterSpec, _services: &Services) -> Result<(), PipelineError> {
        self.config = spec.decode()?;
        self.served = Arc::new(AtomicU64::new(0));
        Ok(())
    }

    fn inherit(
        &mut self,
        spec: &FilterSpec,
        previous: Arc<dyn Filter>,
        services: &Services,
    ) -> Result<(), PipelineError> {
        self.init(spec, services)?;
        match previous.as_any().downcast_ref::<MockFilter>() {
            // Carry the served counter across the generation boundary.
            Some(prev) => self.served = prev.served.clone(),
            None => previous.close(),
        }
        Ok(())
    }

    async fn handle(&self, ctx: &mut HttpContext) -> String {
        let body = match ctx.render(&self.config.body) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(%err, "rendering mock body failed, serving it unrendered");
                self.config.body.clone()
            }
        };

        let response = ctx.response_mut();
        response.status = self.config.code;
        for (name, value) in &self.config.headers {
            response.set_header(name.clone(), value.clone());
        }
        response.body = body.into_bytes();

        self.served.fetch_add(1, Ordering::Relaxed);
        String::new()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "served": self.served.load(Ordering::Relaxed) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_kernel::{HttpMethod, HttpRequest};

    fn spec(yaml: &str) -> FilterSpec {
        FilterSpec::new(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn serves_the_configured_response() {
        let mut f = MockFilter::default();
        f.init(
            &spec("name: m\nkind: Mock\ncode: 418\nbody: teapot\nheaders: { x-mock: 'yes' }\n"),
            &Services::default(),
        )
        .unwrap();

        let mut ctx = HttpContext::new(HttpRequest::new(HttpMethod::Get, "/x"));
        assert_eq!(f.handle(&mut ctx).await, "");
        assert_eq!(ctx.response().status, 418);
        assert_eq!(ctx.response().body, b"teapot");
        assert_eq!(ctx.response().headers.get("x-mock").unwrap(), "yes");
    }

    #[tokio::test]
    async fn served_counter_survives_inherit() {
        let services = Services::default();
        let filter_spec = spec("name: m\nkind: Mock\nbody: hi\n");

        let mut first = MockFilter::default();
        first.init(&filter_spec, &services).unwrap();
        let first: Arc<dyn Filter> = Arc::new(first);

        let mut ctx = HttpContext::new(HttpRequest::new(HttpMethod::Get, "/x"));
        first.handle(&mut ctx).await;
        first.handle(&mut ctx).await;

        let mut next = MockFilter::default();
        next.inherit(&filter_spec, first, &services).unwrap();
        next.handle(&mut ctx).await;

        assert_eq!(next.status(), serde_json::json!({ "served": 3 }));
    }
}
