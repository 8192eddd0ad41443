//! Filters shared by the integration tests.

use async_trait::async_trait;
use flowgate_kernel::{Filter, FilterSpec, HttpContext, PipelineError, Services};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts its invocations in state that survives `inherit`.
///
/// Each request gets the observed value in the `x-count` response header, so
/// tests can assert the exact sequence a caller saw across generations.
#[derive(Default)]
pub struct Counter {
    count: Arc<AtomicU64>,
}

#[async_trait]
impl Filter for Counter {
    fn kind(&self) -> &'static str {
        "Counter"
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(Counter::default())
    }

    fn init(&mut self, _spec: &FilterSpec, _services: &Services) -> Result<(), PipelineError> {
        self.count = Arc::new(AtomicU64::new(0));
        Ok(())
    }

    fn inherit(
        &mut self,
        _spec: &FilterSpec,
        previous: Arc<dyn Filter>,
        _services: &Services,
    ) -> Result<(), PipelineError> {
        match previous.as_any().downcast_ref::<Counter>() {
            Some(prev) => self.count = prev.count.clone(),
            None => previous.close(),
        }
        Ok(())
    }

    async fn handle(&self, ctx: &mut HttpContext) -> String {
        let observed = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.response_mut()
            .set_header("x-count", observed.to_string());
        String::new()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "count": self.count.load(Ordering::SeqCst) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
