//! Per-caller token-bucket rate-limit filter.
//!
//! Each unique caller (authenticated principal, forwarded IP, or a sentinel
//! for anonymous traffic) gets its own bucket.  Refill is continuous: on
//! each request the elapsed wall-clock time is converted to tokens, then one
//! token is consumed; an empty bucket rejects with `429 Too Many Requests`
//! and the `limited` result.
//!
//! The bucket table is shared behind an `Arc` and carried across generations
//! by `inherit`, so a hot reload does not reset anybody's budget.

use async_trait::async_trait;
use dashmap::DashMap;
use flowgate_kernel::{Filter, FilterSpec, HttpContext, PipelineError, Services};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Result emitted when the caller's bucket is empty.
pub const RESULT_LIMITED: &str = "limited";

fn default_rate() -> f64 {
    100.0
}

fn default_burst() -> f64 {
    200.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitConfig {
    /// Sustained token refill rate (tokens per second).
    #[serde(default = "default_rate")]
    rate_per_second: f64,
    /// Maximum bucket size (must be >= `rate_per_second`).
    #[serde(default = "default_burst")]
    burst_capacity: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate(),
            burst_capacity: default_burst(),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refill from elapsed time, then try to consume one token.
    fn try_consume(&mut self, rate_per_second: f64, burst_capacity: f64) -> bool {
        let now = Instant::now();
        let refill = now.duration_since(self.last_refill).as_secs_f64() * rate_per_second;
        self.tokens = (self.tokens + refill).min(burst_capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate-limit filter using a per-caller token bucket.
pub struct RateLimitFilter {
    config: RateLimitConfig,
    buckets: Arc<DashMap<String, Bucket>>,
}

impl Default for RateLimitFilter {
    fn default() -> Self {
        Self {
            config: RateLimitConfig::default(),
            buckets: Arc::new(DashMap::new()),
        }
    }
}

impl RateLimitFilter {
    fn caller_id(ctx: &HttpContext) -> String {
        // Prefer the authenticated principal; fall back to forwarded IP or a
        // sentinel for unauthenticated callers.
        ctx.header("x-auth-principal")
            .or_else(|| ctx.header("x-forwarded-for"))
            .or_else(|| ctx.header("x-real-ip"))
            .unwrap_or("anonymous")
            .to_string()
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn kind(&self) -> &'static str {
        "RateLimit"
    }

    fn default_spec(&self) -> serde_yaml::Value {
        serde_yaml::to_value(RateLimitConfig::default()).unwrap_or(serde_yaml::Value::Null)
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(RateLimitFilter::default())
    }

    fn init(&mut self, spec: &FilterSpec, _services: &Services) -> Result<(), PipelineError> {
        let config: RateLimitConfig = spec.decode()?;
        if config.burst_capacity < config.rate_per_second {
            return Err(PipelineError::SpecFieldInvalid(format!(
                "filter {}: burstCapacity must be >= ratePerSecond",
                spec.name()
            )));
        }
        self.config = config;
        self.buckets = Arc::new(DashMap::new());
        Ok(())
    }

    fn inherit(
        &mut self,
        spec: &FilterSpec,
        previous: Arc<dyn Filter>,
        services: &Services,
    ) -> Result<(), PipelineError> {
        self.init(spec, services)?;
        match previous.as_any().downcast_ref::<RateLimitFilter>() {
            // Keep the live bucket table; the previous generation's in-flight
            // requests share it until they finish.
            Some(prev) => self.buckets = prev.buckets.clone(),
            None => previous.close(),
        }
        Ok(())
    }

    async fn handle(&self, ctx: &mut HttpContext) -> String {
        let caller = Self::caller_id(ctx);
        let allowed = self
            .buckets
            .entry(caller.clone())
            .or_insert_with(|| Bucket::new(self.config.burst_capacity))
            .try_consume(self.config.rate_per_second, self.config.burst_capacity);

        if allowed {
            return String::new();
        }

        warn!(caller = %caller, "rate limit exceeded");
        let response = ctx.response_mut();
        response.status = 429;
        response.set_header("retry-after", "1");
        response.set_header("content-type", "application/json");
        response.body = serde_json::json!({ "error": "rate limit exceeded" })
            .to_string()
            .into_bytes();
        RESULT_LIMITED.to_string()
    }

    fn results(&self) -> &[&'static str] {
        &[RESULT_LIMITED]
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "callers": self.buckets.len() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
