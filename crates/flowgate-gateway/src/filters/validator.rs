//! Credential-validation filter.
//!
//! Accepts requests that carry a configured credential in either:
//! - `X-Api-Key: <key>` header
//! - `Authorization: Bearer <key>` header
//!
//! Anything else gets a `401 Unauthorized` response and the `invalid`
//! result, which flows typically jump to `END` or an error responder.

use async_trait::async_trait;
use flowgate_kernel::{Filter, FilterSpec, HttpContext, PipelineError, Services};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use tracing::warn;

/// Result emitted when no valid credential is presented.
pub const RESULT_INVALID: &str = "invalid";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorConfig {
    /// Accepted credentials.
    #[serde(default)]
    credentials: Vec<String>,
}

/// Filter enforcing credential validation.
#[derive(Default)]
pub struct ValidatorFilter {
    valid_keys: HashSet<String>,
}

impl ValidatorFilter {
    fn extract_key(ctx: &HttpContext) -> Option<String> {
        // Check `X-Api-Key` first (simpler, explicit).
        if let Some(key) = ctx.header("x-api-key") {
            return Some(key.to_string());
        }
        // Fall back to `Authorization: Bearer <key>`.
        if let Some(key) = ctx
            .header("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
        {
            return Some(key.to_string());
        }
        None
    }

    fn reject(ctx: &mut HttpContext, message: &str) -> String {
        let response = ctx.response_mut();
        response.status = 401;
        response.set_header("content-type", "application/json");
        response.body = serde_json::json!({ "error": message })
            .to_string()
            .into_bytes();
        RESULT_INVALID.to_string()
    }
}

#[async_trait]
impl Filter for ValidatorFilter {
    fn kind(&self) -> &'static str {
        "Validator"
    }

    fn default_spec(&self) -> serde_yaml::Value {
        serde_yaml::to_value(ValidatorConfig::default()).unwrap_or(serde_yaml::Value::Null)
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(ValidatorFilter::default())
    }

    fn init(&mut self, spec: &FilterSpec, _services: &Services) -> Result<(), PipelineError> {
        let config: ValidatorConfig = spec.decode()?;
        self.valid_keys = config.credentials.into_iter().collect();
        Ok(())
    }

    async fn handle(&self, ctx: &mut HttpContext) -> String {
        match Self::extract_key(ctx) {
            Some(key) if self.valid_keys.contains(&key) => {
                // Expose the principal to downstream filters and templates.
                ctx.request_mut()
                    .headers
                    .insert("x-auth-principal".to_string(), key);
                String::new()
            }
            Some(_) => {
                warn!(path = %ctx.request().path, "rejected request: invalid credential");
                Self::reject(ctx, "invalid credential")
            }
            None => {
                warn!(path = %ctx.request().path, "rejected request: missing credential");
                Self::reject(ctx, "missing credential")
            }
        }
    }

    fn results(&self) -> &[&'static str] {
        &[RESULT_INVALID]
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "credentials": self.valid_keys.len() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
