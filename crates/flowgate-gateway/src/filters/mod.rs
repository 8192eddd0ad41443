//! Built-in filter kinds.
//!
//! The pipeline engine treats filters as opaque [`Filter`] implementations;
//! these three ship with the gateway so a bare deployment can terminate
//! requests without external filter crates:
//!
//! - [`ValidatorFilter`] — credential validation, result `invalid`
//! - [`RateLimitFilter`] — per-caller token bucket, result `limited`
//! - [`MockFilter`] — template-rendered canned response

mod mock;
mod rate_limit;
mod validator;

pub use mock::MockFilter;
pub use rate_limit::RateLimitFilter;
pub use validator::ValidatorFilter;

use flowgate_kernel::{Filter, FilterRegistry, PipelineError};
use std::sync::Arc;

/// Register every built-in kind on `registry`.
pub fn register_builtin(registry: &mut FilterRegistry) -> Result<(), PipelineError> {
    registry.register(Arc::new(ValidatorFilter::default()) as Arc<dyn Filter>)?;
    registry.register(Arc::new(RateLimitFilter::default()) as Arc<dyn Filter>)?;
    registry.register(Arc::new(MockFilter::default()) as Arc<dyn Filter>)?;
    Ok(())
}
