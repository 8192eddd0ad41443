//! Process-wide collaborators handed to filters and pipelines.

use crate::api::ApiRegistry;
use std::sync::Arc;

/// Shared services passed to [`Filter::init`](crate::Filter::init) and
/// [`Filter::inherit`](crate::Filter::inherit).
///
/// Built once during startup and cloned freely; everything inside is an
/// `Arc`.  Filters that expose their own admin endpoints register them on
/// the API registry through this handle.
#[derive(Clone)]
pub struct Services {
    api: Arc<ApiRegistry>,
}

impl Services {
    /// Create the services handle around the process's API registry.
    pub fn new(api: Arc<ApiRegistry>) -> Self {
        Self { api }
    }

    /// The process-wide API registry.
    pub fn api(&self) -> &Arc<ApiRegistry> {
        &self.api
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(Arc::new(ApiRegistry::new()))
    }
}
