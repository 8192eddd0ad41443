//! API registry: the declarative routing surface consumed by the dynamic mux.
//!
//! Handlers are registered in named [`ApiGroup`]s.  Groups carry an `order`;
//! the mux sorts groups by ascending order (stable for ties, so registration
//! order breaks them) and registers every entry under
//! [`API_PREFIX`]` + entry.path`.
//!
//! The registry is mutable for the life of the process and guarded by a
//! single mutex.  Every mutation bumps a monotonically increasing
//! configuration version and signals the change channel; the mux's driver
//! task rebuilds the routing table on each signal.

use crate::context::HttpContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Path prefix prepended to every registered entry.
pub const API_PREFIX: &str = "/apis/v1";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP method
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP method, covering every verb an API entry may declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HttpMethod {
    Get,
    Head,
    Put,
    Post,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl HttpMethod {
    /// Case-insensitive parse from a string slice.
    ///
    /// Returns `None` for anything outside the nine supported verbs; the mux
    /// treats that as a registration bug and drops the entry.
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "PUT" => Some(HttpMethod::Put),
            "POST" => Some(HttpMethod::Post),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "CONNECT" => Some(HttpMethod::Connect),
            "OPTIONS" => Some(HttpMethod::Options),
            "TRACE" => Some(HttpMethod::Trace),
            _ => None,
        }
    }

    /// Return the standard uppercase string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers, entries, groups
// ─────────────────────────────────────────────────────────────────────────────

/// A registered request handler dispatched by the mux.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Process the request, writing the outcome into `ctx`'s response.
    async fn handle(&self, ctx: &mut HttpContext);
}

/// One routable endpoint: method + path + handler.
///
/// The method is kept as the declared string; it is parsed when the routing
/// table is built so that an unsupported verb degrades to a logged bug and a
/// skipped entry rather than a rejected group.
#[derive(Clone)]
pub struct ApiEntry {
    /// Path registered under [`API_PREFIX`].  Must begin with `/` and may
    /// contain `{param}` capture segments.
    pub path: String,
    /// Declared HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Handler invoked on a match.
    pub handler: Arc<dyn ApiHandler>,
}

impl ApiEntry {
    /// Create an entry.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        handler: Arc<dyn ApiHandler>,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            handler,
        }
    }
}

/// A named set of entries registered and unregistered as a unit.
#[derive(Clone)]
pub struct ApiGroup {
    /// Unique group name; re-registering a name replaces the group.
    pub group: String,
    /// Sort key: lower orders are matched first.
    pub order: i32,
    /// The group's endpoints.
    pub entries: Vec<ApiEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide table of [`ApiGroup`]s plus the change-notification channel.
///
/// Mutations hold the mutex briefly; the mux reload path takes a cloned
/// snapshot under the same mutex and builds the new routing table outside it.
/// Request dispatch never touches this registry.
pub struct ApiRegistry {
    groups: Mutex<Vec<ApiGroup>>,
    version: AtomicU64,
    change_tx: watch::Sender<u64>,
}

impl ApiRegistry {
    /// Create an empty registry at configuration version 0.
    pub fn new() -> Self {
        let (change_tx, _) = watch::channel(0);
        Self {
            groups: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
            change_tx,
        }
    }

    /// Register a group, replacing any existing group of the same name, and
    /// signal the change channel.
    pub fn register_group(&self, group: ApiGroup) {
        {
            let mut groups = self.groups.lock().unwrap();
            match groups.iter_mut().find(|g| g.group == group.group) {
                Some(existing) => *existing = group,
                None => groups.push(group),
            }
        }
        self.notify();
    }

    /// Remove a group by name and signal the change channel.  Removing an
    /// unknown name still bumps the version; the rebuild is a no-op.
    pub fn unregister_group(&self, name: &str) {
        {
            let mut groups = self.groups.lock().unwrap();
            groups.retain(|g| g.group != name);
        }
        self.notify();
    }

    /// Snapshot the registered groups sorted by ascending order.
    ///
    /// The sort is stable, so groups with equal orders keep their
    /// registration order.
    pub fn snapshot(&self) -> Vec<ApiGroup> {
        let mut groups = self.groups.lock().unwrap().clone();
        groups.sort_by_key(|g| g.order);
        groups
    }

    /// Current configuration version.  Starts at 0 and increases by one per
    /// mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Subscribe to change notifications.  The receiver observes the latest
    /// version; [`watch`] semantics coalesce bursts of changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    fn notify(&self) {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        // No receivers is fine: the mux may not be up yet.
        let _ = self.change_tx.send(version);
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl ApiHandler for NoopHandler {
        async fn handle(&self, _ctx: &mut HttpContext) {}
    }

    fn group(name: &str, order: i32) -> ApiGroup {
        ApiGroup {
            group: name.to_string(),
            order,
            entries: vec![ApiEntry::new("GET", "/x", Arc::new(NoopHandler))],
        }
    }

    #[test]
    fn method_parse_covers_all_nine_verbs() {
        for m in [
            "GET", "HEAD", "PUT", "POST", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
        ] {
            let parsed = HttpMethod::from_str_ci(m).unwrap();
            assert_eq!(parsed.as_str(), m);
        }
        assert!(HttpMethod::from_str_ci("BREW").is_none());
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(HttpMethod::from_str_ci("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_str_ci("Delete"), Some(HttpMethod::Delete));
    }

    #[test]
    fn snapshot_sorts_by_order_stably() {
        let registry = ApiRegistry::new();
        registry.register_group(group("b", 10));
        registry.register_group(group("a", 0));
        registry.register_group(group("c", 10)); // ties with "b", registered later

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|g| g.group)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn register_replaces_same_name_group() {
        let registry = ApiRegistry::new();
        registry.register_group(group("g", 1));
        registry.register_group(group("g", 2));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].order, 2);
    }

    #[test]
    fn every_mutation_bumps_the_version() {
        let registry = ApiRegistry::new();
        assert_eq!(registry.version(), 0);
        registry.register_group(group("g", 1));
        assert_eq!(registry.version(), 1);
        registry.unregister_group("g");
        assert_eq!(registry.version(), 2);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let registry = ApiRegistry::new();
        let mut rx = registry.subscribe();
        registry.register_group(group("g", 1));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
