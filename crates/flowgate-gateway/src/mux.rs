//! Dynamic mux: the atomically swapped routing table.
//!
//! [`MuxRouter`] is an immutable method+path table built from a snapshot of
//! the API registry.  [`DynamicMux`] keeps the current router in an
//! [`ArcSwap`] cell and runs a driver task that rebuilds and swaps it on
//! every change-channel signal.  Dispatch loads the cell once and never takes
//! a lock, so a request observes either the old table or the new table in its
//! entirety — never a partially built one — and a swapped-out table stays
//! alive until its last in-flight request drops the `Arc`.

use arc_swap::ArcSwap;
use flowgate_kernel::{ApiGroup, ApiHandler, ApiRegistry, HttpContext, HttpMethod, API_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

// ─────────────────────────────────────────────────────────────────────────────
// MuxRouter
// ─────────────────────────────────────────────────────────────────────────────

struct MuxRoute {
    method: HttpMethod,
    path: String,
    handler: Arc<dyn ApiHandler>,
}

/// One immutable generation of the routing table.
///
/// Resolution is a linear scan in group order with a path-template matcher
/// supporting `{param}` capture segments.  Route tables are small; the scan
/// is O(routes × depth) and trivially correct to verify.
pub struct MuxRouter {
    routes: Vec<MuxRoute>,
    version: u64,
}

impl MuxRouter {
    /// The router published before the first reload: matches nothing.
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            version: 0,
        }
    }

    /// Build a table from registry groups already sorted by order.
    ///
    /// An entry whose declared method is not one of the nine supported verbs
    /// is a registration bug: it is logged and dropped, and the rest of its
    /// group still registers.
    pub fn build(groups: &[ApiGroup], version: u64) -> Self {
        let mut routes = Vec::new();
        for group in groups {
            for entry in &group.entries {
                let Some(method) = HttpMethod::from_str_ci(&entry.method) else {
                    error!(
                        group = %group.group,
                        method = %entry.method,
                        path = %entry.path,
                        "BUG: unsupported method in api entry"
                    );
                    continue;
                };
                routes.push(MuxRoute {
                    method,
                    path: format!("{API_PREFIX}{}", entry.path),
                    handler: entry.handler.clone(),
                });
            }
        }
        Self { routes, version }
    }

    /// Configuration version this table was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `(method, path)` to a handler plus captured path parameters.
    pub fn resolve(
        &self,
        method: &HttpMethod,
        path: &str,
    ) -> Option<(Arc<dyn ApiHandler>, HashMap<String, String>)> {
        for route in &self.routes {
            if route.method != *method {
                continue;
            }
            if let Some(params) = match_path(&route.path, path) {
                return Some((route.handler.clone(), params));
            }
        }
        None
    }
}

/// Match a concrete path against a template such as `/pipelines/{name}`.
///
/// Returns `Some(params)` when the template matches, mapping capture names to
/// their extracted values.  Returns `None` on mismatch.
fn match_path(template: &str, path: &str) -> Option<HashMap<String, String>> {
    let t_parts: Vec<&str> = template.trim_matches('/').split('/').collect();
    let p_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if t_parts.len() != p_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (t, p) in t_parts.iter().zip(p_parts.iter()) {
        if t.starts_with('{') && t.ends_with('}') {
            let name = &t[1..t.len() - 1];
            params.insert(name.to_string(), p.to_string());
        } else if *t != *p {
            return None;
        }
    }
    Some(params)
}

// ─────────────────────────────────────────────────────────────────────────────
// DynamicMux
// ─────────────────────────────────────────────────────────────────────────────

/// Holds the current [`MuxRouter`] and keeps it in sync with the API
/// registry.
///
/// Construction publishes an empty router and spawns the driver task; the
/// driver rebuilds the table on every registry change (including changes made
/// before it started) until [`close`](DynamicMux::close) is signalled or the
/// registry's change channel is dropped.
pub struct DynamicMux {
    registry: Arc<ApiRegistry>,
    router: ArcSwap<MuxRouter>,
    shutdown: Notify,
}

impl DynamicMux {
    /// Create the mux and spawn its driver task.
    pub fn new(registry: Arc<ApiRegistry>) -> Arc<Self> {
        let mux = Arc::new(Self {
            registry,
            router: ArcSwap::from_pointee(MuxRouter::empty()),
            shutdown: Notify::new(),
        });

        let driver = mux.clone();
        tokio::spawn(async move { driver.run().await });

        mux
    }

    async fn run(self: Arc<Self>) {
        let mut changes = self.registry.subscribe();
        // Groups registered before the driver subscribed must still produce a
        // table; mark the current value unseen so the first iteration
        // rebuilds immediately.
        changes.mark_changed();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        // Registry gone; nothing further to sync.
                        break;
                    }
                    self.reload();
                }
            }
        }
        debug!("mux driver stopped");
    }

    fn reload(&self) {
        let groups = self.registry.snapshot();
        let version = self.registry.version();
        let router = MuxRouter::build(&groups, version);
        info!(
            routes = router.len(),
            version, "routing table rebuilt"
        );
        self.router.store(Arc::new(router));
    }

    /// The current routing table.
    pub fn router(&self) -> Arc<MuxRouter> {
        self.router.load_full()
    }

    /// Dispatch one request against the current table.
    ///
    /// Unmatched requests get a JSON 404.
    pub async fn serve(&self, ctx: &mut HttpContext) {
        let router = self.router.load_full();
        let method = ctx.request().method.clone();
        let path = ctx.request().path.clone();

        match router.resolve(&method, &path) {
            Some((handler, params)) => {
                ctx.set_params(params);
                handler.handle(ctx).await;
            }
            None => {
                let response = ctx.response_mut();
                response.status = 404;
                response.set_header("content-type", "application/json");
                response.body = br#"{"error":"not found"}"#.to_vec();
            }
        }
    }

    /// Stop the driver task.  The current router keeps serving whatever the
    /// surrounding server still dispatches; no further reloads happen.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowgate_kernel::{ApiEntry, HttpRequest};
    use std::time::Duration;

    struct Tag(&'static str);

    #[async_trait]
    impl ApiHandler for Tag {
        async fn handle(&self, ctx: &mut HttpContext) {
            ctx.response_mut().body = self.0.as_bytes().to_vec();
        }
    }

    fn group(name: &str, order: i32, entries: Vec<ApiEntry>) -> ApiGroup {
        ApiGroup {
            group: name.to_string(),
            order,
            entries,
        }
    }

    fn get(path: &str) -> HttpContext {
        HttpContext::new(HttpRequest::new(
            HttpMethod::Get,
            format!("{API_PREFIX}{path}"),
        ))
    }

    // ── MuxRouter ─────────────────────────────────────────────────────────────

    #[test]
    fn exact_path_matches() {
        let router = MuxRouter::build(
            &[group(
                "g",
                0,
                vec![ApiEntry::new("GET", "/health", Arc::new(Tag("ok")))],
            )],
            1,
        );
        let (_, params) = router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/health"))
            .unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn param_path_extracts_value() {
        let router = MuxRouter::build(
            &[group(
                "g",
                0,
                vec![ApiEntry::new(
                    "GET",
                    "/pipelines/{name}",
                    Arc::new(Tag("p")),
                )],
            )],
            1,
        );
        let (_, params) = router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/pipelines/demo"))
            .unwrap();
        assert_eq!(params.get("name").unwrap(), "demo");
    }

    #[test]
    fn method_mismatch_does_not_match() {
        let router = MuxRouter::build(
            &[group(
                "g",
                0,
                vec![ApiEntry::new("POST", "/x", Arc::new(Tag("x")))],
            )],
            1,
        );
        assert!(router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/x"))
            .is_none());
        assert!(router
            .resolve(&HttpMethod::Post, &format!("{API_PREFIX}/x"))
            .is_some());
    }

    #[test]
    fn unsupported_method_entry_is_dropped_but_group_registers() {
        let router = MuxRouter::build(
            &[group(
                "g",
                0,
                vec![
                    ApiEntry::new("BREW", "/teapot", Arc::new(Tag("nope"))),
                    ApiEntry::new("GET", "/ok", Arc::new(Tag("ok"))),
                ],
            )],
            1,
        );
        assert_eq!(router.len(), 1);
        assert!(router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/ok"))
            .is_some());
    }

    #[tokio::test]
    async fn earlier_group_wins_on_overlap() {
        let router = MuxRouter::build(
            &[
                group(
                    "first",
                    0,
                    vec![ApiEntry::new("GET", "/x", Arc::new(Tag("first")))],
                ),
                group(
                    "second",
                    10,
                    vec![ApiEntry::new("GET", "/x", Arc::new(Tag("second")))],
                ),
            ],
            1,
        );
        let (handler, _) = router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/x"))
            .unwrap();

        let mut ctx = get("/x");
        handler.handle(&mut ctx).await;
        assert_eq!(ctx.response().body, b"first");
    }

    #[test]
    fn empty_router_matches_nothing() {
        let router = MuxRouter::empty();
        assert!(router.is_empty());
        assert!(router
            .resolve(&HttpMethod::Get, &format!("{API_PREFIX}/anything"))
            .is_none());
    }

    // ── DynamicMux ────────────────────────────────────────────────────────────

    async fn wait_for_version(mux: &DynamicMux, version: u64) {
        for _ in 0..100 {
            if mux.router().version() >= version {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mux never reached version {version}");
    }

    #[tokio::test]
    async fn driver_picks_up_groups_registered_before_start() {
        let registry = Arc::new(ApiRegistry::new());
        registry.register_group(group(
            "g",
            0,
            vec![ApiEntry::new("GET", "/pre", Arc::new(Tag("pre")))],
        ));

        let mux = DynamicMux::new(registry.clone());
        wait_for_version(&mux, 1).await;

        let mut ctx = get("/pre");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().status, 200);
        assert_eq!(ctx.response().body, b"pre");
    }

    #[tokio::test]
    async fn change_event_swaps_the_table() {
        let registry = Arc::new(ApiRegistry::new());
        let mux = DynamicMux::new(registry.clone());

        registry.register_group(group(
            "g",
            0,
            vec![ApiEntry::new("GET", "/a", Arc::new(Tag("a")))],
        ));
        wait_for_version(&mux, 1).await;

        let mut ctx = get("/a");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().body, b"a");

        registry.register_group(group(
            "g",
            0,
            vec![ApiEntry::new("GET", "/b", Arc::new(Tag("b")))],
        ));
        wait_for_version(&mux, 2).await;

        let mut ctx = get("/a");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().status, 404);

        let mut ctx = get("/b");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().body, b"b");
    }

    #[tokio::test]
    async fn unmatched_request_gets_a_json_404() {
        let registry = Arc::new(ApiRegistry::new());
        let mux = DynamicMux::new(registry);

        let mut ctx = get("/ghost");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().status, 404);
        assert_eq!(
            ctx.response().headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn closed_mux_stops_reloading() {
        let registry = Arc::new(ApiRegistry::new());
        let mux = DynamicMux::new(registry.clone());

        registry.register_group(group(
            "g",
            0,
            vec![ApiEntry::new("GET", "/a", Arc::new(Tag("a")))],
        ));
        wait_for_version(&mux, 1).await;

        mux.close();
        // Give the driver time to observe shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;

        registry.register_group(group(
            "g",
            0,
            vec![ApiEntry::new("GET", "/b", Arc::new(Tag("b")))],
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The table still serves the pre-close generation.
        let mut ctx = get("/a");
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.response().body, b"a");
    }
}
