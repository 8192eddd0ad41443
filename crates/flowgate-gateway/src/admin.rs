//! Administrative API endpoints.
//!
//! Registered as the `admin` API group (order 0) and dispatched through the
//! dynamic mux like any other handler, so the admin surface itself benefits
//! from the fixed middleware chain.  All paths are served under
//! [`API_PREFIX`](flowgate_kernel::API_PREFIX):
//!
//! ```text
//! GET    /pipelines                 - list configured pipeline names
//! POST   /pipelines                 - create a pipeline from a YAML spec
//! GET    /pipelines/{name}          - current spec as YAML
//! PUT    /pipelines/{name}          - replace the spec (hot reload)
//! DELETE /pipelines/{name}          - remove the pipeline
//! GET    /pipelines/{name}/status   - aggregated filter status
//! GET    /filter-kinds              - registered kinds with default specs
//! ```
//!
//! Spec rejections return the structured validation error (`filters: …` /
//! `flow: …`) in a JSON body; the running configuration is unchanged.

use crate::controller::PipelineController;
use crate::error::GatewayImplError;
use async_trait::async_trait;
use flowgate_kernel::{ApiEntry, ApiGroup, ApiHandler, ApiRegistry, HttpContext};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Weak};

/// Sort order of the admin group; before all traffic groups.
const ADMIN_GROUP_ORDER: i32 = 0;

/// Register the admin endpoints on the API registry.
pub fn register(controller: &Arc<PipelineController>, api: &ApiRegistry) {
    let entry = |method: &str, path: &str, handler: Arc<dyn ApiHandler>| {
        ApiEntry::new(method, path, handler)
    };
    let weak = || Arc::downgrade(controller);

    api.register_group(ApiGroup {
        group: "admin".to_string(),
        order: ADMIN_GROUP_ORDER,
        entries: vec![
            entry("GET", "/pipelines", Arc::new(ListPipelines(weak()))),
            entry("POST", "/pipelines", Arc::new(CreatePipeline(weak()))),
            entry("GET", "/pipelines/{name}", Arc::new(GetPipeline(weak()))),
            entry("PUT", "/pipelines/{name}", Arc::new(UpdatePipeline(weak()))),
            entry(
                "DELETE",
                "/pipelines/{name}",
                Arc::new(DeletePipeline(weak())),
            ),
            entry(
                "GET",
                "/pipelines/{name}/status",
                Arc::new(PipelineStatusApi(weak())),
            ),
            entry("GET", "/filter-kinds", Arc::new(ListFilterKinds(weak()))),
        ],
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Response helpers
// ─────────────────────────────────────────────────────────────────────────────

fn respond_json<T: Serialize>(ctx: &mut HttpContext, status: u16, value: &T) {
    let response = ctx.response_mut();
    response.status = status;
    response.set_header("content-type", "application/json");
    response.body = serde_json::to_vec(value).unwrap_or_default();
}

fn respond_yaml(ctx: &mut HttpContext, status: u16, body: String) {
    let response = ctx.response_mut();
    response.status = status;
    response.set_header("content-type", "application/yaml");
    response.body = body.into_bytes();
}

fn respond_error(ctx: &mut HttpContext, err: &GatewayImplError) {
    let status = match err {
        GatewayImplError::InvalidSpec(_) | GatewayImplError::SpecNameMismatch { .. } => 400,
        GatewayImplError::PipelineNotFound(_) => 404,
        GatewayImplError::PipelineExists(_) => 409,
        _ => 500,
    };
    respond_json(ctx, status, &json!({ "error": err.to_string() }));
}

/// Admin handlers hold the controller weakly; a request racing shutdown gets
/// a 503 instead of keeping the controller alive.
fn upgrade(
    ctx: &mut HttpContext,
    weak: &Weak<PipelineController>,
) -> Option<Arc<PipelineController>> {
    let controller = weak.upgrade();
    if controller.is_none() {
        respond_json(ctx, 503, &json!({ "error": "gateway is shutting down" }));
    }
    controller
}

fn name_param(ctx: &mut HttpContext) -> Option<String> {
    let name = ctx.param("name").map(str::to_string);
    if name.is_none() {
        respond_json(ctx, 400, &json!({ "error": "missing pipeline name" }));
    }
    name
}

fn body_yaml(ctx: &mut HttpContext) -> Option<String> {
    match String::from_utf8(ctx.request().body.clone()) {
        Ok(body) => Some(body),
        Err(_) => {
            respond_json(ctx, 400, &json!({ "error": "spec body is not valid UTF-8" }));
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /pipelines
struct ListPipelines(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for ListPipelines {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        respond_json(ctx, 200, &json!({ "pipelines": controller.list() }));
    }
}

/// POST /pipelines
struct CreatePipeline(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for CreatePipeline {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let Some(body) = body_yaml(ctx) else {
            return;
        };
        match controller.create(&body) {
            Ok(name) => respond_json(ctx, 201, &json!({ "name": name })),
            Err(err) => respond_error(ctx, &err),
        }
    }
}

/// GET /pipelines/{name}
struct GetPipeline(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for GetPipeline {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let Some(name) = name_param(ctx) else {
            return;
        };
        match controller.spec(&name) {
            Ok(spec) => match serde_yaml::to_string(&spec) {
                Ok(yaml) => respond_yaml(ctx, 200, yaml),
                Err(err) => {
                    respond_json(ctx, 500, &json!({ "error": err.to_string() }))
                }
            },
            Err(err) => respond_error(ctx, &err),
        }
    }
}

/// PUT /pipelines/{name}
struct UpdatePipeline(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for UpdatePipeline {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let Some(name) = name_param(ctx) else {
            return;
        };
        let Some(body) = body_yaml(ctx) else {
            return;
        };
        match controller.update(&name, &body) {
            Ok(()) => respond_json(ctx, 200, &json!({ "name": name })),
            Err(err) => respond_error(ctx, &err),
        }
    }
}

/// DELETE /pipelines/{name}
struct DeletePipeline(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for DeletePipeline {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let Some(name) = name_param(ctx) else {
            return;
        };
        match controller.delete(&name) {
            Ok(()) => ctx.response_mut().status = 204,
            Err(err) => respond_error(ctx, &err),
        }
    }
}

/// GET /pipelines/{name}/status
struct PipelineStatusApi(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for PipelineStatusApi {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let Some(name) = name_param(ctx) else {
            return;
        };
        match controller.status(&name) {
            Ok(status) => respond_json(ctx, 200, &status),
            Err(err) => respond_error(ctx, &err),
        }
    }
}

/// GET /filter-kinds
struct ListFilterKinds(Weak<PipelineController>);

#[async_trait]
impl ApiHandler for ListFilterKinds {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = upgrade(ctx, &self.0) else {
            return;
        };
        let registry = controller.filter_registry();
        let kinds: Vec<serde_json::Value> = registry
            .kinds()
            .into_iter()
            .filter_map(|kind| registry.get(kind))
            .map(|prototype| {
                json!({
                    "kind": prototype.kind(),
                    "results": prototype.results(),
                    "defaultSpec": prototype.default_spec(),
                })
            })
            .collect();
        respond_json(ctx, 200, &json!({ "kinds": kinds }));
    }
}
