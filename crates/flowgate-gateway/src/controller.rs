//! Pipeline lifecycle controller.
//!
//! Owns the name → [`Pipeline`] table and applies administrative updates:
//! create validates and builds generation one, update validates and builds
//! the next generation via [`Pipeline::inherit`], delete closes the pipeline
//! outright.  All three are serialized by one coarse mutex; request dispatch
//! only reads the table.
//!
//! Each pipeline is also registered as an API group (its *traffic entry*), so
//! the dynamic mux starts routing to a pipeline on the reload following its
//! creation.  Traffic handlers resolve the pipeline by name per request:
//! a reload takes effect at the next request boundary, while requests already
//! inside a generation keep their `Arc` until they finish.

use crate::error::{GatewayImplError, GatewayResult};
use crate::pipeline::{Pipeline, PipelineStatus};
use async_trait::async_trait;
use flowgate_kernel::{
    ApiEntry, ApiGroup, ApiHandler, FilterRegistry, HttpContext, PipelineSpec, Services,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::info;

/// Sort order of per-pipeline traffic groups; after the admin group.
const TRAFFIC_GROUP_ORDER: i32 = 100;

/// Traffic methods used when a spec declares none.
const DEFAULT_TRAFFIC_METHODS: &[&str] = &["GET", "POST"];

fn traffic_group_name(pipeline: &str) -> String {
    format!("pipeline/{pipeline}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Administrative owner of all configured pipelines.
pub struct PipelineController {
    registry: Arc<FilterRegistry>,
    services: Services,
    pipelines: Mutex<HashMap<String, Arc<Pipeline>>>,
    /// Handed to traffic handlers, which must not keep the controller alive.
    self_weak: Weak<PipelineController>,
}

impl PipelineController {
    /// Create a controller over a sealed filter registry.
    pub fn new(registry: Arc<FilterRegistry>, services: Services) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            registry,
            services,
            pipelines: Mutex::new(HashMap::new()),
            self_weak: self_weak.clone(),
        })
    }

    /// The registered filter kinds, for the admin API.
    pub fn filter_registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    /// Validate `raw` and create generation one of a new pipeline.
    ///
    /// Returns the pipeline name.  The current set of pipelines is unchanged
    /// on any error.
    pub fn create(&self, raw: &str) -> GatewayResult<String> {
        let spec = PipelineSpec::from_yaml(raw)?;
        spec.validate(&self.registry)?;

        let mut pipelines = self.pipelines.lock().unwrap();
        if pipelines.contains_key(&spec.name) {
            return Err(GatewayImplError::PipelineExists(spec.name));
        }

        let name = spec.name.clone();
        let pipeline = Arc::new(Pipeline::init(spec, &self.registry, &self.services)?);
        self.register_traffic(&pipeline);
        pipelines.insert(name.clone(), pipeline);

        info!(pipeline = %name, "pipeline created");
        Ok(name)
    }

    /// Validate `raw` and replace pipeline `name` with its next generation.
    ///
    /// Same-named filter instances are inherited; the superseded generation
    /// keeps serving its in-flight requests and is dropped when they finish.
    pub fn update(&self, name: &str, raw: &str) -> GatewayResult<()> {
        let spec = PipelineSpec::from_yaml(raw)?;
        if spec.name != name {
            return Err(GatewayImplError::SpecNameMismatch {
                path: name.to_string(),
                body: spec.name,
            });
        }
        spec.validate(&self.registry)?;

        let mut pipelines = self.pipelines.lock().unwrap();
        let previous = pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayImplError::PipelineNotFound(name.to_string()))?;

        let next = Arc::new(Pipeline::inherit(
            spec,
            &previous,
            &self.registry,
            &self.services,
        )?);
        self.register_traffic(&next);
        pipelines.insert(name.to_string(), next);

        info!(pipeline = %name, "pipeline reloaded");
        Ok(())
    }

    /// Remove pipeline `name`, closing every running filter.
    pub fn delete(&self, name: &str) -> GatewayResult<()> {
        let removed = {
            let mut pipelines = self.pipelines.lock().unwrap();
            pipelines
                .remove(name)
                .ok_or_else(|| GatewayImplError::PipelineNotFound(name.to_string()))?
        };
        removed.close();
        self.services.api().unregister_group(&traffic_group_name(name));

        info!(pipeline = %name, "pipeline deleted");
        Ok(())
    }

    /// Aggregate status of pipeline `name`.
    pub fn status(&self, name: &str) -> GatewayResult<PipelineStatus> {
        self.pipeline(name)
            .map(|p| p.status())
            .ok_or_else(|| GatewayImplError::PipelineNotFound(name.to_string()))
    }

    /// The current spec of pipeline `name`.
    pub fn spec(&self, name: &str) -> GatewayResult<PipelineSpec> {
        self.pipeline(name)
            .map(|p| p.spec().clone())
            .ok_or_else(|| GatewayImplError::PipelineNotFound(name.to_string()))
    }

    /// Names of all configured pipelines, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.lock().unwrap().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// The current generation of pipeline `name`.
    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.lock().unwrap().get(name).cloned()
    }

    /// Register (or replace) the pipeline's traffic entry in the API
    /// registry; the mux picks it up on its next reload.
    fn register_traffic(&self, pipeline: &Pipeline) {
        let spec = pipeline.spec();
        let name = pipeline.name().to_string();
        let path = spec
            .path
            .clone()
            .unwrap_or_else(|| format!("/traffic/{name}"));

        let methods: Vec<String> = if spec.methods.is_empty() {
            DEFAULT_TRAFFIC_METHODS.iter().map(|m| m.to_string()).collect()
        } else {
            spec.methods.clone()
        };

        let entries = methods
            .into_iter()
            .map(|method| {
                ApiEntry::new(
                    method,
                    path.clone(),
                    Arc::new(PipelineHandler {
                        name: name.clone(),
                        controller: self.self_weak.clone(),
                    }) as Arc<dyn ApiHandler>,
                )
            })
            .collect();

        self.services.api().register_group(ApiGroup {
            group: traffic_group_name(&name),
            order: TRAFFIC_GROUP_ORDER,
            entries,
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traffic handler
// ─────────────────────────────────────────────────────────────────────────────

/// Routes one traffic request into the pipeline's current generation.
struct PipelineHandler {
    name: String,
    controller: Weak<PipelineController>,
}

#[async_trait]
impl ApiHandler for PipelineHandler {
    async fn handle(&self, ctx: &mut HttpContext) {
        let Some(controller) = self.controller.upgrade() else {
            write_error(ctx, 503, "gateway is shutting down");
            return;
        };
        let Some(pipeline) = controller.pipeline(&self.name) else {
            write_error(ctx, 404, &format!("pipeline '{}' not found", self.name));
            return;
        };

        let result = pipeline.handle(ctx).await;
        if !result.is_empty() && ctx.response().status < 400 {
            // The chain stopped on a token no filter handled and nothing set
            // an error status yet.
            write_error(
                ctx,
                500,
                &format!("pipeline '{}' failed: {result}", self.name),
            );
        }
    }
}

fn write_error(ctx: &mut HttpContext, status: u16, message: &str) {
    let response = ctx.response_mut();
    response.status = status;
    response.set_header("content-type", "application/json");
    response.body = serde_json::json!({ "error": message }).to_string().into_bytes();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_kernel::{Filter, FilterSpec, PipelineError};
    use std::any::Any;

    struct Noop;

    #[async_trait]
    impl Filter for Noop {
        fn kind(&self) -> &'static str {
            "Noop"
        }

        fn create(&self) -> Box<dyn Filter> {
            Box::new(Noop)
        }

        fn init(&mut self, _spec: &FilterSpec, _services: &Services) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn handle(&self, _ctx: &mut HttpContext) -> String {
            String::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn controller() -> (Arc<PipelineController>, Services) {
        let mut registry = FilterRegistry::new();
        registry.register(Arc::new(Noop)).unwrap();
        let services = Services::default();
        (
            PipelineController::new(registry.seal(), services.clone()),
            services,
        )
    }

    const SPEC: &str = "name: demo\nfilters:\n  - name: a\n    kind: Noop\n";

    #[tokio::test]
    async fn create_registers_a_traffic_group() {
        let (controller, services) = controller();
        controller.create(SPEC).unwrap();

        assert_eq!(controller.list(), vec!["demo"]);
        let groups = services.api().snapshot();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, "pipeline/demo");
        assert_eq!(groups[0].entries[0].path, "/traffic/demo");
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (controller, _services) = controller();
        controller.create(SPEC).unwrap();
        assert!(matches!(
            controller.create(SPEC),
            Err(GatewayImplError::PipelineExists(_))
        ));
    }

    #[tokio::test]
    async fn invalid_spec_leaves_the_table_unchanged() {
        let (controller, services) = controller();
        let err = controller
            .create("name: demo\nfilters:\n  - name: a\n    kind: Ghost\n")
            .unwrap_err();
        assert!(matches!(err, GatewayImplError::InvalidSpec(_)));
        assert!(controller.list().is_empty());
        assert!(services.api().snapshot().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_pipeline_is_rejected() {
        let (controller, _services) = controller();
        assert!(matches!(
            controller.update("demo", SPEC),
            Err(GatewayImplError::PipelineNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_with_mismatched_name_is_rejected() {
        let (controller, _services) = controller();
        controller.create(SPEC).unwrap();
        assert!(matches!(
            controller.update("other", SPEC),
            Err(GatewayImplError::SpecNameMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_pipeline_and_traffic_group() {
        let (controller, services) = controller();
        controller.create(SPEC).unwrap();
        controller.delete("demo").unwrap();

        assert!(controller.list().is_empty());
        assert!(services.api().snapshot().is_empty());
        assert!(matches!(
            controller.delete("demo"),
            Err(GatewayImplError::PipelineNotFound(_))
        ));
    }

    #[tokio::test]
    async fn custom_path_and_methods_are_registered() {
        let (controller, services) = controller();
        controller
            .create("name: demo\npath: /echo\nmethods: [PUT]\nfilters:\n  - name: a\n    kind: Noop\n")
            .unwrap();

        let groups = services.api().snapshot();
        assert_eq!(groups[0].entries.len(), 1);
        assert_eq!(groups[0].entries[0].path, "/echo");
        assert_eq!(groups[0].entries[0].method, "PUT");
    }
}
