//! Pipeline runtime: the per-route filter-chain executor.
//!
//! A [`Pipeline`] holds one *generation* of running filter instances in flow
//! order.  Reloading a spec produces a new generation via
//! [`Pipeline::inherit`]: instances whose name survives are handed to the new
//! instance's `inherit`, everything else is initialized fresh.  The running
//! chain is shared behind an `Arc`, so requests already executing against a
//! superseded generation finish on it undisturbed.
//!
//! Per-request execution is a single-threaded state machine over an index
//! into the running-filter list.  The driver's step function is exposed on
//! the request context as the [`HandlerCaller`], so a filter can itself run
//! the downstream chain (retries, wrapping); the index is saved and restored
//! around every call to tolerate nesting.  Stats are appended *before* each
//! filter runs, keeping them in execution-start order even under recursion.

use async_trait::async_trait;
use flowgate_kernel::{
    Filter, FilterRegistry, FilterSpec, FilterStat, HandlerCaller, HttpContext, HttpTemplate,
    PipelineContext, PipelineError, PipelineSpec, Services, LABEL_END,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

// ─────────────────────────────────────────────────────────────────────────────
// Running state
// ─────────────────────────────────────────────────────────────────────────────

/// One slot of the running-filter list.
struct RunningFilter {
    spec: FilterSpec,
    jump_if: HashMap<String, String>,
    /// Registered prototype; authoritative for the declared result set.
    root: Arc<dyn Filter>,
    /// Live instance of this generation.
    filter: Arc<dyn Filter>,
}

/// The immutable executable state of one generation.
struct FilterChain {
    name: String,
    running: Vec<RunningFilter>,
    template: Arc<HttpTemplate>,
}

/// Aggregated pipeline status: `{health, filters: {name → opaque status}}`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub health: String,
    pub filters: HashMap<String, serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// One generation of a configured pipeline.
pub struct Pipeline {
    spec: PipelineSpec,
    chain: Arc<FilterChain>,
}

impl Pipeline {
    /// Build the first generation from a validated spec.
    pub fn init(
        spec: PipelineSpec,
        registry: &FilterRegistry,
        services: &Services,
    ) -> Result<Self, PipelineError> {
        Self::reload(spec, None, registry, services)
    }

    /// Build the next generation, inheriting same-named filter instances
    /// from `previous`.
    ///
    /// Old instances not adopted by name are implicitly abandoned; each
    /// filter's `inherit` is responsible for closing a predecessor it does
    /// not keep.  The generation boundary never closes the old runtime as a
    /// whole.
    pub fn inherit(
        spec: PipelineSpec,
        previous: &Pipeline,
        registry: &FilterRegistry,
        services: &Services,
    ) -> Result<Self, PipelineError> {
        Self::reload(spec, Some(previous), registry, services)
    }

    fn reload(
        spec: PipelineSpec,
        previous: Option<&Pipeline>,
        registry: &FilterRegistry,
        services: &Services,
    ) -> Result<Self, PipelineError> {
        // Running order: the flow when present, declaration order otherwise.
        let declared = spec.filter_specs()?;
        let mut ordered: Vec<(FilterSpec, HashMap<String, String>)> = Vec::new();
        if spec.flow.is_empty() {
            for filter_spec in declared {
                ordered.push((filter_spec, HashMap::new()));
            }
        } else {
            for node in &spec.flow {
                let filter_spec = declared
                    .iter()
                    .find(|fs| fs.name() == node.filter)
                    .cloned()
                    .ok_or_else(|| PipelineError::SpecFlowMissing(node.filter.clone()))?;
                ordered.push((filter_spec, node.jump_if.clone()));
            }
        }

        let mut running = Vec::with_capacity(ordered.len());
        let mut template_pairs = Vec::with_capacity(ordered.len());
        for (filter_spec, jump_if) in ordered {
            let root = registry
                .get(filter_spec.kind())
                .ok_or_else(|| PipelineError::KindUnregistered(filter_spec.kind().to_string()))?
                .clone();

            let mut instance = root.create();
            let inherited = previous.and_then(|p| p.running_instance(filter_spec.name()));
            match inherited {
                Some(previous_instance) => {
                    instance.inherit(&filter_spec, previous_instance, services)?
                }
                None => instance.init(&filter_spec, services)?,
            }

            template_pairs.push((filter_spec.name().to_string(), filter_spec.raw().to_string()));
            running.push(RunningFilter {
                spec: filter_spec,
                jump_if,
                root,
                filter: Arc::from(instance),
            });
        }

        let template = Arc::new(
            HttpTemplate::new(&template_pairs)
                .map_err(|err| PipelineError::SpecTemplateInvalid(err.to_string()))?,
        );

        Ok(Self {
            chain: Arc::new(FilterChain {
                name: spec.name.clone(),
                running,
                template,
            }),
            spec,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    fn running_instance(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.chain
            .running
            .iter()
            .find(|rf| rf.spec.name() == name)
            .map(|rf| rf.filter.clone())
    }

    /// Drive one request through the chain.
    ///
    /// Returns the empty string on normal completion, or the unhandled result
    /// token that stopped the chain.  Tags the request with the execution
    /// trace either way.
    pub async fn handle(&self, ctx: &mut HttpContext) -> String {
        ctx.begin_pipeline();
        ctx.set_template(self.chain.template.clone());

        let driver = Arc::new(ChainDriver {
            chain: self.chain.clone(),
            index: AtomicIsize::new(-1),
        });
        ctx.set_handler_caller(driver.clone());

        let result = driver.call(ctx, "").await;

        let summary = ctx
            .pipeline()
            .map(PipelineContext::summary)
            .unwrap_or_else(|| "<empty>".to_string());
        ctx.add_tag(format!("pipeline: {summary}"));

        result
    }

    /// Aggregate status of this generation's filters.
    pub fn status(&self) -> PipelineStatus {
        let filters = self
            .chain
            .running
            .iter()
            .map(|rf| (rf.spec.name().to_string(), rf.filter.status()))
            .collect();
        PipelineStatus {
            health: "ok".to_string(),
            filters,
        }
    }

    /// Close every running filter.  Called only when the pipeline is removed
    /// outright, never at a generation boundary.
    pub fn close(&self) {
        for rf in &self.chain.running {
            rf.filter.close();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct ChainDriver {
    chain: Arc<FilterChain>,
    /// Index of the filter currently executing; −1 before the first.
    index: AtomicIsize,
}

impl FilterChain {
    /// Where to go after the filter at `index` emitted `result`.
    ///
    /// Returns the next list index, the list length for "reached END", or −1
    /// for "no filter can handle this result".
    fn next_index(&self, index: isize, result: &str) -> isize {
        let len = self.running.len() as isize;

        if result.is_empty() {
            return index + 1;
        }
        if index < 0 || index >= len {
            return -1;
        }

        let current = &self.running[index as usize];
        if !current.root.results().contains(&result) {
            error!(
                pipeline = %self.name,
                filter = %current.spec.name(),
                result,
                expected = ?current.root.results(),
                "BUG: filter returned a result outside its declared set"
            );
            return -1;
        }

        match current.jump_if.get(result) {
            Some(label) if label == LABEL_END => len,
            Some(label) => {
                for i in (index as usize + 1)..self.running.len() {
                    if self.running[i].spec.name() == label {
                        return i as isize;
                    }
                }
                -1
            }
            None => -1,
        }
    }
}

#[async_trait]
impl HandlerCaller for ChainDriver {
    /// Run the chain from the current position until it completes, fails
    /// unhandled, or reaches END.
    ///
    /// The current index is saved on entry and restored on exit, so a filter
    /// invoking this caller from inside `handle` resumes at its own position
    /// afterwards.
    async fn call(&self, ctx: &mut HttpContext, last_result: &str) -> String {
        let saved = self.index.load(Ordering::Relaxed);
        let mut result = last_result.to_string();

        loop {
            let next = self
                .chain
                .next_index(self.index.load(Ordering::Relaxed), &result);
            if next == self.chain.running.len() as isize {
                // Reached the end of the pipeline.
                result.clear();
                break;
            }
            if next < 0 {
                // An unhandled result bubbles to the caller.
                break;
            }
            self.index.store(next, Ordering::Relaxed);

            result = self.run_filter(ctx, next as usize).await;
        }

        self.index.store(saved, Ordering::Relaxed);
        result
    }
}

impl ChainDriver {
    async fn run_filter(&self, ctx: &mut HttpContext, index: usize) -> String {
        let rf = &self.chain.running[index];
        let name = rf.spec.name().to_string();

        if let Err(err) = ctx.save_req_to_template(&name) {
            error!(dict = ?ctx.template_dict(), %err, "saving request snapshot failed");
        }

        // Appended before the call so stats keep execution-start order even
        // when the filter invokes the downstream chain itself.
        let stat_index = {
            let stats = &mut ctx.pipeline_mut().filter_stats;
            stats.push(FilterStat::started(&name, rf.spec.kind()));
            stats.len() - 1
        };

        let start = Instant::now();
        let result = rf.filter.handle(ctx).await;
        let duration = start.elapsed();

        if let Some(stat) = ctx.pipeline_mut().filter_stats.get_mut(stat_index) {
            stat.result = result.clone();
            stat.duration = duration;
        }

        if let Err(err) = ctx.save_rsp_to_template(&name) {
            error!(dict = ?ctx.template_dict(), %err, "saving response snapshot failed");
        }

        result
    }
}

// =============================================================================
// Tests
// =============================================================================
