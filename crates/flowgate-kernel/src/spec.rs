//! Declarative pipeline specifications and their validation.
//!
//! A pipeline spec is a YAML document:
//!
//! ```yaml
//! name: demo
//! flow:
//!   - filter: auth
//!     jumpIf: { invalid: END }
//!   - filter: mock
//! filters:
//!   - name: auth
//!     kind: Validator
//!     credentials: [sk-demo]
//!   - name: mock
//!     kind: Mock
//!     body: "hello"
//! ```
//!
//! `flow` defines execution order and per-result jumps; when it is absent the
//! filters run in declaration order with no jump tables.  [`validate`]
//! enforces the structural invariants before a spec reaches the runtime: see
//! the method docs for the numbered check list.
//!
//! [`validate`]: PipelineSpec::validate

use crate::error::PipelineError;
use crate::filter::FilterRegistry;
use crate::template::HttpTemplate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Built-in jump label naming the end of the pipeline.
pub const LABEL_END: &str = "END";

// ─────────────────────────────────────────────────────────────────────────────
// FilterSpec
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed, validated descriptor of one filter instance.
///
/// Immutable once constructed.  The body keeps both its raw YAML (for the
/// HTTP template, which scans it for references) and its decoded value (for
/// [`decode`](FilterSpec::decode) into a kind-specific config struct).
#[derive(Debug, Clone)]
pub struct FilterSpec {
    name: String,
    kind: String,
    raw: String,
    body: serde_yaml::Value,
}

#[derive(Deserialize)]
struct FilterMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: String,
}

impl FilterSpec {
    /// Decode and validate one entry of a spec's `filters` list.
    pub fn new(body: serde_yaml::Value) -> Result<Self, PipelineError> {
        let meta: FilterMeta = serde_yaml::from_value(body.clone())
            .map_err(|err| PipelineError::SpecFieldInvalid(err.to_string()))?;

        if meta.name.is_empty() {
            return Err(PipelineError::SpecFieldInvalid(
                "filter name is required".to_string(),
            ));
        }
        if meta.kind.is_empty() {
            return Err(PipelineError::SpecFieldInvalid(format!(
                "filter {}: kind is required",
                meta.name
            )));
        }
        if meta.name == LABEL_END {
            return Err(PipelineError::SpecFieldInvalid(format!(
                "can't use {LABEL_END} (built-in label) for filter name"
            )));
        }

        let raw = serde_yaml::to_string(&body)
            .map_err(|err| PipelineError::SpecFieldInvalid(err.to_string()))?;

        Ok(Self {
            name: meta.name,
            kind: meta.kind,
            raw,
            body,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Raw YAML of the full descriptor body.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decoded descriptor body.
    pub fn body(&self) -> &serde_yaml::Value {
        &self.body
    }

    /// Decode the body into a kind-specific configuration struct.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, PipelineError> {
        serde_yaml::from_value(self.body.clone()).map_err(|err| {
            PipelineError::SpecFieldInvalid(format!("filter {}: {err}", self.name))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PipelineSpec
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a pipeline's `flow` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Name of the filter to run.
    pub filter: String,
    /// Result token → jump label (a later filter's name, or [`LABEL_END`]).
    #[serde(default, rename = "jumpIf", skip_serializing_if = "HashMap::is_empty")]
    pub jump_if: HashMap<String, String>,
}

/// Declarative description of one pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Unique pipeline name.
    pub name: String,
    /// Traffic path this pipeline is served under (defaults to
    /// `/traffic/<name>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Accepted traffic methods (defaults to GET and POST).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Execution order and jump tables; empty means "run `filters` in
    /// declaration order".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow: Vec<FlowNode>,
    /// Filter descriptor bodies, decoded into [`FilterSpec`]s on use.
    #[serde(default)]
    pub filters: Vec<serde_yaml::Value>,
}

impl PipelineSpec {
    /// Parse a spec from its raw YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, PipelineError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|err| PipelineError::SpecFieldInvalid(err.to_string()))?;

        match doc.get("filters") {
            Some(filters) if !filters.is_null() => {}
            _ => return Err(PipelineError::SpecMissing),
        }

        let spec: PipelineSpec = serde_yaml::from_value(doc)
            .map_err(|err| PipelineError::SpecFieldInvalid(err.to_string()))?;

        if spec.name.is_empty() {
            return Err(PipelineError::SpecFieldInvalid(
                "pipeline name is required".to_string(),
            ));
        }

        Ok(spec)
    }

    /// Decode the `filters` list into [`FilterSpec`]s, in declaration order.
    pub fn filter_specs(&self) -> Result<Vec<FilterSpec>, PipelineError> {
        self.filters
            .iter()
            .map(|body| FilterSpec::new(body.clone()))
            .collect()
    }

    /// Validate the structural invariants of this spec.
    ///
    /// Checks performed (in order):
    /// 1. `filters` is non-empty.
    /// 2. Each descriptor decodes, has a name and a registered kind, and does
    ///    not use the reserved `END` name.
    /// 3. No two descriptors share a name.
    /// 4. The bodies build a valid HTTP template (references point only at
    ///    filters of this pipeline).
    /// 5. No filter is referenced twice by `flow`.
    /// 6. Walking `flow` from last to first with the valid-label set seeded
    ///    to `{END}`: each entry's filter exists, each jump key is one of the
    ///    target filter's declared results, and each jump label is already
    ///    valid.  This forbids backward jumps and undefined labels — every
    ///    jump goes strictly forward toward `END`.
    ///
    /// Validation is read-only and idempotent: it never touches the running
    /// generation.
    pub fn validate(&self, registry: &FilterRegistry) -> Result<(), PipelineError> {
        if self.filters.is_empty() {
            return Err(PipelineError::SpecMissing);
        }

        let mut specs: HashMap<String, FilterSpec> = HashMap::new();
        let mut template_pairs: Vec<(String, String)> = Vec::new();
        for body in &self.filters {
            let spec = FilterSpec::new(body.clone())?;
            if registry.get(spec.kind()).is_none() {
                return Err(PipelineError::KindUnregistered(spec.kind().to_string()));
            }
            if specs.contains_key(spec.name()) {
                return Err(PipelineError::SpecDuplicateName(spec.name().to_string()));
            }
            template_pairs.push((spec.name().to_string(), spec.raw().to_string()));
            specs.insert(spec.name().to_string(), spec);
        }

        HttpTemplate::new(&template_pairs)
            .map_err(|err| PipelineError::SpecTemplateInvalid(err.to_string()))?;

        let mut referenced: HashSet<&str> = HashSet::new();
        for node in &self.flow {
            if !referenced.insert(node.filter.as_str()) {
                return Err(PipelineError::SpecDuplicateFlow(node.filter.clone()));
            }
        }

        let mut valid_labels: HashSet<&str> = HashSet::from([LABEL_END]);
        for node in self.flow.iter().rev() {
            let spec = specs
                .get(&node.filter)
                .ok_or_else(|| PipelineError::SpecFlowMissing(node.filter.clone()))?;
            let prototype = registry
                .get(spec.kind())
                .ok_or_else(|| PipelineError::KindUnregistered(spec.kind().to_string()))?;

            let expected = prototype.results();
            for (result, label) in &node.jump_if {
                if !expected.contains(&result.as_str()) {
                    return Err(PipelineError::SpecFlowResult {
                        filter: node.filter.clone(),
                        result: result.clone(),
                        expected: expected.iter().map(|r| r.to_string()).collect(),
                    });
                }
                if !valid_labels.contains(label.as_str()) {
                    return Err(PipelineError::SpecFlowLabel {
                        filter: node.filter.clone(),
                        label: label.clone(),
                    });
                }
            }
            valid_labels.insert(node.filter.as_str());
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
