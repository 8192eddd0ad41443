//! Error types for the gateway kernel contract.
//!
//! [`PipelineError`] covers every failure mode that can be detected at
//! *definition time* — malformed filter descriptors, duplicate names, invalid
//! flow jump tables, unregistered kinds — before a request is ever served.
//! Runtime failures (routing misses, admin conflicts, bind errors) belong to
//! the gateway implementation crate (`flowgate-gateway`).
//!
//! Spec errors carry a `filters:` or `flow:` prefix naming the subsection of
//! the pipeline spec they were raised from, so admin callers can point the
//! operator at the offending block.

use thiserror::Error;

/// Definition-time error type for pipeline specs and the filter registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineError {
    /// The pipeline spec has no `filters` section.
    #[error("filters: filters is required")]
    SpecMissing,

    /// A filter descriptor is malformed: missing name or kind, the reserved
    /// `END` name, or a body that does not decode.
    #[error("filters: {0}")]
    SpecFieldInvalid(String),

    /// Two filter descriptors share a name.
    #[error("filters: conflict name: {0}")]
    SpecDuplicateName(String),

    /// The filter bodies reference the HTTP template incorrectly.
    #[error("filters: invalid template: {0}")]
    SpecTemplateInvalid(String),

    /// The same filter appears twice in `flow`.
    #[error("flow: repeated filter {0}")]
    SpecDuplicateFlow(String),

    /// A `flow` entry names a filter that has no descriptor.
    #[error("flow: filter {0} not found in filters")]
    SpecFlowMissing(String),

    /// A jump-table key is not one of the target filter's declared results.
    #[error("flow: filter {filter}: result {result} is not in {expected:?}")]
    SpecFlowResult {
        filter: String,
        result: String,
        expected: Vec<String>,
    },

    /// A jump-table target is neither `END` nor a filter appearing later in
    /// the flow.
    #[error("flow: filter {filter}: label {label} not found")]
    SpecFlowLabel { filter: String, label: String },

    /// A filter descriptor names a kind that was never registered.
    #[error("filters: kind {0} not found")]
    KindUnregistered(String),

    /// A prototype with this kind is already in the registry.
    #[error("filter kind '{0}' is already registered")]
    KindAlreadyRegistered(String),
}

/// Non-fatal error raised by the HTTP template engine.
///
/// Save-point failures during request execution are logged and the request
/// continues; only template *construction* failures reject a spec (as
/// [`PipelineError::SpecTemplateInvalid`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    /// A `[[filter.<name>.…]]` reference names a filter outside the pipeline.
    #[error("reference to unknown filter '{0}'")]
    UnknownFilter(String),

    /// A `[[…]]` reference does not follow the `filter.<name>.<field>` form.
    #[error("malformed reference '{0}'")]
    MalformedReference(String),

    /// A rendered reference has no value in the request dictionary yet.
    #[error("no value for reference '{0}'")]
    MissingValue(String),
}
