//! Per-pipeline HTTP template engine.
//!
//! Filter bodies may embed `[[filter.<name>.<req|rsp>.<path…>]]` references
//! to the request or response snapshot of an earlier filter.  Construction
//! extracts every reference and rejects names outside the pipeline's filter
//! set; at request time the pipeline driver records a snapshot of the request
//! before each filter runs and of the response after it returns, and filters
//! render references against that request-scoped dictionary.
//!
//! Reference examples:
//!
//! ```text
//! [[filter.auth.req.headers.x-user]]   — request header as seen by "auth"
//! [[filter.upstream.rsp.body]]         — response body after "upstream" ran
//! ```

use crate::context::{HttpRequest, HttpResponse};
use crate::error::TemplateError;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

const REF_OPEN: &str = "[[";
const REF_CLOSE: &str = "]]";
const REF_NAMESPACE: &str = "filter";

/// One extracted `[[filter.<name>.<field>]]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TemplateRef {
    /// Referenced filter name.
    filter: String,
    /// Dotted field path below the filter, e.g. `req.body`.
    field: String,
}

impl TemplateRef {
    fn parse(content: &str) -> Result<Self, TemplateError> {
        let malformed = || TemplateError::MalformedReference(content.to_string());

        let mut segments = content.splitn(3, '.');
        let namespace = segments.next().ok_or_else(malformed)?;
        let filter = segments.next().ok_or_else(malformed)?;
        let field = segments.next().ok_or_else(malformed)?;

        let snapshot = field.split('.').next().unwrap_or_default();
        if namespace != REF_NAMESPACE
            || filter.is_empty()
            || !matches!(snapshot, "req" | "rsp")
        {
            return Err(malformed());
        }

        Ok(Self {
            filter: filter.to_string(),
            field: field.to_string(),
        })
    }
}

/// The shared, immutable template of one pipeline generation.
///
/// Holds the references extracted from the filter bodies; the mutable
/// dictionary the references resolve against lives on the request context.
#[derive(Debug, Default)]
pub struct HttpTemplate {
    refs: Vec<TemplateRef>,
}

impl HttpTemplate {
    /// Build a template over `(filter name, raw YAML body)` pairs.
    ///
    /// Fails when any body references a filter name outside `filters`, or
    /// contains a reference that does not follow the
    /// `filter.<name>.<req|rsp>…` form.
    pub fn new(filters: &[(String, String)]) -> Result<Self, TemplateError> {
        let names: HashSet<&str> = filters.iter().map(|(name, _)| name.as_str()).collect();

        let mut refs = Vec::new();
        for (_, body) in filters {
            for reference in Self::extract(body)? {
                if !names.contains(reference.filter.as_str()) {
                    return Err(TemplateError::UnknownFilter(reference.filter));
                }
                refs.push(reference);
            }
        }

        Ok(Self { refs })
    }

    /// Number of references the pipeline's bodies make.
    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }

    fn extract(text: &str) -> Result<Vec<TemplateRef>, TemplateError> {
        let mut refs = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find(REF_OPEN) {
            let after = &rest[open + REF_OPEN.len()..];
            let close = after
                .find(REF_CLOSE)
                .ok_or_else(|| TemplateError::MalformedReference(after.to_string()))?;
            refs.push(TemplateRef::parse(after[..close].trim())?);
            rest = &after[close + REF_CLOSE.len()..];
        }
        Ok(refs)
    }

    /// Record the request as filter `name`'s pre-call snapshot.
    pub fn save_request(
        &self,
        name: &str,
        request: &HttpRequest,
        dict: &mut HashMap<String, Value>,
    ) -> Result<(), TemplateError> {
        dict.insert(
            format!("{REF_NAMESPACE}.{name}.req"),
            json!({
                "method": request.method.as_str(),
                "path": &request.path,
                "headers": &request.headers,
                "body": String::from_utf8_lossy(&request.body),
            }),
        );
        Ok(())
    }

    /// Record the response as filter `name`'s post-call snapshot.
    pub fn save_response(
        &self,
        name: &str,
        response: &HttpResponse,
        dict: &mut HashMap<String, Value>,
    ) -> Result<(), TemplateError> {
        dict.insert(
            format!("{REF_NAMESPACE}.{name}.rsp"),
            json!({
                "status": response.status,
                "headers": &response.headers,
                "body": String::from_utf8_lossy(&response.body),
            }),
        );
        Ok(())
    }

    /// Substitute every reference in `text` with its dictionary value.
    ///
    /// String values substitute verbatim; anything else substitutes as its
    /// JSON encoding.  A reference whose snapshot has not been recorded yet
    /// (or whose path does not exist) fails with
    /// [`TemplateError::MissingValue`].
    pub fn render(
        &self,
        text: &str,
        dict: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find(REF_OPEN) {
            out.push_str(&rest[..open]);
            let after = &rest[open + REF_OPEN.len()..];
            let close = after
                .find(REF_CLOSE)
                .ok_or_else(|| TemplateError::MalformedReference(after.to_string()))?;
            let content = after[..close].trim();
            out.push_str(&Self::lookup(content, dict)?);
            rest = &after[close + REF_CLOSE.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(content: &str, dict: &HashMap<String, Value>) -> Result<String, TemplateError> {
        let reference = TemplateRef::parse(content)?;
        let missing = || TemplateError::MissingValue(content.to_string());

        let mut fields = reference.field.split('.');
        let snapshot = fields.next().ok_or_else(missing)?;
        let root = dict
            .get(&format!("{REF_NAMESPACE}.{}.{snapshot}", reference.filter))
            .ok_or_else(missing)?;

        let mut value = root;
        for segment in fields {
            value = value.get(segment).ok_or_else(missing)?;
        }

        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
