use serde::{Deserialize, Serialize};
use tracing::debug;

/// Row cap applied to every discovery query.
pub const DEFAULT_ROW_LIMIT: usize = 20;

/// Unfiltered browse query used when no usable filter is supplied.
pub const BROWSE_QUERY: &str = "SELECT * { ?s ?p ?o } LIMIT 20";

pub const TERMS_FIELD: &str = "terms";
pub const CONTAINS_OPERATOR: &str = "contains";

/// Filter parameters of a discovery request, as sent by the data grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_value: Option<String>,
    /// Free-text quick search. Accepted and carried, but not used to build queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_search: Option<String>,
}

impl DiscoveryRequest {
    pub fn browse() -> Self {
        Self::default()
    }

    pub fn terms_containing(value: impl Into<String>) -> Self {
        Self {
            filter_field: Some(TERMS_FIELD.to_string()),
            filter_operator: Some(CONTAINS_OPERATOR.to_string()),
            filter_value: Some(value.into()),
            filter_search: None,
        }
    }

    pub fn build_query(&self) -> QueryOutcome {
        if self.filter_search.is_some() {
            debug!("Ignoring quick search parameter on discovery request");
        }

        build_query(
            self.filter_field.as_deref(),
            self.filter_operator.as_deref(),
            self.filter_value.as_deref(),
        )
    }
}

/// Result of translating a discovery request into SPARQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Query(String),
    /// The filter combination is unsupported; no query should run.
    Rejected,
}

impl QueryOutcome {
    pub fn query(&self) -> Option<&str> {
        match self {
            QueryOutcome::Query(text) => Some(text),
            QueryOutcome::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, QueryOutcome::Rejected)
    }
}

/// Build the bounded SPARQL query for a discovery request.
///
/// Filtering is only defined for the `terms` field with the `contains`
/// operator. Any other present combination is rejected rather than erred.
pub fn build_query(
    filter_field: Option<&str>,
    filter_operator: Option<&str>,
    filter_value: Option<&str>,
) -> QueryOutcome {
    let (field, value) = match (filter_field, filter_value) {
        (Some(field), Some(value)) => (field, value),
        _ => return QueryOutcome::Query(BROWSE_QUERY.to_string()),
    };

    if field != TERMS_FIELD || filter_operator != Some(CONTAINS_OPERATOR) {
        debug!(
            "Rejecting discovery filter: field={} operator={:?}",
            field, filter_operator
        );
        return QueryOutcome::Rejected;
    }

    let literal = match escape_literal(value) {
        Some(literal) => literal,
        None => {
            debug!("Rejecting discovery filter value containing control characters");
            return QueryOutcome::Rejected;
        }
    };

    let branches = ["s", "p", "o"]
        .iter()
        .map(|var| format!("  {{ ?s ?p ?o . FILTER CONTAINS(str(?{}), {}) }}", var, literal))
        .collect::<Vec<_>>()
        .join("\n  UNION\n");

    QueryOutcome::Query(format!(
        "SELECT ?s ?p ?o\nWHERE {{\n{}\n}}\nLIMIT {}",
        branches, DEFAULT_ROW_LIMIT
    ))
}

/// Quote `value` as a SPARQL double-quoted string literal.
///
/// Returns `None` when the value holds a control character that has no
/// SPARQL escape sequence.
pub fn escape_literal(value: &str) -> Option<String> {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');

    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '\u{8}' => quoted.push_str("\\b"),
            '\u{c}' => quoted.push_str("\\f"),
            c if c.is_control() => return None,
            c => quoted.push(c),
        }
    }

    quoted.push('"');
    Some(quoted)
}
