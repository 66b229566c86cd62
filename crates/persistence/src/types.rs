//! Core search and result types.
//!
//! These types are the contract between the query parser, the SQL planner,
//! and the repository. They mirror the FHIR search grammar: parameter
//! types, modifiers, comparison prefixes, sort rules, and include
//! directives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atrium_fhir::Resource;

/// FHIR search parameter types.
///
/// See: https://hl7.org/fhir/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite parameter combining others.
    Composite,
    /// Special parameters (_id, _lastUpdated, ...).
    Special,
}

impl SearchParamType {
    /// Whether values of this type admit a two-letter comparison prefix.
    pub fn admits_prefix(&self) -> bool {
        matches!(
            self,
            SearchParamType::Date | SearchParamType::Number | SearchParamType::Quantity
        )
    }
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchParamType::String => "string",
            SearchParamType::Uri => "uri",
            SearchParamType::Number => "number",
            SearchParamType::Date => "date",
            SearchParamType::Quantity => "quantity",
            SearchParamType::Token => "token",
            SearchParamType::Reference => "reference",
            SearchParamType::Composite => "composite",
            SearchParamType::Special => "special",
        };
        write!(f, "{}", s)
    }
}

/// Search modifiers appended to a parameter code with `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match.
    Exact,
    /// Contains substring.
    Contains,
    /// Match if value is missing/present.
    Missing,
    /// Negation.
    Not,
    /// Text search against the display form.
    Text,
    /// Iterate (only meaningful on _include/_revinclude).
    Iterate,
}

impl SearchModifier {
    /// Parses a modifier, returning `None` for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "missing" => Some(SearchModifier::Missing),
            "not" => Some(SearchModifier::Not),
            "text" => Some(SearchModifier::Text),
            "iterate" => Some(SearchModifier::Iterate),
            _ => None,
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchModifier::Exact => "exact",
            SearchModifier::Contains => "contains",
            SearchModifier::Missing => "missing",
            SearchModifier::Not => "not",
            SearchModifier::Text => "text",
            SearchModifier::Iterate => "iterate",
        };
        write!(f, "{}", s)
    }
}

/// Comparison prefixes for date, number, and quantity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl SearchPrefix {
    /// Extracts a prefix from the head of a value string, returning the
    /// prefix and the remaining value.
    pub fn extract(value: &str) -> (Self, &str) {
        if let Some(head) = value.get(..2) {
            if let Ok(p) = head.parse() {
                // A prefix must be followed by the actual value; "eq" alone
                // is a literal.
                if value.len() > 2 {
                    return (p, &value[2..]);
                }
            }
        }
        (SearchPrefix::Eq, value)
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

/// One value of a search filter, with its lifted comparison prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    /// Comparison prefix; `Eq` unless the parameter type admits prefixes.
    pub prefix: SearchPrefix,
    /// The raw value with any prefix stripped.
    pub value: String,
}

impl FilterValue {
    /// An equality value.
    pub fn eq(value: impl Into<String>) -> Self {
        Self {
            prefix: SearchPrefix::Eq,
            value: value.into(),
        }
    }
}

/// Chain target of a chained reference parameter (`subject:Patient.name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTarget {
    /// The target resource kind.
    pub resource_type: String,
    /// The parameter code evaluated against the target kind.
    pub code: String,
}

/// A parsed search filter: one URL parameter after decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// The parameter code.
    pub code: String,
    /// Optional modifier.
    pub modifier: Option<SearchModifier>,
    /// Optional chain (reference parameters only).
    pub chain: Option<ChainTarget>,
    /// OR'd values.
    pub values: Vec<FilterValue>,
}

impl SearchFilter {
    /// A plain equality filter.
    pub fn eq(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            modifier: None,
            chain: None,
            values: vec![FilterValue::eq(value)],
        }
    }
}

/// How `_total` should be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    /// No total.
    #[default]
    None,
    /// An estimate is acceptable.
    Estimate,
    /// Issue the COUNT(*) variant.
    Accurate,
}

/// One `_sort` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortRule {
    /// Parameter code to sort by.
    pub code: String,
    /// Descending when the rule was prefixed with `-`.
    pub descending: bool,
}

impl SortRule {
    /// Parses a single `_sort` element.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(code) => SortRule {
                code: code.to_string(),
                descending: true,
            },
            None => SortRule {
                code: s.to_string(),
                descending: false,
            },
        }
    }
}

/// An `_include` or `_revinclude` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// Source resource kind (`Observation` in `Observation:subject`).
    pub resource_type: String,
    /// Search parameter code; `*` for the wildcard include.
    pub code: String,
    /// Whether `:iterate` was requested.
    pub iterate: bool,
}

impl IncludeDirective {
    /// Parses `Kind:code[:iterate]` or the bare wildcard `*`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            return Some(IncludeDirective {
                resource_type: String::new(),
                code: "*".to_string(),
                iterate: false,
            });
        }
        let mut parts = s.split(':');
        let resource_type = parts.next()?.to_string();
        let code = parts.next()?.to_string();
        let iterate = matches!(parts.next(), Some("iterate"));
        if resource_type.is_empty() || code.is_empty() {
            return None;
        }
        Some(IncludeDirective {
            resource_type,
            code,
            iterate,
        })
    }

    /// Whether this is the wildcard include.
    pub fn is_wildcard(&self) -> bool {
        self.code == "*"
    }
}

/// A fully parsed search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The kind being searched.
    pub resource_type: String,
    /// AND'd filters.
    pub filters: Vec<SearchFilter>,
    /// Page size.
    pub count: usize,
    /// Page offset.
    pub offset: usize,
    /// Sort rules, in order.
    pub sort: Vec<SortRule>,
    /// Total computation mode.
    pub total: TotalMode,
    /// Forward includes.
    pub include: Vec<IncludeDirective>,
    /// Reverse includes.
    pub revinclude: Vec<IncludeDirective>,
    /// Compartment restriction from the request context.
    pub compartment: Option<Uuid>,
}

impl SearchRequest {
    /// Creates an empty request for a kind with default paging.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            filters: Vec::new(),
            count: crate::query::parser::DEFAULT_COUNT,
            offset: 0,
            sort: Vec::new(),
            total: TotalMode::None,
            include: Vec::new(),
            revinclude: Vec::new(),
            compartment: None,
        }
    }

    /// Adds a filter.
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// The kind of write that just committed, as seen by post-commit hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    /// A new resource was created.
    Create,
    /// An existing resource was updated.
    Update,
    /// A resource was soft-deleted.
    Delete,
}

/// Parses a FHIR date or dateTime value, widening partial dates to the
/// start of their period: `2020` is January 1st, `2020-06` is June 1st.
/// Offset-free dateTimes are read as UTC.
pub fn parse_partial_datetime(value: &str) -> Option<DateTime<Utc>> {
    let normalized = if value.contains('T') {
        if value.ends_with('Z') || value.contains('+') || value.rfind('-') > value.find('T') {
            value.to_string()
        } else {
            format!("{}Z", value)
        }
    } else {
        match value.len() {
            4 => format!("{}-01-01T00:00:00Z", value),
            7 => format!("{}-01T00:00:00Z", value),
            10 => format!("{}T00:00:00Z", value),
            _ => value.to_string(),
        }
    };
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether an entry of a result page is a primary match or a joined
/// include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEntryMode {
    /// Primary result.
    Match,
    /// Joined via _include/_revinclude.
    Include,
}

/// One entry of a search result page.
#[derive(Debug, Clone)]
pub struct SearchEntry {
    /// The resource.
    pub resource: Resource,
    /// Match or include.
    pub mode: SearchEntryMode,
}

/// A page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchResultPage {
    /// Entries: matches first, then includes.
    pub entries: Vec<SearchEntry>,
    /// Cardinality of the full matching set when `_total=accurate`.
    pub total: Option<u64>,
    /// Whether a further page exists.
    pub has_next: bool,
}

impl SearchResultPage {
    /// Returns only the primary matches.
    pub fn matches(&self) -> impl Iterator<Item = &Resource> {
        self.entries
            .iter()
            .filter(|e| e.mode == SearchEntryMode::Match)
            .map(|e| &e.resource)
    }
}

/// Options for history reads.
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Maximum entries to return.
    pub count: Option<usize>,
    /// Only include versions written strictly after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// One history entry, newest first in a history page.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The version id of this entry.
    pub version_id: Uuid,
    /// The resource id.
    pub id: Uuid,
    /// The snapshot, or `None` for a tombstone.
    pub resource: Option<Resource>,
    /// When this version was written.
    pub last_updated: DateTime<Utc>,
}

impl HistoryEntry {
    /// Whether this entry records a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.resource.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extract() {
        assert_eq!(
            SearchPrefix::extract("ge2020-01-01"),
            (SearchPrefix::Ge, "2020-01-01")
        );
        assert_eq!(SearchPrefix::extract("2020"), (SearchPrefix::Eq, "2020"));
        // A bare two-letter prefix with no value stays a literal.
        assert_eq!(SearchPrefix::extract("eq"), (SearchPrefix::Eq, "eq"));
        // Values that merely start with prefix letters are untouched.
        assert_eq!(SearchPrefix::extract("lemon"), (SearchPrefix::Le, "mon"));
    }

    #[test]
    fn test_sort_rule_parse() {
        assert_eq!(
            SortRule::parse("-birthdate"),
            SortRule {
                code: "birthdate".to_string(),
                descending: true
            }
        );
        assert_eq!(
            SortRule::parse("_lastUpdated"),
            SortRule {
                code: "_lastUpdated".to_string(),
                descending: false
            }
        );
    }

    #[test]
    fn test_include_directive_parse() {
        let inc = IncludeDirective::parse("Observation:subject").unwrap();
        assert_eq!(inc.resource_type, "Observation");
        assert_eq!(inc.code, "subject");
        assert!(!inc.iterate);

        let iter = IncludeDirective::parse("Observation:subject:iterate").unwrap();
        assert!(iter.iterate);

        let wild = IncludeDirective::parse("*").unwrap();
        assert!(wild.is_wildcard());

        assert!(IncludeDirective::parse("Observation").is_none());
    }

    #[test]
    fn test_parse_partial_datetime() {
        let year = parse_partial_datetime("2020").unwrap();
        assert_eq!(year.to_rfc3339(), "2020-01-01T00:00:00+00:00");

        let month = parse_partial_datetime("2020-06").unwrap();
        assert_eq!(month.to_rfc3339(), "2020-06-01T00:00:00+00:00");

        let day = parse_partial_datetime("2020-06-15").unwrap();
        assert_eq!(day.to_rfc3339(), "2020-06-15T00:00:00+00:00");

        let offset = parse_partial_datetime("2020-06-15T10:00:00-05:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2020-06-15T15:00:00+00:00");

        let bare = parse_partial_datetime("2020-06-15T10:00:00").unwrap();
        assert_eq!(bare.to_rfc3339(), "2020-06-15T10:00:00+00:00");

        assert!(parse_partial_datetime("not-a-date").is_none());
    }

    #[test]
    fn test_modifier_parse() {
        assert_eq!(SearchModifier::parse("exact"), Some(SearchModifier::Exact));
        assert_eq!(SearchModifier::parse("bogus"), None);
    }
}
