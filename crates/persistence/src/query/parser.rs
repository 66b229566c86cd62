//! Query string parsing.
//!
//! A query arrives as ordered key/value pairs. Keys decompose into a
//! parameter code and an optional suffix: either a modifier (`:exact`,
//! `:contains`, `:missing`, `:not`, `:text`, `:iterate`) or a chain
//! (`code:TargetKind.targetCode`). Values split on unescaped commas into
//! OR lists; for date, number, and quantity parameters a two-letter
//! comparison prefix may head each value.

use uuid::Uuid;

use crate::error::{SearchError, StorageError, StorageResult};
use crate::search::registry::SearchParameterRegistry;
use crate::types::{
    ChainTarget, FilterValue, IncludeDirective, SearchFilter, SearchModifier, SearchPrefix,
    SearchRequest, SortRule, TotalMode,
};

/// Default page size.
pub const DEFAULT_COUNT: usize = 20;

/// Maximum page size.
pub const MAX_COUNT: usize = 1000;

/// What to do with an unknown search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownParameterBehavior {
    /// Reject the request.
    #[default]
    Error,
    /// Silently drop the parameter.
    Drop,
}

/// Parses query strings against the parameter registry.
#[derive(Debug)]
pub struct QueryParser<'a> {
    registry: &'a SearchParameterRegistry,
    on_unknown: UnknownParameterBehavior,
}

impl<'a> QueryParser<'a> {
    /// Creates a parser.
    pub fn new(registry: &'a SearchParameterRegistry) -> Self {
        Self {
            registry,
            on_unknown: UnknownParameterBehavior::default(),
        }
    }

    /// Sets the unknown-parameter behavior.
    pub fn with_unknown_behavior(mut self, behavior: UnknownParameterBehavior) -> Self {
        self.on_unknown = behavior;
        self
    }

    /// Parses decoded key/value pairs into a search request.
    pub fn parse(
        &self,
        resource_type: &str,
        pairs: &[(String, String)],
    ) -> StorageResult<SearchRequest> {
        let mut request = SearchRequest::new(resource_type);

        for (key, value) in pairs {
            match key.as_str() {
                "_count" => request.count = parse_count(value)?,
                "_offset" => request.offset = parse_offset(value)?,
                "_total" => request.total = parse_total(value)?,
                "_sort" => {
                    request
                        .sort
                        .extend(value.split(',').filter(|s| !s.is_empty()).map(SortRule::parse));
                }
                "_include" | "_include:iterate" => {
                    let mut directive = parse_include(key, value)?;
                    if key.ends_with(":iterate") {
                        directive.iterate = true;
                    }
                    request.include.push(directive);
                }
                "_revinclude" | "_revinclude:iterate" => {
                    let mut directive = parse_include(key, value)?;
                    if key.ends_with(":iterate") {
                        directive.iterate = true;
                    }
                    request.revinclude.push(directive);
                }
                "_summary" => {
                    if value == "count" {
                        request.total = TotalMode::Accurate;
                    }
                }
                "_compartment" => {
                    let id = Uuid::parse_str(value).map_err(|_| {
                        StorageError::Search(SearchError::InvalidValue {
                            code: "_compartment".to_string(),
                            message: "compartment must be a UUID".to_string(),
                        })
                    })?;
                    request.compartment = Some(id);
                }
                // Result parameters understood elsewhere or ignored.
                "_format" | "_pretty" | "_elements" => {}
                _ => {
                    if let Some(filter) = self.parse_filter(resource_type, key, value)? {
                        request.filters.push(filter);
                    }
                }
            }
        }

        Ok(request)
    }

    /// Parses one search parameter pair into a filter, or `None` when the
    /// parameter is unknown and the configuration says to drop it.
    fn parse_filter(
        &self,
        resource_type: &str,
        key: &str,
        value: &str,
    ) -> StorageResult<Option<SearchFilter>> {
        let (code, suffix) = match key.split_once(':') {
            Some((code, suffix)) => (code, Some(suffix)),
            None => (key, None),
        };

        let Some(param) = self.registry.get(resource_type, code) else {
            return match self.on_unknown {
                UnknownParameterBehavior::Error => {
                    Err(StorageError::Search(SearchError::UnknownParameter {
                        resource_type: resource_type.to_string(),
                        code: code.to_string(),
                    }))
                }
                UnknownParameterBehavior::Drop => Ok(None),
            };
        };

        let mut modifier = None;
        let mut chain = None;
        if let Some(suffix) = suffix {
            if let Some((target_type, target_code)) = suffix.split_once('.') {
                chain = Some(ChainTarget {
                    resource_type: target_type.to_string(),
                    code: target_code.to_string(),
                });
            } else if let Some(parsed) = SearchModifier::parse(suffix) {
                modifier = Some(parsed);
            } else {
                return Err(StorageError::Search(SearchError::UnsupportedModifier {
                    modifier: suffix.to_string(),
                    code: code.to_string(),
                }));
            }
        }

        let values = split_values(value)
            .into_iter()
            .map(|raw| {
                if param.param_type.admits_prefix() {
                    let (prefix, rest) = SearchPrefix::extract(&raw);
                    FilterValue {
                        prefix,
                        value: rest.to_string(),
                    }
                } else {
                    FilterValue::eq(raw)
                }
            })
            .collect();

        Ok(Some(SearchFilter {
            code: code.to_string(),
            modifier,
            chain,
            values,
        }))
    }
}

/// Splits a value on unescaped commas and unescapes `\,`, `\$`, `\|`,
/// and `\\`.
pub fn split_values(input: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' => {
                values.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    values.push(current);
    values
}

fn parse_count(value: &str) -> StorageResult<usize> {
    let count: usize = value.parse().map_err(|_| invalid("_count", value))?;
    // A zero count is ambiguous; clamp to the default page size.
    if count == 0 {
        return Ok(DEFAULT_COUNT);
    }
    Ok(count.min(MAX_COUNT))
}

fn parse_offset(value: &str) -> StorageResult<usize> {
    value.parse().map_err(|_| invalid("_offset", value))
}

fn parse_total(value: &str) -> StorageResult<TotalMode> {
    match value {
        "none" => Ok(TotalMode::None),
        "estimate" => Ok(TotalMode::Estimate),
        "accurate" => Ok(TotalMode::Accurate),
        _ => Err(invalid("_total", value)),
    }
}

fn parse_include(key: &str, value: &str) -> StorageResult<IncludeDirective> {
    IncludeDirective::parse(value).ok_or_else(|| invalid(key, value))
}

fn invalid(code: &str, value: &str) -> StorageError {
    StorageError::Search(SearchError::InvalidValue {
        code: code.to_string(),
        message: format!("invalid value '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(resource_type: &str, list: &[(&str, &str)]) -> StorageResult<SearchRequest> {
        let registry = SearchParameterRegistry::new();
        QueryParser::new(&registry).parse(resource_type, &pairs(list))
    }

    #[test]
    fn test_defaults() {
        let request = parse("Patient", &[]).unwrap();
        assert_eq!(request.count, DEFAULT_COUNT);
        assert_eq!(request.offset, 0);
        assert_eq!(request.total, TotalMode::None);
        assert!(request.filters.is_empty());
    }

    #[test]
    fn test_or_values_and_prefix_lifting() {
        let request = parse(
            "Patient",
            &[("gender", "male,female"), ("birthdate", "ge1970-01-01")],
        )
        .unwrap();

        assert_eq!(request.filters.len(), 2);
        let gender = &request.filters[0];
        assert_eq!(gender.values.len(), 2);
        assert_eq!(gender.values[0].value, "male");
        assert_eq!(gender.values[1].value, "female");

        let birthdate = &request.filters[1];
        assert_eq!(birthdate.values[0].prefix, SearchPrefix::Ge);
        assert_eq!(birthdate.values[0].value, "1970-01-01");
    }

    #[test]
    fn test_prefix_not_lifted_for_tokens() {
        // "ge" could legitimately start a code; token values never carry
        // prefixes.
        let request = parse("Patient", &[("gender", "genderqueer")]).unwrap();
        assert_eq!(request.filters[0].values[0].prefix, SearchPrefix::Eq);
        assert_eq!(request.filters[0].values[0].value, "genderqueer");
    }

    #[test]
    fn test_modifier_and_chain() {
        let request = parse(
            "Observation",
            &[("status:not", "final"), ("subject:Patient.name", "Chalmers")],
        )
        .unwrap();

        assert_eq!(request.filters[0].modifier, Some(SearchModifier::Not));
        let chained = &request.filters[1];
        assert_eq!(
            chained.chain,
            Some(ChainTarget {
                resource_type: "Patient".to_string(),
                code: "name".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_parameter_errors_by_default() {
        let result = parse("Patient", &[("favorite-color", "blue")]);
        assert!(matches!(
            result,
            Err(StorageError::Search(SearchError::UnknownParameter { .. }))
        ));
    }

    #[test]
    fn test_unknown_parameter_dropped_when_configured() {
        let registry = SearchParameterRegistry::new();
        let parser =
            QueryParser::new(&registry).with_unknown_behavior(UnknownParameterBehavior::Drop);
        let request = parser
            .parse("Patient", &pairs(&[("favorite-color", "blue")]))
            .unwrap();
        assert!(request.filters.is_empty());
    }

    #[test]
    fn test_unknown_modifier_rejected() {
        let result = parse("Patient", &[("gender:fuzzy", "male")]);
        assert!(matches!(
            result,
            Err(StorageError::Search(SearchError::UnsupportedModifier { .. }))
        ));
    }

    #[test]
    fn test_count_clamping() {
        assert_eq!(
            parse("Patient", &[("_count", "5")]).unwrap().count,
            5
        );
        assert_eq!(
            parse("Patient", &[("_count", "0")]).unwrap().count,
            DEFAULT_COUNT
        );
        assert_eq!(
            parse("Patient", &[("_count", "100000")]).unwrap().count,
            MAX_COUNT
        );
        assert!(parse("Patient", &[("_count", "-3")]).is_err());
    }

    #[test]
    fn test_result_parameters() {
        let request = parse(
            "Observation",
            &[
                ("_sort", "-date,status"),
                ("_total", "accurate"),
                ("_offset", "40"),
                ("_include", "Observation:subject"),
                ("_revinclude", "DiagnosticReport:result"),
            ],
        )
        .unwrap();

        assert_eq!(request.sort.len(), 2);
        assert!(request.sort[0].descending);
        assert_eq!(request.total, TotalMode::Accurate);
        assert_eq!(request.offset, 40);
        assert_eq!(request.include.len(), 1);
        assert_eq!(request.revinclude.len(), 1);
    }

    #[test]
    fn test_include_iterate_key() {
        let request = parse(
            "Observation",
            &[("_include:iterate", "Observation:subject")],
        )
        .unwrap();
        assert!(request.include[0].iterate);
    }

    #[test]
    fn test_split_values_escapes() {
        assert_eq!(split_values("a,b"), vec!["a", "b"]);
        assert_eq!(split_values("a\\,b"), vec!["a,b"]);
        assert_eq!(split_values("a\\\\,b"), vec!["a\\", "b"]);
        assert_eq!(split_values(""), vec![""]);
    }

    #[test]
    fn test_ignored_result_params() {
        let request = parse("Patient", &[("_format", "json"), ("_pretty", "true")]).unwrap();
        assert!(request.filters.is_empty());
    }
}
