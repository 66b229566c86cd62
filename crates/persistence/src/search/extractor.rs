//! Expression-driven value extraction.
//!
//! Walks a resource's JSON along a parameter's expression to yield the
//! primitive values, tokens, references, or object leaves that feed the
//! row builders. The expression grammar is a restricted path subset:
//!
//! - `Kind.field[.field]*` with union segments joined by `|`
//! - `.where(...)` predicates are ignored; only the path shape matters
//! - `.as(T)` collapses a choice element to its concrete field (`value`
//!   `.as(Quantity)` walks `valueQuantity`)
//! - `.resolve()` is a no-op
//! - a trailing `[N]` indexer selects one element of an array field
//!
//! When a walk step lands on an array, the walk continues against each
//! element and the results are flattened, so extraction is always an
//! ordered flat list of leaves.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// One parsed walk step: a field name with an optional indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WalkStep {
    field: String,
    index: Option<usize>,
}

fn step_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<field>[A-Za-z_][A-Za-z0-9_]*)(?:\[(?P<idx>\d+)\])?$")
            .expect("step pattern is valid")
    })
}

/// Extracts the values a parameter expression selects from a resource.
///
/// Union segments whose head identifier names a different kind are
/// skipped; segments that walk into absent fields contribute nothing.
pub fn extract(resource: &Value, resource_type: &str, expression: &str) -> Vec<Value> {
    let mut results = Vec::new();
    for segment in split_top_level(expression, '|') {
        let Some(steps) = parse_segment(segment.trim(), resource_type) else {
            continue;
        };
        let mut nodes: Vec<&Value> = vec![resource];
        for step in &steps {
            nodes = walk_step(nodes, step);
            if nodes.is_empty() {
                break;
            }
        }
        results.extend(nodes.into_iter().cloned());
    }
    results
}

/// Parses one union segment into walk steps, or `None` when the segment's
/// head identifier does not match the resource kind.
fn parse_segment(segment: &str, resource_type: &str) -> Option<Vec<WalkStep>> {
    let mut parts = split_top_level(segment, '.').into_iter();
    let head = parts.next()?.trim().to_string();
    if head != resource_type {
        return None;
    }

    let mut steps: Vec<WalkStep> = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.starts_with("where(") || part == "resolve()" {
            continue;
        }
        if let Some(cast) = part.strip_prefix("as(").and_then(|p| p.strip_suffix(')')) {
            // Collapse the choice element onto the preceding field.
            let prev = steps.last_mut()?;
            prev.field.push_str(&capitalize(cast.trim()));
            continue;
        }
        let captures = step_pattern().captures(part)?;
        steps.push(WalkStep {
            field: captures["field"].to_string(),
            index: captures.name("idx").and_then(|m| m.as_str().parse().ok()),
        });
    }
    Some(steps)
}

/// Advances every current node by one field access, flattening arrays.
fn walk_step<'a>(nodes: Vec<&'a Value>, step: &WalkStep) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for node in nodes {
        let candidates: Vec<&Value> = match node {
            Value::Object(map) => map.get(&step.field).into_iter().collect(),
            Value::Array(arr) => arr.iter().filter_map(|el| el.get(&step.field)).collect(),
            _ => Vec::new(),
        };
        for value in candidates {
            match value {
                Value::Array(arr) => match step.index {
                    Some(n) => out.extend(arr.get(n)),
                    None => out.extend(arr.iter()),
                },
                other => {
                    if step.index.is_none() || step.index == Some(0) {
                        out.push(other);
                    }
                }
            }
        }
    }
    out
}

/// Splits on a separator at parenthesis depth zero.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_field() {
        let patient = json!({"resourceType": "Patient", "birthDate": "1974-12-25"});
        assert_eq!(
            extract(&patient, "Patient", "Patient.birthDate"),
            vec![json!("1974-12-25")]
        );
    }

    #[test]
    fn test_array_flattening() {
        let patient = json!({
            "resourceType": "Patient",
            "name": [
                {"family": "Chalmers", "given": ["Peter", "James"]},
                {"family": "Windsor"}
            ]
        });
        assert_eq!(
            extract(&patient, "Patient", "Patient.name.family"),
            vec![json!("Chalmers"), json!("Windsor")]
        );
        assert_eq!(
            extract(&patient, "Patient", "Patient.name.given"),
            vec![json!("Peter"), json!("James")]
        );
    }

    #[test]
    fn test_indexer() {
        let patient = json!({
            "resourceType": "Patient",
            "name": [{"given": ["Peter", "James"]}]
        });
        assert_eq!(
            extract(&patient, "Patient", "Patient.name.given[1]"),
            vec![json!("James")]
        );
        assert!(extract(&patient, "Patient", "Patient.name.given[5]").is_empty());
    }

    #[test]
    fn test_where_is_ignored() {
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"}
        });
        let values = extract(
            &observation,
            "Observation",
            "Observation.subject.where(resolve() is Patient)",
        );
        assert_eq!(values, vec![json!({"reference": "Patient/p1"})]);
    }

    #[test]
    fn test_as_cast_collapses_choice_field() {
        let observation = json!({
            "resourceType": "Observation",
            "effectiveDateTime": "2023-04-01T10:00:00Z",
            "valueQuantity": {"value": 120.5, "unit": "mmHg"}
        });
        assert_eq!(
            extract(&observation, "Observation", "Observation.effective.as(dateTime)"),
            vec![json!("2023-04-01T10:00:00Z")]
        );
        assert_eq!(
            extract(
                &observation,
                "Observation",
                "Observation.value.as(Quantity).value"
            ),
            vec![json!(120.5)]
        );
    }

    #[test]
    fn test_union_segments() {
        let observation = json!({
            "resourceType": "Observation",
            "effectiveDateTime": "2023-04-01"
        });
        let values = extract(
            &observation,
            "Observation",
            "Observation.effective.as(dateTime) | Observation.effective.as(Period).start",
        );
        assert_eq!(values, vec![json!("2023-04-01")]);
    }

    #[test]
    fn test_foreign_kind_segment_skipped() {
        let patient = json!({"resourceType": "Patient", "birthDate": "1990-01-01"});
        assert!(extract(&patient, "Patient", "Person.birthDate").is_empty());
    }

    #[test]
    fn test_object_leaves() {
        let patient = json!({
            "resourceType": "Patient",
            "identifier": [{"system": "http://ns", "value": "abc"}]
        });
        let values = extract(&patient, "Patient", "Patient.identifier");
        assert_eq!(values, vec![json!({"system": "http://ns", "value": "abc"})]);
    }
}
