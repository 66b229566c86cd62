//! Row and lookup builders.
//!
//! Composes everything the write path persists besides the resource
//! content itself: the generated search columns on the main row, the
//! metadata token columns, the shared-token union, the rows of the four
//! shared lookup tables, the reference triples, and the compartment set.

use serde_json::Value;
use uuid::Uuid;

use atrium_fhir::{Reference, Resource, TokenHash};

use crate::sql::SqlValue;
use crate::types::{SearchParamType, parse_partial_datetime};

use super::extractor;
use super::registry::{ColumnType, IndexStrategy, LookupTable, SearchParameterRegistry};

/// A (system, code, display) token extracted from a leaf value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValue {
    /// Code system URI.
    pub system: Option<String>,
    /// The code itself.
    pub code: String,
    /// Human-readable display.
    pub display: Option<String>,
}

impl TokenValue {
    /// Renders the `system|code` text form; bare code when no system.
    pub fn rendered(&self) -> String {
        match &self.system {
            Some(system) => format!("{}|{}", system, self.code),
            None => self.code.clone(),
        }
    }

    /// The fixed-width digest for the hash array column.
    pub fn hash(&self) -> Uuid {
        TokenHash::of(self.system.as_deref(), &self.code).as_uuid()
    }
}

/// One row destined for a shared lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRow {
    /// The target table.
    pub table: LookupTable,
    /// `(column, value)` pairs excluding `resourceId`, in table column
    /// order.
    pub values: Vec<Option<String>>,
}

/// One row destined for the per-kind references table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    /// Target resource id.
    pub target_id: Uuid,
    /// The parameter code the reference was found under.
    pub code: String,
}

/// Everything the indexer derives from one resource snapshot.
#[derive(Debug, Clone, Default)]
pub struct IndexedRows {
    /// Generated search columns, deduplicated by name, in deterministic
    /// order. Includes the fixed metadata token columns.
    pub columns: Vec<(String, SqlValue)>,
    /// Rows for the shared lookup tables.
    pub lookup_rows: Vec<LookupRow>,
    /// Rows for the per-kind references table.
    pub reference_rows: Vec<ReferenceRow>,
    /// Compartment ids for the `compartments` column.
    pub compartments: Vec<Uuid>,
}

/// Builds the derived rows for a resource snapshot.
pub fn build(registry: &SearchParameterRegistry, resource: &Resource) -> IndexedRows {
    let resource_type = resource.resource_type();
    let content = resource.to_value();

    let mut rows = IndexedRows::default();
    let mut shared_tokens: Vec<TokenValue> = Vec::new();

    for param in registry.params_for(resource_type) {
        let leaves = extractor::extract(&content, resource_type, &param.expression);

        match &param.strategy {
            IndexStrategy::Column => {
                let value = column_value(&param.columns()[0].1, param.param_type, &leaves);
                push_column(&mut rows.columns, param.columns()[0].0.clone(), value);
            }
            IndexStrategy::TokenColumn => {
                let tokens: Vec<TokenValue> =
                    leaves.iter().flat_map(tokens_from_value).collect();
                shared_tokens.extend(tokens.iter().cloned());
                let triad = token_triad(&tokens);
                let names = param.columns();
                push_column(&mut rows.columns, names[0].0.clone(), triad.0);
                push_column(&mut rows.columns, names[1].0.clone(), triad.1);
                push_column(&mut rows.columns, names[2].0.clone(), triad.2);
                // Identifier-like tokens also land in the shared lookup
                // table so they stay queryable by system and value.
                if param.code == "identifier" {
                    for leaf in &leaves {
                        if let Some(row) = identifier_row(leaf) {
                            push_lookup(&mut rows.lookup_rows, row);
                        }
                    }
                }
            }
            IndexStrategy::Lookup { table, .. } => {
                let sort = leaves.first().map(|leaf| lookup_string(*table, leaf));
                push_column(
                    &mut rows.columns,
                    format!("__{}Sort", param.column_name),
                    SqlValue::TextOpt(sort),
                );
                for leaf in &leaves {
                    if let Some(row) = lookup_row(*table, leaf) {
                        push_lookup(&mut rows.lookup_rows, row);
                    }
                }
            }
        }

        if param.param_type == SearchParamType::Reference {
            for leaf in &leaves {
                let Some(text) = reference_string(leaf) else {
                    continue;
                };
                let Some(reference) = Reference::parse(&text) else {
                    continue;
                };
                if let Some(target_id) = reference.target_uuid() {
                    let row = ReferenceRow {
                        target_id,
                        code: param.code.clone(),
                    };
                    if !rows.reference_rows.contains(&row) {
                        rows.reference_rows.push(row);
                    }
                    if let Reference::Local {
                        resource_type: target_type,
                        ..
                    } = &reference
                    {
                        if target_type == "Patient"
                            && matches!(param.code.as_str(), "patient" | "subject")
                        {
                            push_compartment(&mut rows.compartments, target_id);
                        }
                    }
                }
            }
        }
    }

    // A Patient is the focus of its own compartment.
    if resource_type == "Patient" {
        if let Some(id) = resource.id().and_then(|id| Uuid::parse_str(id).ok()) {
            push_compartment(&mut rows.compartments, id);
        }
    }

    // Fixed metadata token columns.
    let tags: Vec<TokenValue> = resource.tags().iter().flat_map(|v| tokens_from_value(v)).collect();
    let security: Vec<TokenValue> = resource
        .security()
        .iter()
        .flat_map(|v| tokens_from_value(v))
        .collect();
    shared_tokens.extend(tags.iter().cloned());
    shared_tokens.extend(security.iter().cloned());

    let tag_triad = token_triad(&tags);
    push_column(&mut rows.columns, "__tag".to_string(), tag_triad.0);
    push_column(&mut rows.columns, "__tagText".to_string(), tag_triad.1);
    push_column(&mut rows.columns, "__tagSort".to_string(), tag_triad.2);

    let security_triad = token_triad(&security);
    push_column(&mut rows.columns, "__security".to_string(), security_triad.0);
    push_column(
        &mut rows.columns,
        "__securityText".to_string(),
        security_triad.1,
    );
    push_column(
        &mut rows.columns,
        "__securitySort".to_string(),
        security_triad.2,
    );

    let shared = token_triad(&shared_tokens);
    push_column(&mut rows.columns, "__sharedTokens".to_string(), shared.0);
    push_column(
        &mut rows.columns,
        "__sharedTokensText".to_string(),
        shared.1,
    );

    rows
}

/// Keeps the first value written for a column; alias parameters that share
/// a column (e.g. `patient` over `subject`) never double-write.
fn push_column(columns: &mut Vec<(String, SqlValue)>, name: String, value: SqlValue) {
    if !columns.iter().any(|(existing, _)| *existing == name) {
        columns.push((name, value));
    }
}

fn push_lookup(rows: &mut Vec<LookupRow>, row: LookupRow) {
    if !rows.contains(&row) {
        rows.push(row);
    }
}

fn push_compartment(compartments: &mut Vec<Uuid>, id: Uuid) {
    if !compartments.contains(&id) {
        compartments.push(id);
    }
}

/// The hash-array, text-array, and sort values for a token set.
fn token_triad(tokens: &[TokenValue]) -> (SqlValue, SqlValue, SqlValue) {
    if tokens.is_empty() {
        return (
            SqlValue::UuidArrayOpt(None),
            SqlValue::TextArrayOpt(None),
            SqlValue::TextOpt(None),
        );
    }
    let mut hashes = Vec::with_capacity(tokens.len());
    let mut texts = Vec::with_capacity(tokens.len());
    for token in tokens {
        let hash = token.hash();
        if !hashes.contains(&hash) {
            hashes.push(hash);
        }
        // Store the qualified form and the bare code, so a code-only
        // query matches regardless of system.
        let text = token.rendered();
        if !texts.contains(&text) {
            texts.push(text);
        }
        if token.system.is_some() && !texts.contains(&token.code) {
            texts.push(token.code.clone());
        }
    }
    let sort = tokens
        .iter()
        .find_map(|t| t.display.clone())
        .unwrap_or_else(|| tokens[0].rendered());
    (
        SqlValue::UuidArrayOpt(Some(hashes)),
        SqlValue::TextArrayOpt(Some(texts)),
        SqlValue::TextOpt(Some(sort)),
    )
}

/// Builds the value of a plain generated column.
fn column_value(column_type: &ColumnType, param_type: SearchParamType, leaves: &[Value]) -> SqlValue {
    match column_type {
        ColumnType::Timestamp => SqlValue::TimestampOpt(
            leaves
                .iter()
                .filter_map(|v| v.as_str())
                .find_map(parse_partial_datetime),
        ),
        ColumnType::Double => SqlValue::DoubleOpt(leaves.iter().find_map(Value::as_f64)),
        ColumnType::TextArray => {
            let values: Vec<String> = leaves
                .iter()
                .filter_map(|v| scalar_string(param_type, v))
                .collect();
            SqlValue::TextArrayOpt((!values.is_empty()).then_some(values))
        }
        _ => SqlValue::TextOpt(leaves.iter().find_map(|v| scalar_string(param_type, v))),
    }
}

/// Renders one leaf to its scalar column form.
fn scalar_string(param_type: SearchParamType, value: &Value) -> Option<String> {
    if param_type == SearchParamType::Reference {
        return reference_string(value);
    }
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The literal reference string of a leaf, if it has one.
fn reference_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("reference")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Interprets a leaf as zero or more tokens.
pub fn tokens_from_value(value: &Value) -> Vec<TokenValue> {
    match value {
        Value::String(s) => vec![TokenValue {
            system: None,
            code: s.clone(),
            display: None,
        }],
        Value::Bool(b) => vec![TokenValue {
            system: None,
            code: b.to_string(),
            display: None,
        }],
        Value::Object(map) => {
            // CodeableConcept
            if let Some(codings) = map.get("coding").and_then(Value::as_array) {
                let text = map.get("text").and_then(Value::as_str);
                let mut tokens: Vec<TokenValue> =
                    codings.iter().flat_map(tokens_from_value).collect();
                if let (Some(text), Some(first)) = (text, tokens.first_mut()) {
                    if first.display.is_none() {
                        first.display = Some(text.to_string());
                    }
                }
                if tokens.is_empty() {
                    if let Some(text) = text {
                        tokens.push(TokenValue {
                            system: None,
                            code: text.to_string(),
                            display: Some(text.to_string()),
                        });
                    }
                }
                return tokens;
            }
            // Coding
            if let Some(code) = map.get("code").and_then(Value::as_str) {
                return vec![TokenValue {
                    system: map.get("system").and_then(Value::as_str).map(str::to_string),
                    code: code.to_string(),
                    display: map
                        .get("display")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }];
            }
            // Identifier / ContactPoint
            if let Some(value) = map.get("value").and_then(Value::as_str) {
                return vec![TokenValue {
                    system: map.get("system").and_then(Value::as_str).map(str::to_string),
                    code: value.to_string(),
                    display: None,
                }];
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Builds a lookup row from an object leaf; string leaves only feed the
/// sort column.
fn lookup_row(table: LookupTable, leaf: &Value) -> Option<LookupRow> {
    let map = leaf.as_object()?;
    let get = |field: &str| map.get(field).and_then(Value::as_str).map(str::to_string);

    let values = match table {
        LookupTable::HumanName => {
            let given = map
                .get("given")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .filter(|s| !s.is_empty());
            vec![Some(human_name_string(leaf)), given, get("family")]
        }
        LookupTable::Address => vec![
            Some(address_string(leaf)),
            get("city"),
            get("country"),
            get("postalCode"),
            get("state"),
            get("use"),
        ],
        LookupTable::ContactPoint => vec![get("system"), get("value"), get("use")],
        LookupTable::Identifier => vec![get("system"), get("value")],
    };
    Some(LookupRow { table, values })
}

fn identifier_row(leaf: &Value) -> Option<LookupRow> {
    lookup_row(LookupTable::Identifier, leaf)
}

/// The sort rendering of a lookup leaf.
fn lookup_string(table: LookupTable, leaf: &Value) -> String {
    if let Some(s) = leaf.as_str() {
        return s.to_string();
    }
    match table {
        LookupTable::HumanName => human_name_string(leaf),
        LookupTable::Address => address_string(leaf),
        LookupTable::ContactPoint => leaf
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        LookupTable::Identifier => leaf
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Formats a HumanName: explicit text, else "given... family".
fn human_name_string(leaf: &Value) -> String {
    if let Some(text) = leaf.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    if let Some(given) = leaf.get("given").and_then(Value::as_array) {
        parts.extend(given.iter().filter_map(Value::as_str).map(str::to_string));
    }
    if let Some(family) = leaf.get("family").and_then(Value::as_str) {
        parts.push(family.to_string());
    }
    parts.join(" ")
}

/// Formats an Address: explicit text, else "line... city state postalCode".
fn address_string(leaf: &Value) -> String {
    if let Some(text) = leaf.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    if let Some(lines) = leaf.get("line").and_then(Value::as_array) {
        parts.extend(lines.iter().filter_map(Value::as_str).map(str::to_string));
    }
    for field in ["city", "state", "postalCode"] {
        if let Some(v) = leaf.get(field).and_then(Value::as_str) {
            parts.push(v.to_string());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SearchParameterRegistry {
        SearchParameterRegistry::new()
    }

    fn patient() -> Resource {
        Resource::from_value(json!({
            "resourceType": "Patient",
            "id": "b6a2f8c4-0d3e-4a1b-9c7f-2e5d8a1b3c4d",
            "name": [{"family": "Chalmers", "given": ["Peter", "James"]}],
            "gender": "male",
            "birthDate": "1974-12-25",
            "identifier": [{"system": "http://hospital.org/mrn", "value": "12345"}],
            "meta": {"tag": [{"system": "http://ns", "code": "vip", "display": "VIP"}]}
        }))
        .unwrap()
    }

    #[test]
    fn test_patient_columns() {
        let rows = build(&registry(), &patient());

        let find = |name: &str| {
            rows.columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };

        assert!(matches!(
            find("birthdate"),
            Some(SqlValue::TimestampOpt(Some(_)))
        ));
        match find("__genderText") {
            Some(SqlValue::TextArrayOpt(Some(values))) => assert_eq!(values, vec!["male"]),
            other => panic!("unexpected gender text column: {:?}", other),
        }
        match find("__nameSort") {
            Some(SqlValue::TextOpt(Some(sort))) => assert_eq!(sort, "Peter James Chalmers"),
            other => panic!("unexpected name sort column: {:?}", other),
        }
    }

    #[test]
    fn test_metadata_and_shared_tokens() {
        let rows = build(&registry(), &patient());

        let tag_text = rows
            .columns
            .iter()
            .find(|(n, _)| n == "__tagText")
            .map(|(_, v)| v.clone());
        match tag_text {
            Some(SqlValue::TextArrayOpt(Some(values))) => {
                assert_eq!(values, vec!["http://ns|vip", "vip"]);
            }
            other => panic!("unexpected tag text: {:?}", other),
        }

        // The shared union carries gender, the identifier, and the tag.
        let shared = rows
            .columns
            .iter()
            .find(|(n, _)| n == "__sharedTokensText")
            .map(|(_, v)| v.clone());
        match shared {
            Some(SqlValue::TextArrayOpt(Some(values))) => {
                assert!(values.contains(&"male".to_string()));
                assert!(values.contains(&"http://hospital.org/mrn|12345".to_string()));
                assert!(values.contains(&"http://ns|vip".to_string()));
            }
            other => panic!("unexpected shared tokens: {:?}", other),
        }
    }

    #[test]
    fn test_lookup_rows() {
        let rows = build(&registry(), &patient());

        let name_rows: Vec<_> = rows
            .lookup_rows
            .iter()
            .filter(|r| r.table == LookupTable::HumanName)
            .collect();
        assert_eq!(name_rows.len(), 1);
        assert_eq!(
            name_rows[0].values,
            vec![
                Some("Peter James Chalmers".to_string()),
                Some("Peter James".to_string()),
                Some("Chalmers".to_string()),
            ]
        );

        let identifier_rows: Vec<_> = rows
            .lookup_rows
            .iter()
            .filter(|r| r.table == LookupTable::Identifier)
            .collect();
        assert_eq!(identifier_rows.len(), 1);
        assert_eq!(
            identifier_rows[0].values,
            vec![
                Some("http://hospital.org/mrn".to_string()),
                Some("12345".to_string()),
            ]
        );
    }

    #[test]
    fn test_reference_rows_and_compartments() {
        let patient_id = Uuid::new_v4();
        let observation = Resource::from_value(json!({
            "resourceType": "Observation",
            "id": Uuid::new_v4().to_string(),
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
            "subject": {"reference": format!("Patient/{}", patient_id)}
        }))
        .unwrap();

        let rows = build(&registry(), &observation);

        assert!(rows
            .reference_rows
            .iter()
            .any(|r| r.code == "subject" && r.target_id == patient_id));
        assert_eq!(rows.compartments, vec![patient_id]);
    }

    #[test]
    fn test_non_uuid_reference_targets_skipped() {
        let observation = Resource::from_value(json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"text": "BP"},
            "subject": {"reference": "Patient/legacy-mrn-9"}
        }))
        .unwrap();

        let rows = build(&registry(), &observation);
        assert!(rows.reference_rows.is_empty());
        // The reference column itself still stores the literal.
        let subject = rows
            .columns
            .iter()
            .find(|(n, _)| n == "subject")
            .map(|(_, v)| v.clone());
        match subject {
            Some(SqlValue::TextOpt(Some(s))) => assert_eq!(s, "Patient/legacy-mrn-9"),
            other => panic!("unexpected subject column: {:?}", other),
        }
    }

    #[test]
    fn test_patient_own_compartment() {
        let rows = build(&registry(), &patient());
        assert_eq!(
            rows.compartments,
            vec![Uuid::parse_str("b6a2f8c4-0d3e-4a1b-9c7f-2e5d8a1b3c4d").unwrap()]
        );
    }

    #[test]
    fn test_tokens_from_codeable_concept() {
        let tokens = tokens_from_value(&json!({
            "coding": [
                {"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"},
                {"system": "http://snomed.info/sct", "code": "364075005"}
            ],
            "text": "Heart rate"
        }));
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].display.as_deref(), Some("Heart rate"));
        assert_eq!(tokens[1].rendered(), "http://snomed.info/sct|364075005");
    }
}
