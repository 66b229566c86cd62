//! End-to-end coherence of the search pipeline: the columns the row
//! builder writes are the columns the schema declares and the planner
//! queries.

use serde_json::json;
use uuid::Uuid;

use atrium_fhir::Resource;
use atrium_persistence::query::parser::QueryParser;
use atrium_persistence::query::planner::QueryPlanner;
use atrium_persistence::schema::{RESOURCE_TYPES, SchemaModel};
use atrium_persistence::search::rows;
use atrium_persistence::search::SearchParameterRegistry;
use atrium_persistence::types::TotalMode;

fn registry() -> SearchParameterRegistry {
    SearchParameterRegistry::new()
}

#[test]
fn indexed_columns_are_declared_by_the_schema() {
    let registry = registry();
    let model = SchemaModel::new(&registry);

    let observation = Resource::from_value(json!({
        "resourceType": "Observation",
        "id": Uuid::new_v4().to_string(),
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
        "effectiveDateTime": "2023-04-01T10:00:00Z",
        "valueQuantity": {"value": 72.0, "unit": "beats/min"},
        "subject": {"reference": format!("Patient/{}", Uuid::new_v4())},
        "meta": {"tag": [{"system": "http://ns", "code": "t"}]}
    }))
    .unwrap();

    let indexed = rows::build(&registry, &observation);
    let declared: Vec<String> = model
        .search_columns("Observation")
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    for (name, _) in &indexed.columns {
        assert!(
            declared.contains(name),
            "row builder produced undeclared column '{}'",
            name
        );
    }
    // And every declared column gets a value, so the UPSERT never has to
    // special-case absent parameters.
    assert_eq!(indexed.columns.len(), declared.len());
}

#[test]
fn every_kind_has_coherent_ddl() {
    let registry = registry();
    let model = SchemaModel::new(&registry);

    for resource_type in RESOURCE_TYPES {
        let main = model.main_table_ddl(resource_type);
        for (name, column_type) in model.search_columns(resource_type) {
            assert!(
                main.contains(&format!("\"{}\" {}", name, column_type.ddl())),
                "{} DDL is missing column {}",
                resource_type,
                name
            );
        }
        assert!(!model.index_ddl(resource_type).is_empty());
    }
}

#[test]
fn parsed_query_plans_against_generated_columns() {
    let registry = registry();
    let parser = QueryParser::new(&registry);
    let planner = QueryPlanner::new(&registry);

    let pairs = vec![
        ("gender".to_string(), "male,female".to_string()),
        ("_count".to_string(), "2".to_string()),
        ("_sort".to_string(), "-birthdate".to_string()),
        ("_total".to_string(), "accurate".to_string()),
    ];
    let request = parser.parse("Patient", &pairs).unwrap();
    assert_eq!(request.count, 2);
    assert_eq!(request.total, TotalMode::Accurate);

    let planned = planner.plan(&request, None).unwrap();
    assert!(planned.sql.contains("\"__genderText\""));
    assert!(planned.sql.contains("ORDER BY \"birthdate\" DESC"));
    assert!(planned.sql.contains("\"deleted\" = false"));

    let count = planner.plan_count(&request, None).unwrap();
    assert!(count.sql.starts_with("SELECT COUNT(*)"));
}

#[test]
fn chained_parameter_plans_a_lookup_subquery() {
    let registry = registry();
    let parser = QueryParser::new(&registry);
    let planner = QueryPlanner::new(&registry);

    let pairs = vec![("subject:Patient.name".to_string(), "Chalmers".to_string())];
    let request = parser.parse("Observation", &pairs).unwrap();
    let planned = planner.plan(&request, None).unwrap();

    assert!(planned.sql.contains("'Patient/' || \"id\"::text"));
    assert!(planned.sql.contains("\"HumanName\""));
}

#[test]
fn token_hash_and_text_agree_between_writer_and_matcher() {
    let registry = registry();
    let patient = Resource::from_value(json!({
        "resourceType": "Patient",
        "id": Uuid::new_v4().to_string(),
        "identifier": [{"system": "http://ns", "value": "abc"}]
    }))
    .unwrap();

    let indexed = rows::build(&registry, &patient);
    let text = indexed
        .columns
        .iter()
        .find(|(name, _)| name == "__identifierText")
        .map(|(_, value)| value.clone());

    // The stored text forms are exactly what the planner's array-overlap
    // matches against: qualified and bare.
    match text {
        Some(atrium_persistence::sql::SqlValue::TextArrayOpt(Some(values))) => {
            assert!(values.contains(&"http://ns|abc".to_string()));
            assert!(values.contains(&"abc".to_string()));
        }
        other => panic!("unexpected identifier text column: {:?}", other),
    }
}
