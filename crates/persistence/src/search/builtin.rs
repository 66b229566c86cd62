//! Builtin search parameter catalog.
//!
//! The embedded equivalent of the standard SearchParameter definitions for
//! the kinds the server supports. Loaded into the registry at startup.

use crate::types::SearchParamType;

use super::registry::{ColumnType, IndexStrategy, LookupTable, SearchParameterImpl};

fn token(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Token,
        expression,
        IndexStrategy::TokenColumn,
        ColumnType::Text,
    )
}

fn reference(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Reference,
        expression,
        IndexStrategy::Column,
        ColumnType::Text,
    )
}

fn date(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Date,
        expression,
        IndexStrategy::Column,
        ColumnType::Timestamp,
    )
}

fn string_column(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::String,
        expression,
        IndexStrategy::Column,
        ColumnType::Text,
    )
}

fn uri(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Uri,
        expression,
        IndexStrategy::Column,
        ColumnType::Text,
    )
}

fn number(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Number,
        expression,
        IndexStrategy::Column,
        ColumnType::Double,
    )
}

fn quantity(code: &str, expression: &str) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::Quantity,
        expression,
        IndexStrategy::Column,
        ColumnType::Double,
    )
}

fn lookup(
    code: &str,
    expression: &str,
    table: LookupTable,
    column: &'static str,
) -> SearchParameterImpl {
    SearchParameterImpl::new(
        code,
        SearchParamType::String,
        expression,
        IndexStrategy::Lookup { table, column },
        ColumnType::Text,
    )
}

fn name_params(kind: &str) -> Vec<SearchParameterImpl> {
    vec![
        lookup("name", &format!("{kind}.name"), LookupTable::HumanName, "name")
            .with_base([kind])
            .with_array(),
        lookup(
            "family",
            &format!("{kind}.name.family"),
            LookupTable::HumanName,
            "family",
        )
        .with_base([kind])
        .with_array(),
        lookup(
            "given",
            &format!("{kind}.name.given"),
            LookupTable::HumanName,
            "given",
        )
        .with_base([kind])
        .with_array(),
    ]
}

fn address_params(kind: &str) -> Vec<SearchParameterImpl> {
    vec![
        lookup(
            "address",
            &format!("{kind}.address"),
            LookupTable::Address,
            "address",
        )
        .with_base([kind])
        .with_array(),
        lookup(
            "address-city",
            &format!("{kind}.address.city"),
            LookupTable::Address,
            "city",
        )
        .with_base([kind])
        .with_array(),
        lookup(
            "address-state",
            &format!("{kind}.address.state"),
            LookupTable::Address,
            "state",
        )
        .with_base([kind])
        .with_array(),
        lookup(
            "address-postalcode",
            &format!("{kind}.address.postalCode"),
            LookupTable::Address,
            "postalCode",
        )
        .with_base([kind])
        .with_array(),
        lookup(
            "address-country",
            &format!("{kind}.address.country"),
            LookupTable::Address,
            "country",
        )
        .with_base([kind])
        .with_array(),
    ]
}

/// Returns the builtin parameter catalog.
pub fn builtin_parameters() -> Vec<SearchParameterImpl> {
    let mut params = Vec::new();

    // Patient
    params.extend(name_params("Patient"));
    params.extend(address_params("Patient"));
    params.extend([
        token("identifier", "Patient.identifier")
            .with_base(["Patient"])
            .with_array(),
        token("gender", "Patient.gender").with_base(["Patient"]),
        token("active", "Patient.active").with_base(["Patient"]),
        date("birthdate", "Patient.birthDate").with_base(["Patient"]),
        lookup(
            "telecom",
            "Patient.telecom",
            LookupTable::ContactPoint,
            "value",
        )
        .with_base(["Patient"])
        .with_array(),
        reference("general-practitioner", "Patient.generalPractitioner")
            .with_base(["Patient"])
            .with_array(),
        reference("organization", "Patient.managingOrganization").with_base(["Patient"]),
    ]);

    // Practitioner
    params.extend(name_params("Practitioner"));
    params.extend(address_params("Practitioner"));
    params.extend([
        token("identifier", "Practitioner.identifier")
            .with_base(["Practitioner"])
            .with_array(),
        token("gender", "Practitioner.gender").with_base(["Practitioner"]),
        token("active", "Practitioner.active").with_base(["Practitioner"]),
        lookup(
            "telecom",
            "Practitioner.telecom",
            LookupTable::ContactPoint,
            "value",
        )
        .with_base(["Practitioner"])
        .with_array(),
    ]);

    // Organization
    params.extend(address_params("Organization"));
    params.extend([
        string_column("name", "Organization.name").with_base(["Organization"]),
        token("identifier", "Organization.identifier")
            .with_base(["Organization"])
            .with_array(),
        token("type", "Organization.type").with_base(["Organization"]).with_array(),
        token("active", "Organization.active").with_base(["Organization"]),
        reference("partof", "Organization.partOf").with_base(["Organization"]),
    ]);

    // Observation
    params.extend([
        token("code", "Observation.code").with_base(["Observation"]).with_array(),
        token("category", "Observation.category")
            .with_base(["Observation"])
            .with_array(),
        token("status", "Observation.status").with_base(["Observation"]),
        token("identifier", "Observation.identifier")
            .with_base(["Observation"])
            .with_array(),
        date("date", "Observation.effective.as(dateTime)").with_base(["Observation"]),
        reference("subject", "Observation.subject").with_base(["Observation"]),
        reference("patient", "Observation.subject.where(resolve() is Patient)")
            .with_base(["Observation"])
            .with_column_name("subject"),
        reference("performer", "Observation.performer")
            .with_base(["Observation"])
            .with_array(),
        reference("encounter", "Observation.encounter").with_base(["Observation"]),
        quantity("value-quantity", "Observation.value.as(Quantity).value")
            .with_base(["Observation"]),
    ]);

    // Condition
    params.extend([
        token("code", "Condition.code").with_base(["Condition"]).with_array(),
        token("clinical-status", "Condition.clinicalStatus").with_base(["Condition"]),
        token("severity", "Condition.severity").with_base(["Condition"]),
        token("identifier", "Condition.identifier")
            .with_base(["Condition"])
            .with_array(),
        reference("subject", "Condition.subject").with_base(["Condition"]),
        reference("patient", "Condition.subject.where(resolve() is Patient)")
            .with_base(["Condition"])
            .with_column_name("subject"),
        reference("encounter", "Condition.encounter").with_base(["Condition"]),
        date("onset-date", "Condition.onset.as(dateTime)").with_base(["Condition"]),
        date("recorded-date", "Condition.recordedDate").with_base(["Condition"]),
    ]);

    // Encounter
    params.extend([
        token("status", "Encounter.status").with_base(["Encounter"]),
        token("class", "Encounter.class").with_base(["Encounter"]),
        token("identifier", "Encounter.identifier")
            .with_base(["Encounter"])
            .with_array(),
        reference("subject", "Encounter.subject").with_base(["Encounter"]),
        reference("patient", "Encounter.subject.where(resolve() is Patient)")
            .with_base(["Encounter"])
            .with_column_name("subject"),
        reference("service-provider", "Encounter.serviceProvider").with_base(["Encounter"]),
        date("date", "Encounter.period.start").with_base(["Encounter"]),
    ]);

    // DiagnosticReport
    params.extend([
        token("code", "DiagnosticReport.code")
            .with_base(["DiagnosticReport"])
            .with_array(),
        token("status", "DiagnosticReport.status").with_base(["DiagnosticReport"]),
        token("identifier", "DiagnosticReport.identifier")
            .with_base(["DiagnosticReport"])
            .with_array(),
        reference("subject", "DiagnosticReport.subject").with_base(["DiagnosticReport"]),
        reference("patient", "DiagnosticReport.subject.where(resolve() is Patient)")
            .with_base(["DiagnosticReport"])
            .with_column_name("subject"),
        reference("encounter", "DiagnosticReport.encounter").with_base(["DiagnosticReport"]),
        reference("result", "DiagnosticReport.result")
            .with_base(["DiagnosticReport"])
            .with_array(),
        date("issued", "DiagnosticReport.issued").with_base(["DiagnosticReport"]),
    ]);

    // ServiceRequest
    params.extend([
        token("code", "ServiceRequest.code").with_base(["ServiceRequest"]).with_array(),
        token("status", "ServiceRequest.status").with_base(["ServiceRequest"]),
        token("intent", "ServiceRequest.intent").with_base(["ServiceRequest"]),
        token("identifier", "ServiceRequest.identifier")
            .with_base(["ServiceRequest"])
            .with_array(),
        reference("subject", "ServiceRequest.subject").with_base(["ServiceRequest"]),
        reference("patient", "ServiceRequest.subject.where(resolve() is Patient)")
            .with_base(["ServiceRequest"])
            .with_column_name("subject"),
        reference("requester", "ServiceRequest.requester").with_base(["ServiceRequest"]),
        date("authored", "ServiceRequest.authoredOn").with_base(["ServiceRequest"]),
    ]);

    // RiskAssessment
    params.extend([
        number("probability", "RiskAssessment.prediction.probability.as(decimal)")
            .with_base(["RiskAssessment"]),
        reference("subject", "RiskAssessment.subject").with_base(["RiskAssessment"]),
        reference("patient", "RiskAssessment.subject.where(resolve() is Patient)")
            .with_base(["RiskAssessment"])
            .with_column_name("subject"),
        date("date", "RiskAssessment.occurrence.as(dateTime)").with_base(["RiskAssessment"]),
    ]);

    // Subscription
    params.extend([
        token("status", "Subscription.status").with_base(["Subscription"]),
        uri("url", "Subscription.channel.endpoint").with_base(["Subscription"]),
        string_column("criteria", "Subscription.criteria").with_base(["Subscription"]),
    ]);

    // Project
    params.extend([
        string_column("name", "Project.name").with_base(["Project"]),
        token("identifier", "Project.identifier").with_base(["Project"]).with_array(),
    ]);

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_column_for_patient_alias() {
        let params = builtin_parameters();
        let patient = params
            .iter()
            .find(|p| p.code == "patient" && p.resource_types == ["Observation"])
            .unwrap();
        // "patient" is an alias over the subject reference column.
        assert_eq!(patient.column_name, "subject");
    }

    #[test]
    fn test_no_duplicate_kind_code_pairs() {
        let params = builtin_parameters();
        let mut seen = std::collections::HashSet::new();
        for param in &params {
            for kind in &param.resource_types {
                assert!(
                    seen.insert((kind.clone(), param.code.clone())),
                    "duplicate parameter {} for {}",
                    param.code,
                    kind
                );
            }
        }
    }
}
