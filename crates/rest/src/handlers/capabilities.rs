//! Server metadata: `GET [base]/metadata` and the liveness check.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::state::AppState;

/// Handles `GET /metadata`, generating the CapabilityStatement from the
/// search parameter registry.
pub async fn metadata_handler(State(state): State<AppState>) -> Response {
    let registry = state.repo().registry();
    let rest_resources: Vec<Value> = registry
        .resource_types()
        .into_iter()
        .map(|resource_type| {
            let search_params: Vec<Value> = registry
                .params_for(&resource_type)
                .iter()
                .map(|param| {
                    json!({
                        "name": param.code,
                        "type": param.param_type.to_string()
                    })
                })
                .collect();
            json!({
                "type": resource_type,
                "interaction": [
                    {"code": "read"},
                    {"code": "vread"},
                    {"code": "update"},
                    {"code": "delete"},
                    {"code": "history-instance"},
                    {"code": "history-type"},
                    {"code": "create"},
                    {"code": "search-type"}
                ],
                "searchParam": search_params
            })
        })
        .collect();

    let statement = json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json"],
        "software": {
            "name": "Atrium FHIR Server",
            "version": crate::VERSION
        },
        "implementation": {
            "description": "Atrium FHIR Server",
            "url": state.base_url()
        },
        "rest": [{
            "mode": "server",
            "resource": rest_resources,
            "interaction": [
                {"code": "transaction"},
                {"code": "batch"},
                {"code": "history-system"}
            ]
        }]
    });
    (StatusCode::OK, Json(statement)).into_response()
}

/// Handles `GET /healthcheck`.
pub async fn healthcheck_handler() -> Response {
    (
        StatusCode::OK,
        Json(json!({"ok": true, "version": crate::VERSION})),
    )
        .into_response()
}
