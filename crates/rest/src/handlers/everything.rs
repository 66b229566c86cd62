//! Patient `$everything`: `GET [base]/Patient/[id]/$everything`.
//!
//! Returns the focal Patient plus every resource in its compartment.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::RestResult;
use crate::handlers::read::parse_id;
use crate::state::{AppState, project_context};

/// Handles `GET /Patient/{id}/$everything`.
pub async fn everything_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id("Patient", &id)?;

    let resources = state.repo().everything(&ctx, id).await?;
    let entries: Vec<serde_json::Value> = resources
        .iter()
        .map(|resource| {
            json!({
                "fullUrl": resource.id().map(|rid| {
                    format!("{}/{}/{}", state.base_url(), resource.resource_type(), rid)
                }),
                "resource": resource.to_value(),
                "search": {"mode": "match"}
            })
        })
        .collect();

    let envelope = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries
    });
    Ok((StatusCode::OK, Json(envelope)).into_response())
}
