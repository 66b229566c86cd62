//! Create interaction: `POST [base]/[type]`.
//!
//! The optional `If-None-Exist` header turns the interaction into a
//! conditional create: an existing match is returned unmodified with
//! 200, more than one match fails with 412.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;

use atrium_fhir::{Resource, outcome};

use crate::error::{RestError, RestResult};
use crate::handlers::decode_query_pairs;
use crate::headers::{ReturnPreference, if_none_exist, location, prefer_return, resource_headers};
use crate::state::{AppState, project_context};

/// Handles `POST /{type}`.
pub async fn create_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let resource = Resource::from_value_of_type(body, &resource_type)
        .map_err(|e| RestError::bad_request(e.to_string()))?;
    let prefer = prefer_return(&headers);

    if let Some(query) = if_none_exist(&headers) {
        debug!(resource_type = %resource_type, query = %query, "conditional create");
        let pairs = decode_query_pairs(&query);
        let request = super::parse_search(&state, &resource_type, &pairs)?;
        let (written, created) = state
            .repo()
            .conditional_create(&ctx, resource, &request)
            .await?;
        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        return build_write_response(&state, status, &written, prefer, created);
    }

    let written = state.repo().create(&ctx, resource, None).await?;
    debug!(
        resource_type = %resource_type,
        id = written.id().unwrap_or("-"),
        "resource created"
    );
    build_write_response(&state, StatusCode::CREATED, &written, prefer, true)
}

/// Shared response assembly for writes.
pub(crate) fn build_write_response(
    state: &AppState,
    status: StatusCode,
    resource: &Resource,
    prefer: ReturnPreference,
    with_location: bool,
) -> RestResult<Response> {
    let mut header_map = resource_headers(resource);
    if with_location {
        if let Some(location) = location(state.base_url(), resource) {
            if let Ok(value) = location.parse() {
                header_map.insert(header::LOCATION, value);
            }
        }
    }

    Ok(match prefer {
        ReturnPreference::Minimal => (status, header_map).into_response(),
        ReturnPreference::OperationOutcome => {
            let outcome = outcome::operation_outcome(
                "information",
                "informational",
                &format!(
                    "{}/{} written",
                    resource.resource_type(),
                    resource.id().unwrap_or("-")
                ),
            );
            (status, header_map, Json(outcome)).into_response()
        }
        ReturnPreference::Representation => {
            (status, header_map, Json(resource.to_value())).into_response()
        }
    })
}
