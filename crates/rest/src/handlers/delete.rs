//! Delete interactions: `DELETE [base]/[type]/[id]` and the conditional
//! `DELETE [base]/[type]?query`.

use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use atrium_fhir::outcome;
use atrium_persistence::query::parser::MAX_COUNT;

use crate::error::{RestError, RestResult};
use crate::handlers::decode_query_pairs;
use crate::handlers::read::parse_id;
use crate::state::{AppState, project_context};

/// Handles `DELETE /{type}/{id}`.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id(&resource_type, &id)?;

    state.repo().delete(&ctx, &resource_type, id).await?;
    debug!(resource_type = %resource_type, id = %id, "resource deleted");
    Ok((StatusCode::OK, Json(outcome::all_ok())).into_response())
}

/// Handles `DELETE /{type}?query` (conditional delete).
pub async fn conditional_delete_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let query = query.ok_or_else(|| {
        RestError::bad_request("conditional delete requires search parameters")
    })?;

    let pairs = decode_query_pairs(&query);
    let mut request = super::parse_search(&state, &resource_type, &pairs)?;
    // Every match is deleted, not one page of them.
    request.count = MAX_COUNT;

    let count = state.repo().conditional_delete(&ctx, &request).await?;
    debug!(resource_type = %resource_type, count, "conditional delete");
    let outcome = outcome::operation_outcome(
        "information",
        "informational",
        &format!("deleted {} resources", count),
    );
    Ok((StatusCode::OK, Json(outcome)).into_response())
}
