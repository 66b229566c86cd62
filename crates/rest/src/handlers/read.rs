//! Read interaction: `GET [base]/[type]/[id]`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::{RestError, RestResult};
use crate::headers::resource_headers;
use crate::state::{AppState, project_context};

/// Handles `GET /{type}/{id}`.
pub async fn read_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id(&resource_type, &id)?;

    let resource = state.repo().read(&ctx, &resource_type, id).await?;
    let header_map = resource_headers(&resource);
    Ok((StatusCode::OK, header_map, Json(resource.into_value())).into_response())
}

/// Parses a path id, mapping malformed ids to not-found rather than
/// revealing id shape expectations.
pub(crate) fn parse_id(resource_type: &str, id: &str) -> RestResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| RestError::NotFound {
        message: format!("resource not found: {}/{}", resource_type, id),
    })
}
