//! Version read: `GET [base]/[type]/[id]/_history/[vid]`.
//!
//! A tombstone version answers 410 Gone.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::{RestError, RestResult};
use crate::handlers::read::parse_id;
use crate::headers::resource_headers;
use crate::state::{AppState, project_context};

/// Handles `GET /{type}/{id}/_history/{vid}`.
pub async fn vread_handler(
    State(state): State<AppState>,
    Path((resource_type, id, version_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id(&resource_type, &id)?;
    let version_id = Uuid::parse_str(&version_id).map_err(|_| RestError::NotFound {
        message: format!(
            "version not found: {}/{}/_history/{}",
            resource_type, id, version_id
        ),
    })?;

    let resource = state
        .repo()
        .read_version(&ctx, &resource_type, id, version_id)
        .await?;
    let header_map = resource_headers(&resource);
    Ok((StatusCode::OK, header_map, Json(resource.into_value())).into_response())
}
