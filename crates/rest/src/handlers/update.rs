//! Update interactions.
//!
//! `PUT [base]/[type]/[id]` updates (or brings into existence) a
//! resource at a caller-chosen id, honoring `If-Match` optimistic
//! locking. `PUT [base]/[type]?query` is a conditional update.

use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tracing::debug;

use atrium_fhir::Resource;
use atrium_persistence::error::{ResourceError, StorageError};

use crate::error::{RestError, RestResult};
use crate::handlers::create::build_write_response;
use crate::handlers::decode_query_pairs;
use crate::handlers::read::parse_id;
use crate::headers::{if_match_precondition, prefer_return};
use crate::state::{AppState, project_context};

/// Handles `PUT /{type}/{id}`.
pub async fn update_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id(&resource_type, &id)?;
    let prefer = prefer_return(&headers);
    let precondition = if_match_precondition(&headers)?;

    let mut resource = Resource::from_value_of_type(body, &resource_type)
        .map_err(|e| RestError::bad_request(e.to_string()))?;
    if let Some(body_id) = resource.id() {
        if body_id != id.to_string() {
            return Err(RestError::bad_request(
                "resource id does not match the request URL",
            ));
        }
    }
    resource.set_id(&id);

    match state.repo().update(&ctx, resource.clone(), precondition).await {
        Ok(written) => {
            debug!(resource_type = %resource_type, id = %id, "resource updated");
            build_write_response(&state, StatusCode::OK, &written, prefer, true)
        }
        // Update-as-create: an id that does not exist (or was deleted)
        // comes into existence at the caller's id, unless the caller
        // demanded a specific current version.
        Err(StorageError::Resource(
            ResourceError::NotFound { .. } | ResourceError::Gone { .. },
        )) if precondition.is_none() => {
            let written = state.repo().create(&ctx, resource, Some(id)).await?;
            debug!(resource_type = %resource_type, id = %id, "resource created via update");
            build_write_response(&state, StatusCode::CREATED, &written, prefer, true)
        }
        Err(other) => Err(other.into()),
    }
}

/// Handles `PUT /{type}?query` (conditional update).
pub async fn conditional_update_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let prefer = prefer_return(&headers);
    let query = query.ok_or_else(|| {
        RestError::bad_request("conditional update requires search parameters")
    })?;

    let resource = Resource::from_value_of_type(body, &resource_type)
        .map_err(|e| RestError::bad_request(e.to_string()))?;

    let pairs = decode_query_pairs(&query);
    let request = super::parse_search(&state, &resource_type, &pairs)?;

    let (written, created) = state
        .repo()
        .conditional_update(&ctx, resource, &request)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    build_write_response(&state, status, &written, prefer, created)
}
