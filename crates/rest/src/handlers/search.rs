//! Search interactions: `GET [base]/[type]?params` and
//! `POST [base]/[type]/_search` with a form body.

use axum::Json;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::envelope::search_envelope;
use crate::error::RestResult;
use crate::state::{AppState, project_context};

/// Handles `GET /{type}`.
pub async fn search_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> RestResult<Response> {
    execute(state, resource_type, pairs, headers).await
}

/// Handles `POST /{type}/_search`.
pub async fn search_post_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    Form(pairs): Form<Vec<(String, String)>>,
) -> RestResult<Response> {
    execute(state, resource_type, pairs, headers).await
}

async fn execute(
    state: AppState,
    resource_type: String,
    pairs: Vec<(String, String)>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let request = super::parse_search(&state, &resource_type, &pairs)?;

    let page = state.repo().search(&ctx, &request).await?;
    debug!(
        resource_type = %resource_type,
        matches = page.matches().count(),
        total = ?page.total,
        "search executed"
    );

    let envelope = search_envelope(state.base_url(), &request, &pairs, &page);
    Ok((StatusCode::OK, Json(envelope)).into_response())
}
