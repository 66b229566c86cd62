//! Batch and transaction processing: `POST [base]/` with a Bundle of
//! type `batch` or `transaction`.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::{RestError, RestResult};
use crate::state::{AppState, project_context};

/// Handles `POST /`.
pub async fn batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(bundle): Json<Value>,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;

    match bundle.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => {}
        Some(other) => {
            return Err(RestError::bad_request(format!(
                "expected Bundle, got {}",
                other
            )));
        }
        None => return Err(RestError::bad_request("request must be a Bundle resource")),
    }

    let response = state.repo().process_bundle(&ctx, &bundle).await?;
    debug!(
        bundle_type = bundle.get("type").and_then(|v| v.as_str()).unwrap_or("-"),
        entries = bundle
            .get("entry")
            .and_then(|v| v.as_array())
            .map(|v| v.len())
            .unwrap_or(0),
        "bundle processed"
    );
    Ok((StatusCode::OK, Json(response)).into_response())
}
