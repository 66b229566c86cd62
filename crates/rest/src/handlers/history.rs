//! History interactions: `GET [base]/[type]/[id]/_history` and
//! `GET [base]/[type]/_history`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use atrium_persistence::types::{HistoryOptions, parse_partial_datetime};

use crate::envelope::history_envelope;
use crate::error::{RestError, RestResult};
use crate::handlers::read::parse_id;
use crate::state::{AppState, project_context};

/// Handles `GET /{type}/{id}/_history`.
pub async fn instance_history_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let id = parse_id(&resource_type, &id)?;
    let options = history_options(&pairs)?;

    let entries = state
        .repo()
        .read_history(&ctx, &resource_type, id, &options)
        .await?;
    let envelope = history_envelope(
        state.base_url(),
        &format!("{}/{}/_history", resource_type, id),
        &entries,
    );
    Ok((StatusCode::OK, Json(envelope)).into_response())
}

/// Handles `GET /{type}/_history`.
pub async fn type_history_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> RestResult<Response> {
    let ctx = project_context(&headers)?;
    let options = history_options(&pairs)?;

    let entries = state
        .repo()
        .read_type_history(&ctx, &resource_type, &options)
        .await?;
    let envelope = history_envelope(
        state.base_url(),
        &format!("{}/_history", resource_type),
        &entries,
    );
    Ok((StatusCode::OK, Json(envelope)).into_response())
}

fn history_options(pairs: &[(String, String)]) -> RestResult<HistoryOptions> {
    let mut options = HistoryOptions::default();
    for (key, value) in pairs {
        match key.as_str() {
            "_count" => {
                options.count = Some(
                    value
                        .parse()
                        .map_err(|_| RestError::bad_request("_count must be a number"))?,
                );
            }
            "_since" => {
                options.since = Some(parse_partial_datetime(value).ok_or_else(|| {
                    RestError::bad_request("_since must be a date or instant")
                })?);
            }
            _ => {}
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_options() {
        let pairs = vec![
            ("_count".to_string(), "10".to_string()),
            ("_since".to_string(), "2024-01-01".to_string()),
        ];
        let options = history_options(&pairs).unwrap();
        assert_eq!(options.count, Some(10));
        assert!(options.since.is_some());
    }

    #[test]
    fn test_history_options_rejects_garbage() {
        assert!(history_options(&[("_count".to_string(), "x".to_string())]).is_err());
        assert!(history_options(&[("_since".to_string(), "x".to_string())]).is_err());
    }
}
