//! Route configuration.
//!
//! The uniform path structure is `/{type}[/{id}[/_history[/{vid}]]]`
//! plus `/{type}/_search`, `/Patient/{id}/$everything`, the system-level
//! batch endpoint, and the WebSocket subscription channel.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::subscription_ws_handler;
use crate::handlers::{
    batch::batch_handler,
    capabilities::{healthcheck_handler, metadata_handler},
    create::create_handler,
    delete::{conditional_delete_handler, delete_handler},
    everything::everything_handler,
    history::{instance_history_handler, type_history_handler},
    read::read_handler,
    search::{search_handler, search_post_handler},
    update::{conditional_update_handler, update_handler},
    vread::vread_handler,
};
use crate::state::AppState;

/// Builds the application router.
pub fn create_app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config().request_timeout_secs);

    Router::new()
        // System level
        .route("/", post(batch_handler))
        .route("/metadata", get(metadata_handler))
        .route("/healthcheck", get(healthcheck_handler))
        .route("/ws/subscriptions-r4", get(subscription_ws_handler))
        // Operations
        .route("/Patient/{id}/$everything", get(everything_handler))
        // Type level
        .route(
            "/{type}",
            get(search_handler)
                .post(create_handler)
                .put(conditional_update_handler)
                .delete(conditional_delete_handler),
        )
        .route("/{type}/_search", post(search_post_handler))
        .route("/{type}/_history", get(type_history_handler))
        // Instance level
        .route(
            "/{type}/{id}",
            get(read_handler).put(update_handler).delete(delete_handler),
        )
        .route("/{type}/{id}/_history", get(instance_history_handler))
        .route("/{type}/{id}/_history/{vid}", get(vread_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
