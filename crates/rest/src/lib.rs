//! Atrium FHIR Server REST layer.
//!
//! Exposes the persistence engine through the FHIR RESTful API: CRUD and
//! version interactions, search with includes and paging, history,
//! batch/transaction bundles, `$everything`, and the WebSocket
//! subscription channel. Errors surface as OperationOutcome documents
//! with the matching HTTP status.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod headers;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{RestError, RestResult};
pub use routes::create_app;
pub use state::AppState;

use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber from a log-level directive.
pub fn init_logging(directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
