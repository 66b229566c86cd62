//! Atrium FHIR Server Persistence Layer
//!
//! This crate is the persistence engine and search/indexing pipeline of the
//! Atrium FHIR Server. It turns resources into durable PostgreSQL rows and
//! derived indexes, and answers rich multi-parameter queries against them.
//!
//! # Architecture
//!
//! - [`schema`] - per-kind main/history/references tables and the four
//!   shared lookup tables, with DDL emission and index management
//! - [`search`] - the search parameter registry, the expression-driven
//!   value extractor, and the row/lookup builders that feed the write path
//! - [`query`] - the query-string parser and the SQL planner
//! - [`repo`] - the repository: create/read/update/delete/history/search
//!   with optimistic concurrency, soft delete, conditional variants,
//!   `$everything`, includes, the bundle processor, and the read cache
//! - [`subscriptions`] - the active-subscription registry and per-write
//!   matcher that fans out notifications to bound sessions
//! - [`audit`] - best-effort audit event emission
//! - [`error`] - error taxonomy for all operations
//!
//! # Storage model
//!
//! Every kind gets a main table (latest version, search columns), an
//! append-only history table, and a references table. Four process-wide
//! lookup tables (`HumanName`, `Address`, `ContactPoint`, `Identifier`)
//! carry repeating complex values for rich querying. All writes for one
//! operation commit in a single transaction; readers never observe a
//! partial image.
//!
//! # Quick start
//!
//! ```no_run
//! use atrium_persistence::{PostgresConfig, Repository};
//! use atrium_persistence::context::ProjectContext;
//! use atrium_fhir::Resource;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Repository::new(PostgresConfig::from_env()).await?;
//! repo.init_schema().await?;
//!
//! let ctx = ProjectContext::system();
//! let patient = Resource::from_value(json!({
//!     "resourceType": "Patient",
//!     "name": [{"family": "Chalmers", "given": ["Peter"]}]
//! }))?;
//! let stored = repo.create(&ctx, patient, None).await?;
//! assert!(stored.id().is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod context;
pub mod error;
pub mod query;
pub mod repo;
pub mod schema;
pub mod search;
pub mod sql;
pub mod subscriptions;
pub mod types;

pub use context::ProjectContext;
pub use error::{StorageError, StorageResult};
pub use repo::{PostgresConfig, Repository};
pub use search::registry::SearchParameterRegistry;
pub use subscriptions::SubscriptionEngine;
pub use types::{SearchRequest, SearchResultPage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
