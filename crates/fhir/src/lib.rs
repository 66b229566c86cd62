//! Atrium FHIR resource model.
//!
//! This crate provides the shared resource handle used by every other crate
//! in the workspace, plus the identity primitives the persistence layer is
//! built on:
//!
//! - [`Resource`] - an untyped FHIR resource: a declared kind plus a JSON
//!   object map. Per-kind logic lives in the search parameter registry, not
//!   in a struct hierarchy.
//! - [`ids`] - UUID minting and the deterministic token hash used by the
//!   token indexing strategy.
//! - [`Reference`] - parsing and formatting of `Kind/id` literal references
//!   and `urn:uuid:` bundle placeholders.
//! - [`outcome`] - OperationOutcome construction helpers.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod ids;
pub mod outcome;
pub mod reference;
pub mod resource;

pub use ids::{TokenHash, generate_id};
pub use reference::Reference;
pub use resource::{Resource, ResourceError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
