//! Error types for the persistence layer.
//!
//! Errors are organized by category under a single [`StorageError`]
//! umbrella. Infrastructure failures (driver errors, pool exhaustion)
//! convert into [`BackendError`] at this crate's boundary and never leak
//! driver types to callers.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;
use uuid::Uuid;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency and versioning errors.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Validation errors.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Search operation errors.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Transaction and bundle errors.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-infrastructure errors.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// The resource has been soft-deleted (HTTP 410 Gone).
    #[error("resource deleted: {resource_type}/{id}")]
    Gone { resource_type: String, id: String },

    /// The requested version of the resource was not found.
    #[error("version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Optimistic version precondition failed under the row lock.
    #[error("version conflict on {resource_type}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        resource_type: String,
        id: String,
        expected: String,
        actual: String,
    },
}

/// Errors related to resource validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The resource failed a structural invariant.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    /// The resource type is not supported by the schema.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },
}

/// Errors related to search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The search parameter is unknown for the resource type.
    #[error("unknown search parameter '{code}' for {resource_type}")]
    UnknownParameter { resource_type: String, code: String },

    /// The search modifier is not supported for this parameter type.
    #[error("unsupported modifier '{modifier}' for parameter '{code}'")]
    UnsupportedModifier { modifier: String, code: String },

    /// A search value is outside the parameter grammar.
    #[error("invalid value for parameter '{code}': {message}")]
    InvalidValue { code: String, message: String },

    /// Search query parsing failed.
    #[error("failed to parse search query: {message}")]
    QueryParseError { message: String },
}

/// Errors related to transactions and bundle processing.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Bundle processing error at a specific entry.
    #[error("bundle entry {index}: {message}")]
    BundleError { index: usize, message: String },

    /// Circular placeholder references in a transaction bundle.
    #[error("transaction bundle contains a reference cycle")]
    ReferenceCycle,

    /// Conditional operation matched more than one resource.
    #[error("conditional {operation} matched {count} resources, expected at most 1")]
    MultipleMatches { operation: String, count: usize },

    /// Required precondition header was absent or malformed.
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },
}

/// Errors originating from the database layer.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the database failed or the pool is exhausted.
    #[error("database unavailable: {message}")]
    Unavailable { message: String },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Shorthand for a not-found error.
    pub fn not_found(resource_type: &str, id: &Uuid) -> Self {
        StorageError::Resource(ResourceError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    }

    /// Shorthand for a gone error.
    pub fn gone(resource_type: &str, id: &Uuid) -> Self {
        StorageError::Resource(ResourceError::Gone {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    }
}

// Conversions from infrastructure error types

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Backend(BackendError::QueryError {
            message: err.to_string(),
        })
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StorageError::Backend(BackendError::Unavailable {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<atrium_fhir::ResourceError> for StorageError {
    fn from(err: atrium_fhir::ResourceError) -> Self {
        StorageError::Validation(ValidationError::InvalidResource {
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "resource not found: Patient/123");
    }

    #[test]
    fn test_concurrency_error_display() {
        let err = ConcurrencyError::VersionConflict {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
            expected: "v1".to_string(),
            actual: "v2".to_string(),
        };
        assert!(err.to_string().contains("expected v1, found v2"));
    }

    #[test]
    fn test_search_error_display() {
        let err = SearchError::UnknownParameter {
            resource_type: "Patient".to_string(),
            code: "favorite-color".to_string(),
        };
        assert!(err.to_string().contains("favorite-color"));
    }

    #[test]
    fn test_transaction_error_display() {
        let err = TransactionError::MultipleMatches {
            operation: "update".to_string(),
            count: 3,
        };
        assert!(err.to_string().contains("matched 3 resources"));
    }

    #[test]
    fn test_resource_error_conversion() {
        let err: StorageError = atrium_fhir::ResourceError::MissingResourceType.into();
        assert!(matches!(err, StorageError::Validation(_)));
    }
}
