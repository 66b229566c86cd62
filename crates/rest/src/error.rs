//! Error types for the REST API.
//!
//! Storage errors map to HTTP statuses and FHIR OperationOutcome issue
//! codes:
//!
//! | Storage error | HTTP status | Issue code |
//! |---|---|---|
//! | NotFound / VersionNotFound | 404 | not-found |
//! | Gone | 410 | deleted |
//! | VersionConflict | 409 | conflict |
//! | MultipleMatches / PreconditionFailed | 412 | multiple-matches / conflict |
//! | Validation | 400 or 422 | invalid |
//! | Search | 400 | invalid |
//! | Backend | 500 | exception |

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use atrium_fhir::outcome::operation_outcome;
use atrium_persistence::error::{
    BackendError, ConcurrencyError, ResourceError, StorageError, TransactionError,
};

/// The primary error type for REST operations.
#[derive(Debug)]
pub enum RestError {
    /// Resource not found (HTTP 404).
    NotFound {
        /// Description of what was missing.
        message: String,
    },
    /// Resource was deleted (HTTP 410).
    Gone {
        /// Description of the deleted resource.
        message: String,
    },
    /// Version conflict during update (HTTP 409).
    Conflict {
        /// Conflict description.
        message: String,
    },
    /// Precondition failed (HTTP 412).
    PreconditionFailed {
        /// Why the precondition failed.
        message: String,
    },
    /// Bad request (HTTP 400).
    BadRequest {
        /// Error message.
        message: String,
    },
    /// Semantically invalid resource (HTTP 422).
    UnprocessableEntity {
        /// Error message.
        message: String,
    },
    /// Authentication required (HTTP 401).
    Unauthenticated,
    /// Access denied (HTTP 403).
    Forbidden {
        /// Error message.
        message: String,
    },
    /// Internal server error (HTTP 500).
    Internal {
        /// Error message.
        message: String,
    },
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestError::NotFound { message } => write!(f, "not found: {}", message),
            RestError::Gone { message } => write!(f, "gone: {}", message),
            RestError::Conflict { message } => write!(f, "conflict: {}", message),
            RestError::PreconditionFailed { message } => {
                write!(f, "precondition failed: {}", message)
            }
            RestError::BadRequest { message } => write!(f, "bad request: {}", message),
            RestError::UnprocessableEntity { message } => {
                write!(f, "unprocessable entity: {}", message)
            }
            RestError::Unauthenticated => write!(f, "unauthenticated"),
            RestError::Forbidden { message } => write!(f, "forbidden: {}", message),
            RestError::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for RestError {}

impl RestError {
    /// Shorthand for a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        RestError::BadRequest {
            message: message.into(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let (status, code, diagnostics) = match &self {
            RestError::NotFound { message } => {
                (StatusCode::NOT_FOUND, "not-found", message.clone())
            }
            RestError::Gone { message } => (StatusCode::GONE, "deleted", message.clone()),
            RestError::Conflict { message } => (StatusCode::CONFLICT, "conflict", message.clone()),
            RestError::PreconditionFailed { message } => (
                StatusCode::PRECONDITION_FAILED,
                "multiple-matches",
                message.clone(),
            ),
            RestError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "invalid", message.clone())
            }
            RestError::UnprocessableEntity { message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid",
                message.clone(),
            ),
            RestError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "login",
                "authentication required".to_string(),
            ),
            RestError::Forbidden { message } => {
                (StatusCode::FORBIDDEN, "forbidden", message.clone())
            }
            RestError::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "exception",
                message.clone(),
            ),
        };
        let outcome = operation_outcome("error", code, &diagnostics);
        (status, Json(outcome)).into_response()
    }
}

impl From<StorageError> for RestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Resource(e) => match e {
                ResourceError::NotFound { .. } | ResourceError::VersionNotFound { .. } => {
                    RestError::NotFound {
                        message: e.to_string(),
                    }
                }
                ResourceError::Gone { .. } => RestError::Gone {
                    message: e.to_string(),
                },
            },
            StorageError::Concurrency(e) => match e {
                ConcurrencyError::VersionConflict { .. } => RestError::PreconditionFailed {
                    message: e.to_string(),
                },
            },
            StorageError::Validation(e) => RestError::BadRequest {
                message: e.to_string(),
            },
            StorageError::Search(e) => RestError::BadRequest {
                message: e.to_string(),
            },
            StorageError::Transaction(e) => match e {
                TransactionError::MultipleMatches { .. }
                | TransactionError::PreconditionFailed { .. } => RestError::PreconditionFailed {
                    message: e.to_string(),
                },
                TransactionError::BundleError { .. } | TransactionError::ReferenceCycle => {
                    RestError::BadRequest {
                        message: e.to_string(),
                    }
                }
            },
            StorageError::Backend(e) => match e {
                BackendError::SerializationError { .. } => RestError::BadRequest {
                    message: e.to_string(),
                },
                _ => {
                    // Never leak driver details to clients.
                    tracing::error!(error = %e, "backend failure");
                    RestError::Internal {
                        message: "storage failure".to_string(),
                    }
                }
            },
        }
    }
}

impl From<atrium_fhir::ResourceError> for RestError {
    fn from(err: atrium_fhir::ResourceError) -> Self {
        RestError::BadRequest {
            message: err.to_string(),
        }
    }
}

/// Result alias for REST operations.
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_persistence::error::ResourceError;

    #[test]
    fn test_not_found_mapping() {
        let storage = StorageError::Resource(ResourceError::NotFound {
            resource_type: "Patient".to_string(),
            id: "x".to_string(),
        });
        let rest: RestError = storage.into();
        assert!(matches!(rest, RestError::NotFound { .. }));
    }

    #[test]
    fn test_gone_mapping() {
        let storage = StorageError::Resource(ResourceError::Gone {
            resource_type: "Patient".to_string(),
            id: "x".to_string(),
        });
        assert!(matches!(RestError::from(storage), RestError::Gone { .. }));
    }

    #[test]
    fn test_version_conflict_maps_to_precondition_failed() {
        let storage = StorageError::Concurrency(ConcurrencyError::VersionConflict {
            resource_type: "Patient".to_string(),
            id: "x".to_string(),
            expected: "a".to_string(),
            actual: "b".to_string(),
        });
        assert!(matches!(
            RestError::from(storage),
            RestError::PreconditionFailed { .. }
        ));
    }

    #[test]
    fn test_multiple_matches_maps_to_precondition_failed() {
        let storage = StorageError::Transaction(TransactionError::MultipleMatches {
            operation: "create".to_string(),
            count: 2,
        });
        assert!(matches!(
            RestError::from(storage),
            RestError::PreconditionFailed { .. }
        ));
    }

    #[test]
    fn test_backend_errors_are_opaque() {
        let storage = StorageError::Backend(BackendError::QueryError {
            message: "connection refused to 10.0.0.7".to_string(),
        });
        match RestError::from(storage) {
            RestError::Internal { message } => assert_eq!(message, "storage failure"),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let err = RestError::bad_request("missing resourceType");
        assert_eq!(err.to_string(), "bad request: missing resourceType");
    }
}
