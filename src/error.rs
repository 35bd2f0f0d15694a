//! # Errors
//!
//! Error type shared by the convergence engine, the election and the
//! reconciliation drivers, plus helpers that classify Kubernetes API failures.

use crate::certificates::CertificateError;
use thiserror::Error;

/// Errors surfaced by a reconciliation pass
#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cannot set owner reference on {object}: {reason}")]
    Ownership { object: String, reason: String },

    #[error("{object} has no {field}")]
    MissingMetadata { object: String, field: &'static str },

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("Election status update failed for {failed} of {attempted} instances: {details}")]
    Election {
        failed: usize,
        attempted: usize,
        details: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn ownership(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Ownership {
            object: object.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(object: impl Into<String>, field: &'static str) -> Self {
        Self::MissingMetadata {
            object: object.into(),
            field,
        }
    }
}

/// The object does not exist (404)
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 404)
}

/// A create lost the race against another writer (409 `AlreadyExists`)
pub fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists")
}

/// An update was based on a stale resource version (409 `Conflict`)
pub fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 409 && e.reason != "AlreadyExists")
}

/// The API server rejected the object as structurally incompatible (422 `Invalid`)
pub fn is_invalid(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 422)
}

/// Build an API error response the way the API server reports it
pub(crate) fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_and_already_exists_are_distinct() {
        let exists = api_error(409, "AlreadyExists", "secrets \"x\" already exists");
        let stale = api_error(409, "Conflict", "the object has been modified");

        assert!(is_already_exists(&exists));
        assert!(!is_conflict(&exists));
        assert!(is_conflict(&stale));
        assert!(!is_already_exists(&stale));
    }

    #[test]
    fn test_classification_of_other_codes() {
        assert!(is_not_found(&api_error(404, "NotFound", "gone")));
        assert!(is_invalid(&api_error(422, "Invalid", "field is immutable")));
        assert!(!is_invalid(&api_error(500, "InternalError", "boom")));
        assert!(!is_not_found(&api_error(500, "InternalError", "boom")));
    }
}
