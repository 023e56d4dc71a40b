//! Error types for tcv-engine
//!
//! `EngineError` is the assessment taxonomy. Controller-level failures
//! (rule store, audit store) abort the assessment; provider and budget
//! failures are tier-local and are converted into UNVERIFIED results by the
//! Tier 3 evaluator before they reach the controller.
//!
//! `ApiError` maps everything onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::providers::ProviderError;

/// Assessment error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request, rejected before Tier 1
    #[error("Invalid assessment request: {0}")]
    Validation(String),

    /// Ruleset snapshot could not be loaded (fail-closed)
    #[error("Rule store unavailable: {0}")]
    RuleStoreUnavailable(String),

    /// Provider did not answer within the call deadline
    #[error("Provider {provider} timed out after {deadline_ms} ms")]
    ProviderTimeout { provider: String, deadline_ms: u64 },

    /// Provider answered with an error
    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// Per-assessment cost ceiling reached
    #[error("Cost ceiling {ceiling:.4} reached (spent {spent:.4})")]
    BudgetExceeded { ceiling: f64, spent: f64 },

    /// Audit trail could not be written; the assessment must abort
    #[error("Audit write failed: {0}")]
    AuditWriteFailure(String),

    /// A claim could not be traced to a matching audit call
    #[error("Claim provenance violated: {0}")]
    ProvenanceViolation(String),

    /// Assessment cancelled before the Tier 3 join completed
    #[error("Assessment {0} was cancelled")]
    Cancelled(Uuid),

    /// State transition refused (review ownership, terminal states)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Common(#[from] tcv_common::Error),
}

impl EngineError {
    /// Errors that must abort the assessment rather than degrade it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::RuleStoreUnavailable(_)
                | EngineError::AuditWriteFailure(_)
                | EngineError::ProvenanceViolation(_)
                | EngineError::Common(_)
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// tcv-common error
    #[error("Common error: {0}")]
    Common(#[from] tcv_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Engine(ref err) => {
                let (status, code) = match err {
                    EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    EngineError::RuleStoreUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "RULE_STORE_UNAVAILABLE")
                    }
                    EngineError::AuditWriteFailure(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "AUDIT_WRITE_FAILURE")
                    }
                    EngineError::ProvenanceViolation(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "PROVENANCE_VIOLATION")
                    }
                    EngineError::Cancelled(_) => (StatusCode::CONFLICT, "CANCELLED"),
                    EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                    EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    EngineError::ProviderTimeout { .. } => {
                        (StatusCode::GATEWAY_TIMEOUT, "PROVIDER_TIMEOUT")
                    }
                    EngineError::Provider { .. } => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
                    EngineError::BudgetExceeded { .. } => {
                        (StatusCode::PAYMENT_REQUIRED, "BUDGET_EXCEEDED")
                    }
                    EngineError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, err.to_string())
            }
            ApiError::Common(ref err) => {
                let status = match err {
                    tcv_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    tcv_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "COMMON_ERROR", err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::AuditWriteFailure("disk".into()).is_fatal());
        assert!(EngineError::RuleStoreUnavailable("gone".into()).is_fatal());
        assert!(!EngineError::BudgetExceeded { ceiling: 1.0, spent: 1.2 }.is_fatal());
        assert!(!EngineError::ProviderTimeout {
            provider: "a".into(),
            deadline_ms: 10
        }
        .is_fatal());
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = ApiError::from(EngineError::Validation("empty".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rule_store_maps_to_service_unavailable() {
        let response =
            ApiError::from(EngineError::RuleStoreUnavailable("v9".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
