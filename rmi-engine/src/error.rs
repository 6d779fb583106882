//! Error Types for the RMI Engine
//!
//! This module defines the hand-off error type for whatever surface sits on
//! top of the engine (HTTP handlers, gRPC, CLI):
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - Conversion from the core `RmiError` taxonomy
//!
//! All errors serialize as JSON and carry the HTTP status they map to.

use rmi_core::{ConfigError, RmiError, StorageError, ValidationError, VerificationOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for engine responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Required field is missing from request
    MissingField,

    /// Citizen id is not a valid CPF
    InvalidCpf,

    /// Submitted verification code does not match
    InvalidVerificationCode,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested citizen does not exist
    CitizenNotFound,

    /// No live verification for the citizen
    VerificationNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Declared value matches the current one
    NoChange,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Configuration is invalid
    ConfigInvalid,

    /// Cache or durable store is unavailable
    ServiceUnavailable,

    /// Backend call exceeded its deadline
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::MissingField
            | ErrorCode::InvalidCpf
            | ErrorCode::InvalidVerificationCode => 400,

            ErrorCode::CitizenNotFound | ErrorCode::VerificationNotFound => 404,

            ErrorCode::NoChange => 409,

            ErrorCode::InternalError | ErrorCode::ConfigInvalid => 500,

            ErrorCode::ServiceUnavailable => 503,

            ErrorCode::Timeout => 504,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidCpf => "Invalid CPF",
            ErrorCode::InvalidVerificationCode => "Verification code does not match",
            ErrorCode::CitizenNotFound => "Citizen not found",
            ErrorCode::VerificationNotFound => "Verification expired or not found",
            ErrorCode::NoChange => "No change: value matches current data",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ConfigInvalid => "Invalid configuration",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error for engine operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, backend operation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<RmiError> for ApiError {
    fn from(err: RmiError) -> Self {
        let message = err.to_string();
        match err {
            RmiError::Validation(ValidationError::InvalidCpf { .. }) => {
                ApiError::new(ErrorCode::InvalidCpf, message)
            }
            RmiError::Validation(ValidationError::RequiredFieldMissing { field }) => {
                ApiError::new(ErrorCode::MissingField, message)
                    .with_details(serde_json::json!({ "field": field }))
            }
            RmiError::Validation(_) => ApiError::validation_failed(message),
            RmiError::Conflict { field } => ApiError::new(ErrorCode::NoChange, message)
                .with_details(serde_json::json!({ "field": field.type_name() })),
            RmiError::Storage(StorageError::NotFound { .. }) => {
                ApiError::new(ErrorCode::CitizenNotFound, message)
            }
            RmiError::Storage(StorageError::Timeout { operation, .. }) => {
                ApiError::new(ErrorCode::Timeout, message)
                    .with_details(serde_json::json!({ "operation": operation }))
            }
            RmiError::Storage(StorageError::CacheUnavailable { .. })
            | RmiError::Storage(StorageError::StoreUnavailable { .. }) => {
                ApiError::service_unavailable(message)
            }
            RmiError::Storage(_) => ApiError::internal_error(message),
            RmiError::Config(ConfigError::MissingRequired { .. })
            | RmiError::Config(ConfigError::InvalidValue { .. }) => {
                ApiError::new(ErrorCode::ConfigInvalid, message)
            }
        }
    }
}

impl ApiError {
    /// Turn a failed verification attempt into its error.
    pub fn check_verification(outcome: VerificationOutcome) -> ApiResult<()> {
        match outcome {
            VerificationOutcome::Verified => Ok(()),
            VerificationOutcome::CodeMismatch => {
                Err(ApiError::from_code(ErrorCode::InvalidVerificationCode))
            }
            VerificationOutcome::ExpiredOrNotFound => {
                Err(ApiError::from_code(ErrorCode::VerificationNotFound))
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal_error(format!("JSON error: {}", err))
    }
}

/// Result type alias for engine operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rmi_core::SubFieldKind;
    use std::time::Duration;

    #[test]
    fn test_error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::InvalidVerificationCode).unwrap();
        assert_eq!(json, "\"INVALID_VERIFICATION_CODE\"");
    }

    #[test]
    fn test_verification_outcomes_map_to_codes() {
        assert!(ApiError::check_verification(VerificationOutcome::Verified).is_ok());

        let mismatch = ApiError::check_verification(VerificationOutcome::CodeMismatch).unwrap_err();
        assert_eq!(mismatch.code, ErrorCode::InvalidVerificationCode);
        assert_eq!(mismatch.status_code(), 400);

        let gone = ApiError::check_verification(VerificationOutcome::ExpiredOrNotFound).unwrap_err();
        assert_eq!(gone.code, ErrorCode::VerificationNotFound);
        assert_eq!(gone.status_code(), 404);
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::from_code(ErrorCode::NoChange).status_code(), 409);
        assert_eq!(ApiError::from_code(ErrorCode::CitizenNotFound).status_code(), 404);
        assert_eq!(ApiError::from_code(ErrorCode::Timeout).status_code(), 504);
        assert_eq!(ApiError::service_unavailable("down").status_code(), 503);
    }

    #[test]
    fn test_from_rmi_error() {
        let conflict: ApiError = RmiError::Conflict {
            field: SubFieldKind::Email,
        }
        .into();
        assert_eq!(conflict.code, ErrorCode::NoChange);
        assert_eq!(
            conflict.details,
            Some(serde_json::json!({ "field": "self_declared_email" }))
        );

        let not_found: ApiError = RmiError::not_found("citizen", "12345678909").into();
        assert_eq!(not_found.code, ErrorCode::CitizenNotFound);

        let timeout: ApiError = RmiError::from(StorageError::Timeout {
            operation: "cache.get".to_string(),
            deadline: Duration::from_millis(100),
        })
        .into();
        assert_eq!(timeout.code, ErrorCode::Timeout);

        let missing: ApiError = RmiError::from(ValidationError::RequiredFieldMissing {
            field: "cep".to_string(),
        })
        .into();
        assert_eq!(missing.code, ErrorCode::MissingField);
    }

    #[test]
    fn test_api_error_json_shape() {
        let err = ApiError::validation_failed("bad cep");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "VALIDATION_FAILED");
        assert_eq!(json["message"], "bad cep");
        assert!(json.get("details").is_none());
    }
}
