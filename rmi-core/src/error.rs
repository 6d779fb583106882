//! Error types for RMI operations

use crate::SubFieldKind;
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
///
/// Everything except `NotFound` is a backend failure: the cache or the
/// durable store was unreachable, too slow, or returned something unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("No data for {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Cache unavailable: {reason}")]
    CacheUnavailable { reason: String },

    #[error("Durable store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Operation {operation} exceeded deadline of {deadline:?}")]
    Timeout {
        operation: String,
        deadline: Duration,
    },

    #[error("Serialization failed for {context}: {reason}")]
    Serialization { context: String, reason: String },

    #[error("Write failed for {collection}: {reason}")]
    WriteFailed { collection: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors, raised before any I/O happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid CPF: {value}")]
    InvalidCpf { value: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid phone number {number}: {reason}")]
    InvalidPhone { number: String, reason: String },

    #[error("Invalid ethnicity '{value}', valid options are: {options}")]
    InvalidEthnicity { value: String, options: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all RMI errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RmiError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resubmission of unchanged, non-stale data.
    #[error("No change: {field} matches current data")]
    Conflict { field: SubFieldKind },
}

/// Result type alias for RMI operations.
pub type RmiResult<T> = Result<T, RmiError>;

impl RmiError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
        .into()
    }

    pub fn serialization(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StorageError::Serialization {
            context: context.into(),
            reason: err.to_string(),
        }
        .into()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RmiError::Storage(StorageError::NotFound { .. }))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RmiError::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RmiError::Validation(_))
    }

    /// True for infrastructure failures (anything in the storage layer that
    /// is not a plain absence of data).
    pub fn is_backend(&self) -> bool {
        matches!(self, RmiError::Storage(e) if !matches!(e, StorageError::NotFound { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotFound {
            entity: "citizen".to_string(),
            id: "12345678909".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("citizen"));
        assert!(msg.contains("12345678909"));
    }

    #[test]
    fn test_timeout_display_includes_operation() {
        let err = StorageError::Timeout {
            operation: "cache.get".to_string(),
            deadline: Duration::from_millis(250),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cache.get"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_conflict_display() {
        let err = RmiError::Conflict {
            field: SubFieldKind::Email,
        };
        assert_eq!(format!("{}", err), "No change: email matches current data");
    }

    #[test]
    fn test_classification() {
        let not_found = RmiError::not_found("citizen", "1");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_backend());

        let backend: RmiError = StorageError::CacheUnavailable {
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(backend.is_backend());
        assert!(!backend.is_not_found());

        let validation: RmiError = ValidationError::RequiredFieldMissing {
            field: "cep".to_string(),
        }
        .into();
        assert!(validation.is_validation());
        assert!(!validation.is_conflict());

        let conflict = RmiError::Conflict {
            field: SubFieldKind::Address,
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_validation());
    }

    #[test]
    fn test_from_conversions() {
        let err: RmiError = ConfigError::MissingRequired {
            field: "write_buffer_ttl".to_string(),
        }
        .into();
        assert!(matches!(err, RmiError::Config(_)));

        let err: RmiError = StorageError::LockPoisoned.into();
        assert!(matches!(err, RmiError::Storage(StorageError::LockPoisoned)));
    }
}
