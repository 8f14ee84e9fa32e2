//! Shared error taxonomy (C12).
//!
//! Every fallible operation in this crate returns [`Result<T>`], never a
//! panic or an exception-shaped control-flow escape. Handler failures inside
//! the event bus are caught and counted rather than propagated; see
//! `events::bus`.

use std::collections::HashMap;
use std::fmt;

/// The closed set of failure categories a core component can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    InvalidConfiguration,
    NotFound,
    AlreadyExists,
    StorageFull,
    CollectionFailed,
    OperationTimeout,
    CircuitBreakerOpen,
    ResourceUnavailable,
    NetworkError,
    ServiceUnavailable,
    OperationFailed,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::StorageFull => "storage_full",
            ErrorKind::CollectionFailed => "collection_failed",
            ErrorKind::OperationTimeout => "operation_timeout",
            ErrorKind::CircuitBreakerOpen => "circuit_breaker_open",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::OperationFailed => "operation_failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// The transient kinds the fault-tolerance layer retries by default
    /// (spec.md §4.11 / §7).
    pub fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            ErrorKind::OperationTimeout
                | ErrorKind::ResourceUnavailable
                | ErrorKind::NetworkError
                | ErrorKind::ServiceUnavailable
                | ErrorKind::OperationFailed
        )
    }
}

/// A structured failure: a [`ErrorKind`], a human-readable message, and
/// free-form metadata (e.g. the triggering health-check condition).
#[derive(Clone, Debug, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn storage_full(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFull, message)
    }

    pub fn operation_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationTimeout, message)
    }

    pub fn circuit_breaker_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitBreakerOpen, message)
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, message)
    }
}

/// The crate-wide fallible result alias (C12).
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(ErrorKind::OperationTimeout.is_retryable_by_default());
        assert!(ErrorKind::ResourceUnavailable.is_retryable_by_default());
        assert!(ErrorKind::NetworkError.is_retryable_by_default());
        assert!(ErrorKind::ServiceUnavailable.is_retryable_by_default());
        assert!(ErrorKind::OperationFailed.is_retryable_by_default());
        assert!(!ErrorKind::NotFound.is_retryable_by_default());
        assert!(!ErrorKind::CircuitBreakerOpen.is_retryable_by_default());
    }

    #[test]
    fn metadata_builder_accumulates() {
        let err = Error::not_found("op").with_metadata("op", "work");
        assert_eq!(err.metadata.get("op"), Some(&"work".to_string()));
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
