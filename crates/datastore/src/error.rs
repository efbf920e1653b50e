//! Datastore error types and result alias.
//!
//! Every backend binding maps its native failures onto [`DatastoreError`].
//! Three backend conditions have abstract sentinels of their own:
//!
//! - [`DatastoreError::NoSuchEntity`] - the requested entity does not exist
//! - [`DatastoreError::ConcurrentTransaction`] - an optimistic-concurrency conflict
//! - [`DatastoreError::InvalidKey`] - the backend rejected a key as malformed
//!
//! Everything else a backend reports is carried through as
//! [`DatastoreError::Backend`], keeping the original error as its source so
//! callers can still downcast to backend-specific detail.
//!
//! # Example
//!
//! ```
//! use entitystore::{DatastoreError, DatastoreResult};
//!
//! fn lookup() -> DatastoreResult<()> {
//!     Err(DatastoreError::NoSuchEntity)
//! }
//!
//! assert!(lookup().unwrap_err().is_not_found());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A shared, boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Errors surfaced by the datastore contract.
///
/// The enum is `Clone` so that a single backend failure can be reported to
/// every item of a batch.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum DatastoreError {
    /// The requested entity does not exist.
    #[error("datastore: no such entity")]
    NoSuchEntity,

    /// A transaction collided with a concurrent writer.
    ///
    /// Transaction runners retry this internally; callers only observe it once
    /// the attempt bound is exhausted.
    #[error("datastore: concurrent transaction")]
    ConcurrentTransaction,

    /// The backend rejected a key as invalid.
    #[error("datastore: invalid key")]
    InvalidKey,

    /// The request is malformed or asks for something the binding refuses to do.
    ///
    /// Configuration errors are never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A property value could not be translated into the backend representation.
    #[error("unsupported property type at {index}: {type_name}")]
    UnsupportedPropertyType {
        /// Position of the offending value within its property list.
        index: usize,
        /// Name of the abstract property type.
        type_name: String,
    },

    /// A value returned by the backend has no abstract counterpart.
    #[error("element {index} has unsupported native value type {type_name}")]
    UnsupportedNativeType {
        /// Position of the offending element within the native value list.
        index: usize,
        /// Name of the native value type.
        type_name: String,
    },

    /// A backend failure with no abstract mapping.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
        /// The backend's original error.
        #[source]
        source: Option<BoxError>,
    },
}

impl DatastoreError {
    /// Creates a `Backend` error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), source: None }
    }

    /// Creates a `Backend` error that keeps `source` for downcasting.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for [`DatastoreError::NoSuchEntity`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchEntity)
    }

    /// Returns `true` if a transaction runner should start a fresh attempt.
    ///
    /// Only optimistic-concurrency conflicts qualify. Configuration errors
    /// and backend failures surface immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentTransaction)
    }

    /// Returns the backend's original error, if this is a pass-through failure.
    #[must_use]
    pub fn backend_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Backend { source: Some(source), .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Request or configuration errors that are rejected before reaching a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A transaction was started from a scope already bound to one.
    #[error("nested transactions are not supported")]
    NestedTransaction,

    /// A transaction option the backend cannot honor.
    #[error("{option} transactions are not supported")]
    UnsupportedTransactionOption {
        /// The rejected option.
        option: &'static str,
    },

    /// Inequality filters were placed on more than one field.
    #[error("inequality filters on multiple fields: {fields:?}")]
    MultipleInequalityFields {
        /// The fields carrying inequality filters.
        fields: Vec<String>,
    },

    /// The query combines options in a way no backend accepts.
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected.
        reason: String,
    },

    /// A batch write supplied a different number of keys and values.
    #[error("batch has {keys} keys but {values} values")]
    MismatchedBatch {
        /// Number of keys.
        keys: usize,
        /// Number of values.
        values: usize,
    },

    /// A namespace name failed validation.
    #[error("namespace {namespace:?} does not match /^[0-9A-Za-z._-]{{0,100}}$/")]
    InvalidNamespace {
        /// The rejected namespace.
        namespace: String,
    },

    /// A numeric setting is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The setting name.
        field: &'static str,
        /// The minimum accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A required string setting is empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// The setting name.
        field: &'static str,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("quota exceeded")]
    struct QuotaExceeded;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(DatastoreError::ConcurrentTransaction.is_retryable());
        assert!(!DatastoreError::NoSuchEntity.is_retryable());
        assert!(!DatastoreError::InvalidKey.is_retryable());
        assert!(!DatastoreError::Config(ConfigError::NestedTransaction).is_retryable());
        assert!(!DatastoreError::backend("boom").is_retryable());
    }

    #[test]
    fn test_backend_source_is_downcastable() {
        let err = DatastoreError::backend_with_source("quota", QuotaExceeded);
        let source = err.backend_source().unwrap();
        assert!(source.downcast_ref::<QuotaExceeded>().is_some());
        assert!(DatastoreError::backend("plain").backend_source().is_none());
    }

    #[test]
    fn test_clone_preserves_source() {
        let err = DatastoreError::backend_with_source("quota", QuotaExceeded);
        let cloned = err.clone();
        assert!(cloned.backend_source().is_some());
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DatastoreError::Config(ConfigError::NestedTransaction).to_string(),
            "configuration error: nested transactions are not supported"
        );
        assert_eq!(
            ConfigError::UnsupportedTransactionOption { option: "cross-group" }.to_string(),
            "cross-group transactions are not supported"
        );
        assert_eq!(
            DatastoreError::UnsupportedPropertyType { index: 2, type_name: "geo point".into() }
                .to_string(),
            "unsupported property type at 2: geo point"
        );
        assert_eq!(
            ConfigError::BelowMinimum { field: "attempts", min: "1".into(), value: "0".into() }
                .to_string(),
            "attempts must be at least 1, got 0"
        );
    }
}
