//! Mapping from remote client errors onto [`DatastoreError`].
//!
//! Three client sentinels have abstract counterparts. Everything else is
//! passed through as [`DatastoreError::Backend`] with the client error kept as
//! the source, so callers can downcast to [`NativeError`] when they need the
//! backend detail.

use std::sync::Arc;

use entitystore::DatastoreError;

use crate::native::NativeError;

/// Converts a client error into its abstract form.
pub fn normalize_error(err: NativeError) -> DatastoreError {
    match err {
        NativeError::NoSuchEntity => DatastoreError::NoSuchEntity,
        NativeError::ConcurrentTransaction => DatastoreError::ConcurrentTransaction,
        NativeError::InvalidKey => DatastoreError::InvalidKey,
        other => DatastoreError::Backend { message: other.to_string(), source: Some(Arc::new(other)) },
    }
}

impl From<NativeError> for DatastoreError {
    fn from(err: NativeError) -> Self {
        normalize_error(err)
    }
}
