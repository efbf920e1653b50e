//! Request environment consumed by datastore bindings.
//!
//! Bindings read the application id and namespace once, when a bound
//! datastore is created for a request, and keep them for its lifetime.

use crate::error::{ConfigError, DatastoreResult};

/// Longest namespace name accepted by [`RequestInfo::with_namespace`].
pub const MAX_NAMESPACE_LEN: usize = 100;

/// Per-request environment.
pub trait EnvironmentInfo: Send + Sync {
    /// Fully qualified application id that scopes every key.
    fn fully_qualified_app_id(&self) -> &str;

    /// Current namespace, or `None` for the default namespace.
    fn namespace(&self) -> Option<&str>;

    /// Identifier of the current request, for log correlation.
    fn request_id(&self) -> &str;
}

/// A plain [`EnvironmentInfo`] value.
///
/// # Example
///
/// ```
/// use entitystore::{EnvironmentInfo, RequestInfo};
///
/// let info = RequestInfo::new("s~my-app").with_namespace("tenant-7").unwrap();
/// assert_eq!(info.namespace(), Some("tenant-7"));
///
/// assert!(RequestInfo::new("s~my-app").with_namespace("bad namespace").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    app_id: String,
    namespace: Option<String>,
    request_id: String,
}

impl RequestInfo {
    /// Creates an environment in the default namespace.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), namespace: None, request_id: String::new() }
    }

    /// Returns a copy bound to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNamespace`] unless the name is at most
    /// [`MAX_NAMESPACE_LEN`] characters drawn from `[0-9A-Za-z._-]`.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> DatastoreResult<Self> {
        let namespace = namespace.into();
        if !is_valid_namespace(&namespace) {
            return Err(ConfigError::InvalidNamespace { namespace }.into());
        }
        Ok(Self { namespace: Some(namespace), ..self.clone() })
    }

    /// Returns a copy carrying `request_id`.
    #[must_use]
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), ..self.clone() }
    }
}

impl EnvironmentInfo for RequestInfo {
    fn fully_qualified_app_id(&self) -> &str {
        &self.app_id
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn request_id(&self) -> &str {
        &self.request_id
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    namespace.len() <= MAX_NAMESPACE_LEN
        && namespace.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}
