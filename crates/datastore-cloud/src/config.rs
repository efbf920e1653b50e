//! Configuration for the cloud datastore binding.

use entitystore::{ConfigError, DEFAULT_TRANSACTION_ATTEMPTS};
use serde::{Deserialize, Serialize};

/// Configuration for [`CloudDatastore`](crate::CloudDatastore).
///
/// # Example
///
/// ```
/// use entitystore_cloud::CloudDatastoreConfig;
///
/// let config = CloudDatastoreConfig::builder()
///     .project_id("s~my-app")
///     .transaction_attempts(5)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.transaction_attempts(), 5);
/// assert!(config.strip_meta_properties());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudDatastoreConfig {
    project_id: String,

    #[serde(default = "default_transaction_attempts")]
    transaction_attempts: u32,

    #[serde(default = "default_strip_meta_properties")]
    strip_meta_properties: bool,
}

fn default_transaction_attempts() -> u32 {
    DEFAULT_TRANSACTION_ATTEMPTS
}

fn default_strip_meta_properties() -> bool {
    true
}

#[bon::bon]
impl CloudDatastoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Arguments
    ///
    /// * `project_id` - Application id used when a request environment supplies none.
    /// * `transaction_attempts` - Default attempt bound for transactions (default: 3).
    /// * `strip_meta_properties` - Drop `$`-prefixed properties on save (default: true).
    ///
    /// # Errors
    ///
    /// Returns an error if `project_id` is empty or `transaction_attempts` is zero.
    #[builder]
    pub fn new(
        #[builder(into)] project_id: String,
        #[builder(default = DEFAULT_TRANSACTION_ATTEMPTS)] transaction_attempts: u32,
        #[builder(default = true)] strip_meta_properties: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { project_id, transaction_attempts, strip_meta_properties };
        config.validate()?;
        Ok(config)
    }

    /// Checks a configuration obtained by deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::Empty { field: "project_id" });
        }
        if self.transaction_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "transaction_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Returns the fallback application id.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the default transaction attempt bound.
    #[must_use]
    pub fn transaction_attempts(&self) -> u32 {
        self.transaction_attempts
    }

    /// Returns whether meta properties are dropped on save.
    #[must_use]
    pub fn strip_meta_properties(&self) -> bool {
        self.strip_meta_properties
    }
}
