//! Cloud datastore binding of the [`RawDatastore`] contract.
//!
//! [`CloudDatastore`] holds the remote client and configuration and is shared
//! for the life of the process. Each request calls [`CloudDatastore::bind`]
//! to obtain a [`BoundDatastore`] scoped to that request's application id and
//! namespace; transactional code receives a child scope that also carries the
//! backend transaction handle.

use std::{fmt, ops::ControlFlow, sync::Arc};

use async_trait::async_trait;
use entitystore::{
    ConfigError, Cursor, CursorSource, DatastoreError, DatastoreResult, DeleteMultiCallback,
    EnvironmentInfo, FinalizedQuery, GetMultiCallback, Key, PropertyMap, PutMultiCallback,
    RawDatastore, RunCallback, TransactionFn, TransactionOptions,
};

use crate::{
    batch,
    config::CloudDatastoreConfig,
    keys::{decode_key, encode_keys},
    native::{DatastoreClient, NativeIterator, NativeTransaction, TransactionId},
    properties::load_entity,
    query::{compile_query, native_cursor},
    transaction,
};

/// Process-wide handle on the remote datastore.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use entitystore::RequestInfo;
/// use entitystore_cloud::{CloudDatastore, CloudDatastoreConfig, DatastoreClient};
///
/// fn request_scope(client: Arc<dyn DatastoreClient>) {
///     let config = CloudDatastoreConfig::builder().project_id("s~app").build().unwrap();
///     let datastore = CloudDatastore::new(client, config).unwrap();
///
///     let info = RequestInfo::new("s~app").with_namespace("tenant").unwrap();
///     let ds = datastore.bind(&info);
///     assert_eq!(ds.namespace(), "tenant");
///     assert!(!ds.in_transaction());
/// }
/// ```
#[derive(Clone)]
pub struct CloudDatastore {
    client: Arc<dyn DatastoreClient>,
    config: CloudDatastoreConfig,
}

impl fmt::Debug for CloudDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudDatastore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl CloudDatastore {
    /// Creates a binding over `client`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` fails validation, which matters
    /// for configurations obtained by deserialization.
    pub fn new(
        client: Arc<dyn DatastoreClient>,
        config: CloudDatastoreConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CloudDatastoreConfig {
        &self.config
    }

    /// Binds a non-transactional scope for one request.
    ///
    /// The application id and namespace are read from `info` once. An empty
    /// application id falls back to the configured project id.
    #[must_use]
    pub fn bind(&self, info: &dyn EnvironmentInfo) -> BoundDatastore {
        let app_id = match info.fully_qualified_app_id() {
            "" => self.config.project_id(),
            app_id => app_id,
        };
        BoundDatastore {
            client: Arc::clone(&self.client),
            app_id: app_id.to_owned(),
            namespace: info.namespace().unwrap_or_default().to_owned(),
            transaction: None,
            default_attempts: self.config.transaction_attempts(),
            strip_meta: self.config.strip_meta_properties(),
        }
    }
}

/// A [`RawDatastore`] bound to one request scope.
///
/// Not shared across requests or transaction attempts.
pub struct BoundDatastore {
    client: Arc<dyn DatastoreClient>,
    app_id: String,
    namespace: String,
    transaction: Option<Arc<dyn NativeTransaction>>,
    default_attempts: u32,
    strip_meta: bool,
}

impl fmt::Debug for BoundDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundDatastore")
            .field("app_id", &self.app_id)
            .field("namespace", &self.namespace)
            .field("transaction", &self.transaction_id())
            .finish_non_exhaustive()
    }
}

impl BoundDatastore {
    /// Returns the application id keys are decoded under.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the request namespace (empty for the default namespace).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Builds a key in this scope's application id and namespace.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidKey`] under the same conditions as [`Key::new`].
    pub fn new_key(
        &self,
        kind: impl Into<String>,
        string_id: impl Into<String>,
        int_id: i64,
        parent: Option<&Key>,
    ) -> DatastoreResult<Key> {
        Key::new(self.app_id.as_str(), self.namespace.as_str(), kind, string_id, int_id, parent)
    }

    pub(crate) fn client(&self) -> &dyn DatastoreClient {
        self.client.as_ref()
    }

    pub(crate) fn transaction(&self) -> Option<&dyn NativeTransaction> {
        self.transaction.as_deref()
    }

    pub(crate) fn default_attempts(&self) -> u32 {
        self.default_attempts
    }

    fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(|txn| txn.id())
    }

    /// Returns a child scope bound to `txn`.
    pub(crate) fn with_transaction(&self, txn: Arc<dyn NativeTransaction>) -> BoundDatastore {
        BoundDatastore {
            client: Arc::clone(&self.client),
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            transaction: Some(txn),
            default_attempts: self.default_attempts,
            strip_meta: self.strip_meta,
        }
    }
}

/// Hands out cursors from a live backend iterator.
struct IteratorCursor<'a>(&'a dyn NativeIterator);

impl CursorSource for IteratorCursor<'_> {
    fn cursor(&self) -> DatastoreResult<Cursor> {
        let cursor = self.0.cursor()?;
        Ok(Cursor::from_bytes(cursor.0))
    }
}

#[async_trait]
impl RawDatastore for BoundDatastore {
    #[tracing::instrument(skip(self, keys), fields(app_id = %self.app_id, count = keys.len()))]
    async fn allocate_ids(&self, keys: &[Key]) -> DatastoreResult<Vec<Key>> {
        let allocated = self.client.allocate_ids(&encode_keys(keys)).await?;
        if allocated.len() != keys.len() {
            return Err(DatastoreError::backend(format!(
                "allocator returned {} keys for {} requested",
                allocated.len(),
                keys.len()
            )));
        }
        allocated.iter().map(|k| decode_key(&self.app_id, k)).collect()
    }

    #[tracing::instrument(skip(self, f, opts), fields(app_id = %self.app_id))]
    async fn run_in_transaction(
        &self,
        f: &mut TransactionFn<'_>,
        opts: Option<&TransactionOptions>,
    ) -> DatastoreResult<()> {
        transaction::run_in_transaction(self, f, opts).await
    }

    #[tracing::instrument(skip(self, s))]
    fn decode_cursor(&self, s: &str) -> DatastoreResult<Cursor> {
        let cursor: Cursor = s
            .parse()
            .map_err(|e| DatastoreError::backend_with_source("malformed cursor string", e))?;
        self.client.check_cursor(&native_cursor(&cursor))?;
        Ok(cursor)
    }

    #[tracing::instrument(skip(self, query, cb), fields(kind = query.kind(), in_transaction = self.in_transaction()))]
    async fn run(&self, query: &FinalizedQuery, cb: &mut RunCallback<'_>) -> DatastoreResult<()> {
        let native_query = compile_query(query, &self.namespace, self.transaction_id());
        let mut iter = self.client.run(native_query).await?;
        while let Some((native_key, entity)) = iter.next().await? {
            let key = decode_key(&self.app_id, &native_key)?;
            let pmap =
                if query.keys_only() { None } else { Some(load_entity(&self.app_id, entity)?) };
            let source = IteratorCursor(iter.as_ref());
            if let ControlFlow::Break(()) = cb(key, pmap, &source)? {
                break;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, query), fields(kind = query.kind()))]
    async fn count(&self, query: &FinalizedQuery) -> DatastoreResult<i64> {
        let native_query = compile_query(query, &self.namespace, self.transaction_id());
        Ok(self.client.count(native_query).await?)
    }

    #[tracing::instrument(skip(self, keys, cb), fields(count = keys.len(), in_transaction = self.in_transaction()))]
    async fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCallback<'_>) -> DatastoreResult<()> {
        batch::get_multi(self.client(), self.transaction(), &self.app_id, keys, cb).await
    }

    #[tracing::instrument(skip(self, keys, values, cb), fields(count = keys.len(), in_transaction = self.in_transaction()))]
    async fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        cb: &mut PutMultiCallback<'_>,
    ) -> DatastoreResult<()> {
        batch::put_multi(
            self.client(),
            self.transaction(),
            &self.app_id,
            self.strip_meta,
            keys,
            values,
            cb,
        )
        .await
    }

    #[tracing::instrument(skip(self, keys, cb), fields(count = keys.len(), in_transaction = self.in_transaction()))]
    async fn delete_multi(
        &self,
        keys: &[Key],
        cb: &mut DeleteMultiCallback<'_>,
    ) -> DatastoreResult<()> {
        batch::delete_multi(self.client(), self.transaction(), keys, cb).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use entitystore::{RequestInfo, transaction_fn};

    use super::*;
    use crate::testutil::FakeClient;

    fn datastore() -> CloudDatastore {
        let config = CloudDatastoreConfig::builder().project_id("s~fallback").build().unwrap();
        CloudDatastore::new(Arc::new(FakeClient::new()), config).unwrap()
    }

    #[test]
    fn test_bind_reads_environment_once() {
        let info = RequestInfo::new("s~app").with_namespace("ns").unwrap();
        let ds = datastore().bind(&info);
        assert_eq!(ds.app_id(), "s~app");
        assert_eq!(ds.namespace(), "ns");
        assert!(!ds.in_transaction());
    }

    #[test]
    fn test_bind_falls_back_to_project_id() {
        let ds = datastore().bind(&RequestInfo::new(""));
        assert_eq!(ds.app_id(), "s~fallback");
        assert_eq!(ds.namespace(), "");
    }

    #[test]
    fn test_new_key_uses_scope() {
        let info = RequestInfo::new("s~app").with_namespace("ns").unwrap();
        let ds = datastore().bind(&info);
        let key = ds.new_key("Kind", "name", 0, None).unwrap();
        assert_eq!(key.app_id(), "s~app");
        assert_eq!(key.namespace(), "ns");
    }

    #[tokio::test]
    async fn test_allocate_ids_returns_complete_keys_in_order() {
        let ds = datastore().bind(&RequestInfo::new("s~app"));
        let keys = vec![
            ds.new_key("A", "", 0, None).unwrap(),
            ds.new_key("B", "", 0, None).unwrap(),
        ];

        let allocated = ds.allocate_ids(&keys).await.unwrap();

        assert_eq!(allocated.len(), 2);
        assert_eq!(allocated[0].kind(), "A");
        assert_eq!(allocated[1].kind(), "B");
        assert!(allocated.iter().all(|k| !k.is_incomplete()));
        assert_ne!(allocated[0].int_id(), allocated[1].int_id());
    }

    #[test]
    fn test_new_rejects_invalid_deserialized_config() {
        let config: CloudDatastoreConfig =
            serde_json::from_str(r#"{"project_id": "s~app", "transaction_attempts": 0}"#).unwrap();

        let err = CloudDatastore::new(Arc::new(FakeClient::new()), config).unwrap_err();

        assert!(matches!(err, ConfigError::BelowMinimum { field: "transaction_attempts", .. }));
    }

    #[tokio::test]
    async fn test_zero_attempt_scope_rejects_transaction_before_backend_call() {
        let client = FakeClient::new();
        let ds = BoundDatastore {
            client: Arc::new(client.clone()),
            app_id: "s~app".into(),
            namespace: String::new(),
            transaction: None,
            default_attempts: 0,
            strip_meta: true,
        };

        let mut calls = 0;
        let mut body = transaction_fn(|_scope| {
            calls += 1;
            Box::pin(async move { Ok(()) })
        });
        let err = ds.run_in_transaction(&mut body, None).await.unwrap_err();

        assert!(matches!(err, DatastoreError::Config(ConfigError::BelowMinimum { .. })));
        assert_eq!(calls, 0);
        assert_eq!(client.stats().calls, 0);
    }
}
