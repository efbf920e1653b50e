//! The raw datastore contract.
//!
//! [`RawDatastore`] is the narrow interface every backend binding implements.
//! A value implementing it is bound to one request scope (an app id, a
//! namespace and, inside a transaction, one backend transaction handle) and
//! is discarded when the request ends.
//!
//! # Callbacks
//!
//! Batch operations report per item through a callback, invoked exactly once
//! per input index, in input order. A callback returning `Err` stops
//! dispatch and the error is returned from the operation.
//!
//! Query iteration hands each result to a [`RunCallback`]; returning
//! `ControlFlow::Break(())` stops iteration cleanly.

use std::ops::ControlFlow;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
    cursor::Cursor,
    error::DatastoreResult,
    key::Key,
    property::PropertyMap,
    query::FinalizedQuery,
};

/// Default number of attempts made by a transaction runner.
pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 3;

/// Options for [`RawDatastore::run_in_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Allow the transaction to span multiple entity groups.
    pub cross_group: bool,
    /// Attempt bound; zero selects the binding's default.
    pub attempts: u32,
}

impl TransactionOptions {
    /// Options with an explicit attempt bound.
    #[must_use]
    pub fn with_attempts(attempts: u32) -> Self {
        Self { attempts, ..Self::default() }
    }
}

/// Yields the cursor positioned just after the current query result.
pub trait CursorSource: Send + Sync {
    /// Returns the current cursor.
    fn cursor(&self) -> DatastoreResult<Cursor>;
}

/// Body of a transaction. Invoked once per attempt with the transactional scope.
pub type TransactionFn<'f> = dyn for<'s> FnMut(&'s dyn RawDatastore) -> BoxFuture<'s, DatastoreResult<()>>
    + Send
    + 'f;

/// Receives each query result: its key, its properties (`None` for
/// keys-only queries) and a cursor source.
pub type RunCallback<'f> = dyn FnMut(Key, Option<PropertyMap>, &dyn CursorSource) -> DatastoreResult<ControlFlow<()>>
    + Send
    + 'f;

/// Receives the outcome of one `get_multi` item.
pub type GetMultiCallback<'f> = dyn FnMut(DatastoreResult<PropertyMap>) -> DatastoreResult<()> + Send + 'f;

/// Receives the outcome of one `put_multi` item: the stored (complete) key.
pub type PutMultiCallback<'f> = dyn FnMut(DatastoreResult<Key>) -> DatastoreResult<()> + Send + 'f;

/// Receives the outcome of one `delete_multi` item.
pub type DeleteMultiCallback<'f> = dyn FnMut(DatastoreResult<()>) -> DatastoreResult<()> + Send + 'f;

/// Pins down the higher-ranked signature of a transaction body closure.
///
/// # Example
///
/// ```
/// use entitystore::transaction_fn;
///
/// let mut body = transaction_fn(|scope| {
///     Box::pin(async move {
///         let _ = scope;
///         Ok(())
///     })
/// });
/// # let _ = &mut body;
/// ```
pub fn transaction_fn<F>(f: F) -> F
where
    F: for<'s> FnMut(&'s dyn RawDatastore) -> BoxFuture<'s, DatastoreResult<()>> + Send,
{
    f
}

/// The abstract storage contract.
#[async_trait]
pub trait RawDatastore: Send + Sync {
    /// Assigns identifiers to incomplete keys, returning complete keys in input order.
    async fn allocate_ids(&self, keys: &[Key]) -> DatastoreResult<Vec<Key>>;

    /// Runs `f` inside a transaction, retrying on concurrency conflicts.
    ///
    /// `f` receives a scope bound to the transaction; all reads and writes
    /// that must be transactional go through it. Each attempt uses a fresh
    /// backend transaction.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NestedTransaction`](crate::ConfigError::NestedTransaction) when called on a
    ///   scope that is already transactional.
    /// - [`ConfigError::UnsupportedTransactionOption`](crate::ConfigError::UnsupportedTransactionOption)
    ///   for options the backend cannot honor.
    /// - [`DatastoreError::ConcurrentTransaction`](crate::DatastoreError::ConcurrentTransaction) once
    ///   every attempt has conflicted.
    async fn run_in_transaction(
        &self,
        f: &mut TransactionFn<'_>,
        opts: Option<&TransactionOptions>,
    ) -> DatastoreResult<()>;

    /// Parses a cursor from its string form (the inverse of `Cursor`'s
    /// `Display`), rejecting cursors the backend cannot resume from.
    fn decode_cursor(&self, s: &str) -> DatastoreResult<Cursor>;

    /// Streams query results into `cb` until exhausted or stopped.
    async fn run(&self, query: &FinalizedQuery, cb: &mut RunCallback<'_>) -> DatastoreResult<()>;

    /// Counts query results.
    async fn count(&self, query: &FinalizedQuery) -> DatastoreResult<i64>;

    /// Loads entities; `cb` is invoked once per key, in order.
    async fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCallback<'_>) -> DatastoreResult<()>;

    /// Stores entities; `cb` is invoked once per key, in order.
    async fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        cb: &mut PutMultiCallback<'_>,
    ) -> DatastoreResult<()>;

    /// Deletes entities; `cb` is invoked once per key, in order.
    async fn delete_multi(
        &self,
        keys: &[Key],
        cb: &mut DeleteMultiCallback<'_>,
    ) -> DatastoreResult<()>;
}
