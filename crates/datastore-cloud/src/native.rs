//! Native model of the remote datastore client.
//!
//! These types mirror the representations the remote service SDK works with:
//! keys linked leaf-to-root through parent pointers, dynamically typed
//! property values, a fluent query builder and batch errors that are either
//! uniform or keyed by position. A concrete SDK binding implements
//! [`DatastoreClient`], [`NativeTransaction`] and [`NativeIterator`]; the
//! adapter in this crate only ever talks to those traits.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// A backend key: one path element plus an optional parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeKey {
    kind: String,
    name: String,
    id: i64,
    parent: Option<Box<NativeKey>>,
    namespace: String,
}

impl NativeKey {
    /// Creates a key under `parent` (or a root key).
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        id: i64,
        parent: Option<NativeKey>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            id,
            parent: parent.map(Box::new),
            namespace: namespace.into(),
        }
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the string identifier (empty when unset).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the integer identifier (zero when unset).
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the parent key.
    #[must_use]
    pub fn parent(&self) -> Option<&NativeKey> {
        self.parent.as_deref()
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` if neither identifier is set.
    #[must_use]
    pub fn incomplete(&self) -> bool {
        self.name.is_empty() && self.id == 0
    }

    /// Returns a copy of this key with an integer identifier assigned.
    #[must_use]
    pub fn with_id(&self, id: i64) -> Self {
        Self { id, name: String::new(), ..self.clone() }
    }

    /// Returns `true` if `ancestor` is this key or one of its parents.
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &NativeKey) -> bool {
        let mut cur = Some(self);
        while let Some(key) = cur {
            if key == ancestor {
                return true;
            }
            cur = key.parent();
        }
        false
    }
}

/// A dynamically typed backend value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// Null.
    Null,
    /// 64-bit integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// 64-bit float.
    Float(f64),
    /// Byte string.
    Bytes(Bytes),
    /// Timestamp in whatever offset the service returned.
    Time(DateTime<FixedOffset>),
    /// Entity reference.
    Key(NativeKey),
    /// Geographic point.
    GeoPoint {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lng: f64,
    },
    /// Blob-store reference.
    BlobKey(String),
    /// Embedded entity.
    Entity(Vec<NativeProperty>),
    /// Multi-valued list.
    List(Vec<NativeValue>),
}

impl NativeValue {
    /// Returns the name of this value's type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int64",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Float(_) => "float64",
            Self::Bytes(_) => "bytes",
            Self::Time(_) => "timestamp",
            Self::Key(_) => "key",
            Self::GeoPoint { .. } => "geo point",
            Self::BlobKey(_) => "blob key",
            Self::Entity(_) => "entity",
            Self::List(_) => "list",
        }
    }
}

/// A named backend property.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeProperty {
    /// Property name.
    pub name: String,
    /// Scalar or list value.
    pub value: NativeValue,
    /// Exclude the value from indexes.
    pub no_index: bool,
}

/// The stored properties of one entity.
pub type NativeEntity = Vec<NativeProperty>;

/// An opaque backend cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NativeCursor(pub Bytes);

/// Identifies a backend transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A backend query, assembled fluently.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NativeQuery {
    kind: String,
    namespace: String,
    transaction: Option<TransactionId>,
    filters: Vec<(String, NativeValue)>,
    start: Option<NativeCursor>,
    end: Option<NativeCursor>,
    distinct: bool,
    keys_only: bool,
    limit: Option<i32>,
    offset: Option<i32>,
    projection: Vec<String>,
    ancestor: Option<NativeKey>,
    orders: Vec<String>,
    eventual_consistency: bool,
}

impl NativeQuery {
    /// Starts a query over `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Self::default() }
    }

    /// Scopes the query to `namespace`.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Runs the query inside a transaction.
    #[must_use]
    pub fn transaction(mut self, id: TransactionId) -> Self {
        self.transaction = Some(id);
        self
    }

    /// Adds a filter. `field_op` is a field name and operator, e.g. `"age >"`.
    #[must_use]
    pub fn filter(mut self, field_op: impl Into<String>, value: NativeValue) -> Self {
        self.filters.push((field_op.into(), value));
        self
    }

    /// Starts at `cursor`.
    #[must_use]
    pub fn start(mut self, cursor: NativeCursor) -> Self {
        self.start = Some(cursor);
        self
    }

    /// Ends at `cursor`.
    #[must_use]
    pub fn end(mut self, cursor: NativeCursor) -> Self {
        self.end = Some(cursor);
        self
    }

    /// Deduplicates projected results.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Returns keys only.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading results.
    #[must_use]
    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Projects onto `fields`.
    #[must_use]
    pub fn project(mut self, fields: &[String]) -> Self {
        self.projection.extend_from_slice(fields);
        self
    }

    /// Restricts to descendants of `ancestor`.
    #[must_use]
    pub fn ancestor(mut self, ancestor: NativeKey) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Appends a sort order. A leading `-` sorts descending.
    #[must_use]
    pub fn order(mut self, field: impl Into<String>) -> Self {
        self.orders.push(field.into());
        self
    }

    /// Allows stale index reads.
    #[must_use]
    pub fn eventual_consistency(mut self) -> Self {
        self.eventual_consistency = true;
        self
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    /// Returns the bound transaction.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Returns the filters in insertion order.
    #[must_use]
    pub fn filters(&self) -> &[(String, NativeValue)] {
        &self.filters
    }

    /// Returns the start cursor.
    #[must_use]
    pub fn start_cursor(&self) -> Option<&NativeCursor> {
        self.start.as_ref()
    }

    /// Returns the end cursor.
    #[must_use]
    pub fn end_cursor(&self) -> Option<&NativeCursor> {
        self.end.as_ref()
    }

    /// Returns whether results are deduplicated.
    #[must_use]
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Returns whether only keys are returned.
    #[must_use]
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Returns the limit.
    #[must_use]
    pub fn limit_value(&self) -> Option<i32> {
        self.limit
    }

    /// Returns the offset.
    #[must_use]
    pub fn offset_value(&self) -> Option<i32> {
        self.offset
    }

    /// Returns the projection.
    #[must_use]
    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    /// Returns the ancestor restriction.
    #[must_use]
    pub fn ancestor_key(&self) -> Option<&NativeKey> {
        self.ancestor.as_ref()
    }

    /// Returns the sort orders.
    #[must_use]
    pub fn orders(&self) -> &[String] {
        &self.orders
    }

    /// Returns whether stale reads are allowed.
    #[must_use]
    pub fn is_eventually_consistent(&self) -> bool {
        self.eventual_consistency
    }
}

/// Errors reported by the remote client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum NativeError {
    /// The entity does not exist.
    #[error("datastore: no such entity")]
    NoSuchEntity,

    /// The transaction lost an optimistic-concurrency race.
    #[error("datastore: concurrent transaction")]
    ConcurrentTransaction,

    /// A key was malformed or incomplete where a complete key is required.
    #[error("datastore: invalid key")]
    InvalidKey,

    /// The request was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Rejection detail.
        message: String,
    },

    /// The service could not be reached.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Failure detail.
        message: String,
    },

    /// The service failed internally.
    #[error("internal: {message}")]
    Internal {
        /// Failure detail.
        message: String,
    },
}

/// Failure of a batch call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The whole call failed with one error.
    #[error(transparent)]
    Uniform(NativeError),

    /// Some items failed; `None` marks an item that succeeded.
    #[error("{} of {} batch items failed", .0.iter().flatten().count(), .0.len())]
    PerIndex(Vec<Option<NativeError>>),
}

impl From<NativeError> for BatchError {
    fn from(err: NativeError) -> Self {
        Self::Uniform(err)
    }
}

/// The remote datastore client.
#[async_trait]
pub trait DatastoreClient: Send + Sync {
    /// Assigns identifiers to incomplete keys.
    async fn allocate_ids(&self, keys: &[NativeKey]) -> Result<Vec<NativeKey>, NativeError>;

    /// Opens a new transaction.
    async fn new_transaction(&self) -> Result<Arc<dyn NativeTransaction>, NativeError>;

    /// Loads entities into `dst` (same length as `keys`).
    async fn get_multi(&self, keys: &[NativeKey], dst: &mut [NativeEntity]) -> Result<(), BatchError>;

    /// Stores entities, replacing incomplete keys in `keys` with allocated ones.
    async fn put_multi(&self, keys: &mut [NativeKey], src: &[NativeEntity]) -> Result<(), BatchError>;

    /// Deletes entities.
    async fn delete_multi(&self, keys: &[NativeKey]) -> Result<(), BatchError>;

    /// Starts iterating a query.
    async fn run(&self, query: NativeQuery) -> Result<Box<dyn NativeIterator>, NativeError>;

    /// Counts query results.
    async fn count(&self, query: NativeQuery) -> Result<i64, NativeError>;

    /// Checks that `cursor` names a position this backend can resume from.
    ///
    /// Cursor strings are decoded by the adapter (URL-safe base64 without
    /// padding, the inverse of `Cursor`'s display form); the client only ever
    /// sees the raw bytes its iterators produced.
    fn check_cursor(&self, cursor: &NativeCursor) -> Result<(), NativeError>;
}

/// A backend transaction handle.
///
/// Writes are buffered until [`commit`](NativeTransaction::commit) and must use
/// complete keys. After commit or rollback the handle rejects further use.
#[async_trait]
pub trait NativeTransaction: Send + Sync {
    /// Returns the transaction id, used to bind queries.
    fn id(&self) -> TransactionId;

    /// Loads entities transactionally.
    async fn get_multi(&self, keys: &[NativeKey], dst: &mut [NativeEntity]) -> Result<(), BatchError>;

    /// Buffers writes. Every key must be complete.
    async fn put_multi(&self, keys: &[NativeKey], src: &[NativeEntity]) -> Result<(), BatchError>;

    /// Buffers deletes.
    async fn delete_multi(&self, keys: &[NativeKey]) -> Result<(), BatchError>;

    /// Applies buffered mutations atomically.
    async fn commit(&self) -> Result<(), NativeError>;

    /// Discards buffered mutations.
    async fn rollback(&self) -> Result<(), NativeError>;
}

/// A query result stream.
#[async_trait]
pub trait NativeIterator: Send + Sync {
    /// Returns the next key and entity, or `None` when exhausted.
    async fn next(&mut self) -> Result<Option<(NativeKey, NativeEntity)>, NativeError>;

    /// Returns the cursor just after the most recent result.
    fn cursor(&self) -> Result<NativeCursor, NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_key() {
        let key = NativeKey::new("Kind", "", 0, None, "");
        assert!(key.incomplete());
        let allocated = key.with_id(42);
        assert!(!allocated.incomplete());
        assert_eq!(allocated.id(), 42);
    }

    #[test]
    fn test_has_ancestor_walks_parent_chain() {
        let root = NativeKey::new("Root", "r", 0, None, "");
        let mid = NativeKey::new("Mid", "", 2, Some(root.clone()), "");
        let leaf = NativeKey::new("Leaf", "l", 0, Some(mid.clone()), "");

        assert!(leaf.has_ancestor(&root));
        assert!(leaf.has_ancestor(&mid));
        assert!(leaf.has_ancestor(&leaf));
        assert!(!root.has_ancestor(&leaf));
    }

    #[test]
    fn test_batch_error_display_counts_failures() {
        let err = BatchError::PerIndex(vec![None, Some(NativeError::NoSuchEntity), None]);
        assert_eq!(err.to_string(), "1 of 3 batch items failed");
    }
}
