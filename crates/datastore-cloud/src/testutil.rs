//! In-process fake of the remote datastore client.
//!
//! [`FakeClient`] implements [`DatastoreClient`] over a shared in-memory map.
//! It allocates identifiers, detects optimistic-concurrency conflicts from
//! transactional read sets, evaluates queries (kind, namespace, ancestor,
//! filters, orders, projection, cursors, offset and limit) and counts every
//! call it receives. Conflicts and batch failures can be injected.
//!
//! It is feature-gated behind `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! entitystore-cloud = { path = "../datastore-cloud", features = ["testutil"] }
//! ```

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::native::{
    BatchError, DatastoreClient, NativeCursor, NativeEntity, NativeError, NativeIterator,
    NativeKey, NativeProperty, NativeQuery, NativeTransaction, NativeValue, TransactionId,
};

/// Call counters recorded by a [`FakeClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeStats {
    /// Every call made to the client or one of its transactions.
    pub calls: u64,
    /// Transactions opened.
    pub transactions_started: u64,
    /// Successful commits.
    pub commits: u64,
    /// Rollbacks.
    pub rollbacks: u64,
    /// Calls to the id allocator.
    pub allocate_calls: u64,
    /// Identifiers handed out by the allocator, including those assigned on put.
    pub allocated_ids: u64,
}

#[derive(Debug, Clone)]
struct Stored {
    entity: NativeEntity,
    version: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    entities: BTreeMap<NativeKey, Stored>,
    next_id: i64,
    next_version: u64,
    next_transaction: u64,
    pending_conflicts: u32,
    always_conflict: bool,
    batch_error: Option<BatchError>,
    stats: FakeStats,
}

impl FakeState {
    fn allocate(&mut self, key: &NativeKey) -> NativeKey {
        self.next_id += 1;
        self.stats.allocated_ids += 1;
        key.with_id(self.next_id)
    }

    fn store(&mut self, key: NativeKey, entity: NativeEntity) {
        self.next_version += 1;
        self.entities.insert(key, Stored { entity, version: self.next_version });
    }

    fn version(&self, key: &NativeKey) -> u64 {
        self.entities.get(key).map_or(0, |s| s.version)
    }

    fn take_batch_error(&mut self) -> Result<(), BatchError> {
        self.batch_error.take().map_or(Ok(()), Err)
    }

    fn load(&self, keys: &[NativeKey], dst: &mut [NativeEntity]) -> Result<(), BatchError> {
        if keys.len() != dst.len() {
            return Err(BatchError::Uniform(NativeError::InvalidArgument {
                message: "destination length does not match keys".into(),
            }));
        }
        let mut errors = vec![None; keys.len()];
        for (i, key) in keys.iter().enumerate() {
            if key.incomplete() {
                errors[i] = Some(NativeError::InvalidKey);
            } else if let Some(stored) = self.entities.get(key) {
                dst[i] = stored.entity.clone();
            } else {
                errors[i] = Some(NativeError::NoSuchEntity);
            }
        }
        if errors.iter().any(Option::is_some) { Err(BatchError::PerIndex(errors)) } else { Ok(()) }
    }
}

/// An in-memory [`DatastoreClient`].
///
/// Clones share state, so a test can keep a handle for inspection after
/// passing a clone to the code under test.
#[derive(Debug, Clone, Default)]
pub struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the call counters.
    #[must_use]
    pub fn stats(&self) -> FakeStats {
        self.state.lock().stats
    }

    /// Makes the next `n` commits fail with a concurrency conflict.
    pub fn conflict_next_commits(&self, n: u32) {
        self.state.lock().pending_conflicts = n;
    }

    /// Makes every commit fail with a concurrency conflict.
    pub fn conflict_every_commit(&self) {
        self.state.lock().always_conflict = true;
    }

    /// Makes the next batch call (get, put or delete) fail with `err`.
    pub fn fail_next_batch(&self, err: BatchError) {
        self.state.lock().batch_error = Some(err);
    }

    /// Stores an entity directly, bypassing call accounting.
    ///
    /// An incomplete key is given an identifier; the stored key is returned.
    pub fn insert(&self, key: NativeKey, entity: NativeEntity) -> NativeKey {
        let mut state = self.state.lock();
        let key = if key.incomplete() { state.allocate(&key) } else { key };
        state.store(key.clone(), entity);
        key
    }

    /// Returns the stored entity for `key`.
    #[must_use]
    pub fn entity(&self, key: &NativeKey) -> Option<NativeEntity> {
        self.state.lock().entities.get(key).map(|s| s.entity.clone())
    }

    /// Returns the number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evaluate(&self, query: &NativeQuery) -> Result<Vec<(u64, NativeKey, NativeEntity)>, NativeError> {
        let mut filters = Vec::with_capacity(query.filters().len());
        for (field_op, value) in query.filters() {
            let Some((field, op)) = field_op.rsplit_once(' ') else {
                return Err(invalid(format!("malformed filter {field_op:?}")));
            };
            if !matches!(op, "=" | "<" | "<=" | ">" | ">=") {
                return Err(invalid(format!("unknown operator {op:?}")));
            }
            if matches!(
                value,
                NativeValue::GeoPoint { .. }
                    | NativeValue::BlobKey(_)
                    | NativeValue::Entity(_)
                    | NativeValue::List(_)
            ) {
                return Err(invalid(format!("cannot filter on {} values", value.type_name())));
            }
            filters.push((field, op, value));
        }

        let state = self.state.lock();
        let mut rows: Vec<(NativeKey, NativeEntity)> = state
            .entities
            .iter()
            .filter(|(key, _)| query.kind().is_empty() || key.kind() == query.kind())
            .filter(|(key, _)| key.namespace() == query.namespace_name())
            .filter(|(key, _)| query.ancestor_key().is_none_or(|anc| key.has_ancestor(anc)))
            .filter(|(_, stored)| {
                filters.iter().all(|(field, op, value)| matches_filter(&stored.entity, field, op, value))
            })
            .map(|(key, stored)| (key.clone(), stored.entity.clone()))
            .collect();
        drop(state);

        for order in query.orders().iter().rev() {
            let (field, descending) = match order.strip_prefix('-') {
                Some(field) => (field, true),
                None => (order.as_str(), false),
            };
            rows.sort_by(|(_, a), (_, b)| {
                let ord = compare_optional(sort_value(a, field), sort_value(b, field));
                if descending { ord.reverse() } else { ord }
            });
        }

        if !query.projection().is_empty() {
            for (_, entity) in &mut rows {
                entity.retain(|p| query.projection().contains(&p.name));
            }
        }
        if query.is_distinct() {
            let mut seen: Vec<NativeEntity> = Vec::new();
            rows.retain(|(_, entity)| {
                if seen.contains(entity) {
                    false
                } else {
                    seen.push(entity.clone());
                    true
                }
            });
        }
        if query.is_keys_only() {
            for (_, entity) in &mut rows {
                entity.clear();
            }
        }

        let start = query.start_cursor().map(cursor_position).transpose()?.unwrap_or(0);
        let end = query.end_cursor().map(cursor_position).transpose()?.unwrap_or(u64::MAX);
        let offset = query.offset_value().map_or(0, |o| usize::try_from(o).unwrap_or(0));
        let limit = query.limit_value().map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(0));

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(pos, (key, entity))| (pos as u64, key, entity))
            .filter(|(pos, _, _)| *pos >= start && *pos < end)
            .skip(offset)
            .take(limit)
            .collect())
    }
}

fn invalid(message: String) -> NativeError {
    NativeError::InvalidArgument { message }
}

fn encode_position(pos: u64) -> NativeCursor {
    NativeCursor(Bytes::copy_from_slice(&pos.to_be_bytes()))
}

fn cursor_position(cursor: &NativeCursor) -> Result<u64, NativeError> {
    let bytes = <[u8; 8]>::try_from(&cursor.0[..]).map_err(|_| invalid("malformed cursor".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn property_values<'a>(entity: &'a NativeEntity, field: &str) -> Vec<&'a NativeValue> {
    entity
        .iter()
        .filter(|p| p.name == field)
        .flat_map(|p| match &p.value {
            NativeValue::List(items) => items.iter().collect::<Vec<_>>(),
            scalar => vec![scalar],
        })
        .collect()
}

fn sort_value<'a>(entity: &'a NativeEntity, field: &str) -> Option<&'a NativeValue> {
    property_values(entity, field).into_iter().next()
}

fn compare(a: &NativeValue, b: &NativeValue) -> Option<Ordering> {
    use NativeValue as V;
    match (a, b) {
        (V::Null, V::Null) => Some(Ordering::Equal),
        (V::Int(a), V::Int(b)) => Some(a.cmp(b)),
        (V::Bool(a), V::Bool(b)) => Some(a.cmp(b)),
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        (V::Float(a), V::Float(b)) => a.partial_cmp(b),
        (V::Bytes(a), V::Bytes(b)) => Some(a.cmp(b)),
        (V::Time(a), V::Time(b)) => Some(a.cmp(b)),
        (V::Key(a), V::Key(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_optional(a: Option<&NativeValue>, b: Option<&NativeValue>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn matches_filter(entity: &NativeEntity, field: &str, op: &str, value: &NativeValue) -> bool {
    property_values(entity, field).into_iter().any(|candidate| {
        match compare(candidate, value) {
            Some(ord) => match op {
                "=" => ord == Ordering::Equal,
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                ">=" => ord != Ordering::Less,
                _ => false,
            },
            None => false,
        }
    })
}

#[async_trait]
impl DatastoreClient for FakeClient {
    async fn allocate_ids(&self, keys: &[NativeKey]) -> Result<Vec<NativeKey>, NativeError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        state.stats.allocate_calls += 1;
        Ok(keys.iter().map(|k| state.allocate(k)).collect())
    }

    async fn new_transaction(&self) -> Result<Arc<dyn NativeTransaction>, NativeError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        state.stats.transactions_started += 1;
        state.next_transaction += 1;
        Ok(Arc::new(FakeTransaction {
            id: TransactionId(state.next_transaction),
            state: Arc::clone(&self.state),
            buffer: Mutex::new(TransactionBuffer::default()),
        }))
    }

    async fn get_multi(&self, keys: &[NativeKey], dst: &mut [NativeEntity]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        state.take_batch_error()?;
        state.load(keys, dst)
    }

    async fn put_multi(&self, keys: &mut [NativeKey], src: &[NativeEntity]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        state.take_batch_error()?;
        if keys.len() != src.len() {
            return Err(BatchError::Uniform(invalid("keys and entities differ in length".into())));
        }
        for (key, entity) in keys.iter_mut().zip(src) {
            if key.incomplete() {
                *key = state.allocate(key);
            }
            state.store(key.clone(), entity.clone());
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[NativeKey]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        state.take_batch_error()?;
        for key in keys {
            state.entities.remove(key);
        }
        Ok(())
    }

    async fn run(&self, query: NativeQuery) -> Result<Box<dyn NativeIterator>, NativeError> {
        self.state.lock().stats.calls += 1;
        let rows = self.evaluate(&query)?;
        let position = query.start_cursor().map(cursor_position).transpose()?.unwrap_or(0);
        Ok(Box::new(FakeIterator { rows: rows.into_iter(), position }))
    }

    async fn count(&self, query: NativeQuery) -> Result<i64, NativeError> {
        self.state.lock().stats.calls += 1;
        let rows = self.evaluate(&query)?;
        i64::try_from(rows.len()).map_err(|_| invalid("count overflow".into()))
    }

    fn check_cursor(&self, cursor: &NativeCursor) -> Result<(), NativeError> {
        cursor_position(cursor).map(|_| ())
    }
}

#[derive(Debug, Default)]
struct TransactionBuffer {
    reads: BTreeMap<NativeKey, u64>,
    writes: BTreeMap<NativeKey, Option<NativeEntity>>,
    finished: bool,
}

/// A transaction on a [`FakeClient`].
///
/// Reads see committed state and record the version they saw. Commit fails
/// with a conflict if any of those versions changed since.
struct FakeTransaction {
    id: TransactionId,
    state: Arc<Mutex<FakeState>>,
    buffer: Mutex<TransactionBuffer>,
}

fn finished_error() -> NativeError {
    NativeError::InvalidArgument { message: "transaction already finished".into() }
}

#[async_trait]
impl NativeTransaction for FakeTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn get_multi(&self, keys: &[NativeKey], dst: &mut [NativeEntity]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let mut buffer = self.buffer.lock();
        if buffer.finished {
            return Err(finished_error().into());
        }
        state.take_batch_error()?;
        for key in keys {
            let version = state.version(key);
            buffer.reads.entry(key.clone()).or_insert(version);
        }
        state.load(keys, dst)
    }

    async fn put_multi(&self, keys: &[NativeKey], src: &[NativeEntity]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let mut buffer = self.buffer.lock();
        if buffer.finished {
            return Err(finished_error().into());
        }
        state.take_batch_error()?;
        if keys.iter().any(NativeKey::incomplete) {
            return Err(BatchError::Uniform(NativeError::InvalidKey));
        }
        for (key, entity) in keys.iter().zip(src) {
            buffer.writes.insert(key.clone(), Some(entity.clone()));
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[NativeKey]) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let mut buffer = self.buffer.lock();
        if buffer.finished {
            return Err(finished_error().into());
        }
        state.take_batch_error()?;
        for key in keys {
            buffer.writes.insert(key.clone(), None);
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let mut buffer = self.buffer.lock();
        if buffer.finished {
            return Err(finished_error());
        }
        buffer.finished = true;

        if state.always_conflict {
            return Err(NativeError::ConcurrentTransaction);
        }
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(NativeError::ConcurrentTransaction);
        }
        if buffer.reads.iter().any(|(key, seen)| state.version(key) != *seen) {
            return Err(NativeError::ConcurrentTransaction);
        }

        for (key, write) in std::mem::take(&mut buffer.writes) {
            match write {
                Some(entity) => state.store(key, entity),
                None => {
                    state.entities.remove(&key);
                },
            }
        }
        state.stats.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let mut buffer = self.buffer.lock();
        if buffer.finished {
            return Err(finished_error());
        }
        buffer.finished = true;
        state.stats.rollbacks += 1;
        Ok(())
    }
}

struct FakeIterator {
    rows: std::vec::IntoIter<(u64, NativeKey, NativeEntity)>,
    position: u64,
}

#[async_trait]
impl NativeIterator for FakeIterator {
    async fn next(&mut self) -> Result<Option<(NativeKey, NativeEntity)>, NativeError> {
        Ok(self.rows.next().map(|(pos, key, entity)| {
            self.position = pos + 1;
            (key, entity)
        }))
    }

    fn cursor(&self) -> Result<NativeCursor, NativeError> {
        Ok(encode_position(self.position))
    }
}

/// Builds a scalar property.
#[must_use]
pub fn native_property(name: &str, value: NativeValue) -> NativeProperty {
    NativeProperty { name: name.to_owned(), value, no_index: false }
}
