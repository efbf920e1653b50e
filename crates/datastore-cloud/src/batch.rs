//! Batch get, put and delete against the remote client.
//!
//! Each operation issues a single backend batch call, through the bound
//! transaction when there is one, and redistributes the result onto the
//! per-item callback in input order. The backend either succeeds, fails as a
//! whole, or fails item by item; [`BatchOutcome`] captures those three cases
//! and [`dispatch`] is the only place that decomposes them.

use entitystore::{
    ConfigError, DatastoreError, DatastoreResult, DeleteMultiCallback, GetMultiCallback, Key,
    PropertyMap, PutMultiCallback,
};

use crate::{
    error::normalize_error,
    keys::{decode_key, encode_keys},
    native::{BatchError, DatastoreClient, NativeEntity, NativeTransaction},
    properties::{load_entity, save_entity},
    transaction::preallocate_incomplete,
};

/// Normalized result of one backend batch call.
#[derive(Debug, Clone)]
pub(crate) enum BatchOutcome {
    /// Every item succeeded.
    Success,
    /// The call failed as a whole; every item reports this error.
    Uniform(DatastoreError),
    /// Per-item results; `None` marks success.
    PerIndex(Vec<Option<DatastoreError>>),
}

impl From<Result<(), BatchError>> for BatchOutcome {
    fn from(result: Result<(), BatchError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(BatchError::Uniform(err)) => Self::Uniform(normalize_error(err)),
            Err(BatchError::PerIndex(errs)) => {
                Self::PerIndex(errs.into_iter().map(|e| e.map(normalize_error)).collect())
            },
        }
    }
}

/// Invokes `cb` once per index in `0..len`, in order, with that item's error.
///
/// Stops at the first callback error and returns it.
///
/// # Errors
///
/// Returns a backend error without invoking `cb` if a per-item result has a
/// different length than the batch.
pub(crate) fn dispatch<F>(outcome: BatchOutcome, len: usize, mut cb: F) -> DatastoreResult<()>
where
    F: FnMut(usize, Option<DatastoreError>) -> DatastoreResult<()>,
{
    match outcome {
        BatchOutcome::Success => (0..len).try_for_each(|i| cb(i, None)),
        BatchOutcome::Uniform(err) => (0..len).try_for_each(|i| cb(i, Some(err.clone()))),
        BatchOutcome::PerIndex(errs) => {
            if errs.len() != len {
                return Err(DatastoreError::backend(format!(
                    "backend returned {} results for a batch of {len}",
                    errs.len()
                )));
            }
            errs.into_iter().enumerate().try_for_each(|(i, err)| cb(i, err))
        },
    }
}

pub(crate) async fn get_multi(
    client: &dyn DatastoreClient,
    transaction: Option<&dyn NativeTransaction>,
    app_id: &str,
    keys: &[Key],
    cb: &mut GetMultiCallback<'_>,
) -> DatastoreResult<()> {
    let native_keys = encode_keys(keys);
    let mut entities: Vec<NativeEntity> = vec![NativeEntity::new(); keys.len()];
    let result = match transaction {
        Some(txn) => txn.get_multi(&native_keys, &mut entities).await,
        None => client.get_multi(&native_keys, &mut entities).await,
    };

    dispatch(result.into(), keys.len(), |i, err| match err {
        Some(err) => cb(Err(err)),
        None => cb(load_entity(app_id, std::mem::take(&mut entities[i]))),
    })
}

pub(crate) async fn put_multi(
    client: &dyn DatastoreClient,
    transaction: Option<&dyn NativeTransaction>,
    app_id: &str,
    strip_meta: bool,
    keys: &[Key],
    values: &[PropertyMap],
    cb: &mut PutMultiCallback<'_>,
) -> DatastoreResult<()> {
    if keys.len() != values.len() {
        return Err(ConfigError::MismatchedBatch { keys: keys.len(), values: values.len() }.into());
    }
    let mut native_keys = encode_keys(keys);
    let entities = values
        .iter()
        .map(|pmap| save_entity(pmap, strip_meta))
        .collect::<DatastoreResult<Vec<_>>>()?;

    let result = match transaction {
        Some(txn) => {
            preallocate_incomplete(client, &mut native_keys).await?;
            txn.put_multi(&native_keys, &entities).await
        },
        None => client.put_multi(&mut native_keys, &entities).await,
    };

    dispatch(result.into(), keys.len(), |i, err| match err {
        Some(err) => cb(Err(err)),
        None => cb(decode_key(app_id, &native_keys[i])),
    })
}

pub(crate) async fn delete_multi(
    client: &dyn DatastoreClient,
    transaction: Option<&dyn NativeTransaction>,
    keys: &[Key],
    cb: &mut DeleteMultiCallback<'_>,
) -> DatastoreResult<()> {
    let native_keys = encode_keys(keys);
    let result = match transaction {
        Some(txn) => txn.delete_multi(&native_keys).await,
        None => client.delete_multi(&native_keys).await,
    };

    dispatch(result.into(), keys.len(), |_, err| cb(err.map_or(Ok(()), Err)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native::NativeError;

    fn collect(outcome: BatchOutcome, len: usize) -> DatastoreResult<Vec<Option<String>>> {
        let mut seen = Vec::new();
        dispatch(outcome, len, |i, err| {
            assert_eq!(i, seen.len());
            seen.push(err.map(|e| e.to_string()));
            Ok(())
        })?;
        Ok(seen)
    }

    #[test]
    fn test_success_reports_every_index() {
        assert_eq!(collect(BatchOutcome::Success, 3).unwrap(), vec![None, None, None]);
    }

    #[test]
    fn test_uniform_error_reaches_every_index() {
        let outcome: BatchOutcome =
            Err(BatchError::Uniform(NativeError::Unavailable { message: "down".into() })).into();
        let seen = collect(outcome, 2).unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.as_deref() == Some("backend error: unavailable: down")));
    }

    #[test]
    fn test_per_index_errors_keep_positions() {
        let outcome: BatchOutcome =
            Err(BatchError::PerIndex(vec![None, Some(NativeError::NoSuchEntity), None])).into();
        let seen = collect(outcome, 3).unwrap();
        assert_eq!(seen, vec![None, Some("datastore: no such entity".to_owned()), None]);
    }

    #[test]
    fn test_per_index_length_mismatch_is_rejected() {
        let outcome = BatchOutcome::PerIndex(vec![None]);
        let err = collect(outcome, 2).unwrap_err();
        assert!(matches!(err, DatastoreError::Backend { .. }));
    }

    #[test]
    fn test_callback_error_stops_dispatch() {
        let mut calls = 0;
        let result = dispatch(BatchOutcome::Success, 5, |i, _| {
            calls += 1;
            if i == 1 { Err(DatastoreError::backend("stop")) } else { Ok(()) }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
