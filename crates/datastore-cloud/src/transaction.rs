//! Transaction coordination.
//!
//! A transaction runs the caller's function against a [`BoundDatastore`]
//! scope holding a fresh backend transaction, then commits. Optimistic
//! concurrency conflicts start a new attempt with a new handle until the
//! attempt bound is reached. Attempts never overlap.
//!
//! Backend transactional writes only accept complete keys, so incomplete
//! keys are given identifiers through the allocator before each
//! transactional put. Identifiers allocated for an attempt that later
//! conflicts are not reclaimed.

use entitystore::{
    ConfigError, DatastoreError, DatastoreResult, RawDatastore, TransactionFn, TransactionOptions,
};
use tracing::{debug, warn};

use crate::{
    backend::BoundDatastore,
    native::{DatastoreClient, NativeKey},
};

/// Runs `f` in a transaction bound to a child scope of `ds`.
///
/// # Errors
///
/// - [`ConfigError::NestedTransaction`] if `ds` is already transactional.
/// - [`ConfigError::UnsupportedTransactionOption`] for cross-group transactions.
/// - [`ConfigError::BelowMinimum`] if no attempt bound of at least one applies.
/// - [`DatastoreError::ConcurrentTransaction`] once every attempt has conflicted.
/// - Any other error from `f` or the backend, on the attempt that produced it.
pub(crate) async fn run_in_transaction(
    ds: &BoundDatastore,
    f: &mut TransactionFn<'_>,
    opts: Option<&TransactionOptions>,
) -> DatastoreResult<()> {
    if ds.transaction().is_some() {
        return Err(ConfigError::NestedTransaction.into());
    }
    let opts = opts.copied().unwrap_or_default();
    if opts.cross_group {
        return Err(ConfigError::UnsupportedTransactionOption { option: "cross-group" }.into());
    }
    let attempts = if opts.attempts == 0 { ds.default_attempts() } else { opts.attempts };
    if attempts == 0 {
        return Err(ConfigError::BelowMinimum {
            field: "transaction_attempts",
            min: "1".into(),
            value: "0".into(),
        }
        .into());
    }

    for attempt in 1..=attempts {
        let txn = ds.client().new_transaction().await?;
        let id = txn.id();
        let scope = ds.with_transaction(txn.clone());

        let result = match f(&scope as &dyn RawDatastore).await {
            Ok(()) => txn.commit().await.map_err(DatastoreError::from),
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    debug!(transaction = %id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            },
        };

        match result {
            Ok(()) => {
                if attempt > 1 {
                    debug!(attempt, "transaction committed after retry");
                }
                return Ok(());
            },
            Err(err) if err.is_retryable() && attempt < attempts => {
                debug!(
                    transaction = %id,
                    attempt,
                    max_attempts = attempts,
                    "concurrent transaction, retrying",
                );
            },
            Err(err) => {
                if err.is_retryable() {
                    warn!(attempts, "transaction attempts exhausted");
                }
                return Err(err);
            },
        }
    }

    Err(DatastoreError::ConcurrentTransaction)
}

/// Assigns identifiers to the incomplete keys of `keys`, in place.
///
/// Only the incomplete subset is sent to the allocator; complete keys and
/// the order of the batch are untouched.
///
/// # Errors
///
/// Returns the allocator's error, or a backend error if it returns the wrong
/// number of keys.
pub(crate) async fn preallocate_incomplete(
    client: &dyn DatastoreClient,
    keys: &mut [NativeKey],
) -> DatastoreResult<()> {
    let positions: Vec<usize> =
        keys.iter().enumerate().filter(|(_, k)| k.incomplete()).map(|(i, _)| i).collect();
    if positions.is_empty() {
        return Ok(());
    }

    let incomplete: Vec<NativeKey> = positions.iter().map(|&i| keys[i].clone()).collect();
    let allocated = client.allocate_ids(&incomplete).await?;
    if allocated.len() != positions.len() {
        return Err(DatastoreError::backend(format!(
            "allocator returned {} keys for {} incomplete keys",
            allocated.len(),
            positions.len()
        )));
    }

    debug!(count = positions.len(), "pre-allocated ids for transactional put");
    for (pos, key) in positions.into_iter().zip(allocated) {
        keys[pos] = key;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testutil::FakeClient;

    #[tokio::test]
    async fn test_preallocate_only_touches_incomplete_keys() {
        let client = FakeClient::new();
        let complete = NativeKey::new("Kind", "named", 0, None, "");
        let mut keys = vec![
            NativeKey::new("Kind", "", 0, None, ""),
            complete.clone(),
            NativeKey::new("Other", "", 0, None, ""),
        ];

        preallocate_incomplete(&client, &mut keys).await.unwrap();

        assert!(keys.iter().all(|k| !k.incomplete()));
        assert_eq!(keys[0].kind(), "Kind");
        assert_eq!(keys[1], complete);
        assert_eq!(keys[2].kind(), "Other");
        assert_eq!(client.stats().allocated_ids, 2);
    }

    #[tokio::test]
    async fn test_preallocate_skips_allocator_when_all_complete() {
        let client = FakeClient::new();
        let mut keys = vec![NativeKey::new("Kind", "", 5, None, "")];

        preallocate_incomplete(&client, &mut keys).await.unwrap();

        assert_eq!(client.stats().allocate_calls, 0);
    }
}
