//! Cloud datastore binding of the [`RawDatastore`](entitystore::RawDatastore) contract.
//!
//! This crate provides [`CloudDatastore`], which translates the abstract
//! entity-store model (path keys, typed multi-valued properties, query
//! descriptors) into the native representations of a remote datastore client
//! and back. The client itself is reached through the [`DatastoreClient`]
//! trait, which a concrete SDK binding implements.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BoundDatastore                            │
//! │        (implements RawDatastore, one per request)           │
//! ├──────────────┬──────────────┬───────────────┬───────────────┤
//! │  key codec   │ property     │ query         │ transaction   │
//! │              │ codec        │ compiler      │ coordinator   │
//! ├──────────────┴──────────────┴───────────────┴───────────────┤
//! │     batch sequencer │ error normalizer                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │   DatastoreClient │ NativeTransaction │ NativeIterator      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Mapping
//!
//! | Abstract                      | Native                                          |
//! | ----------------------------- | ----------------------------------------------- |
//! | `Key` token path              | `NativeKey` parent chain                        |
//! | one-value property list       | scalar `NativeProperty`, `no_index` from value  |
//! | multi-value property list     | `NativeValue::List`, always indexed             |
//! | inequality bound `>=`         | filter `"field >="`                             |
//! | descending order on `field`   | order `"-field"`                                |
//! | `NoSuchEntity` etc.           | `NativeError` sentinels                         |
//!
//! # Transactions
//!
//! [`RawDatastore::run_in_transaction`](entitystore::RawDatastore::run_in_transaction)
//! retries optimistic-concurrency conflicts up to the configured attempt
//! bound, each attempt with a fresh backend transaction. Nested transactions
//! and cross-group transactions are rejected before any backend call.
//!
//! # Features
//!
//! - **`testutil`**: Enables the [`testutil`] module with [`testutil::FakeClient`], an in-process
//!   client used by the integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod config;
mod error;
mod keys;
pub mod native;
mod properties;
mod query;
mod transaction;

/// In-process fake client for tests.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

/// Cloud datastore binding and its per-request scope.
pub use backend::{BoundDatastore, CloudDatastore};
/// Binding configuration.
pub use config::CloudDatastoreConfig;
/// Client error normalization.
pub use error::normalize_error;
/// Remote client model.
pub use native::{
    BatchError, DatastoreClient, NativeCursor, NativeEntity, NativeError, NativeIterator,
    NativeKey, NativeProperty, NativeQuery, NativeTransaction, NativeValue, TransactionId,
};
