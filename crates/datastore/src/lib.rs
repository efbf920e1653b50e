//! Backend-agnostic abstraction over a hierarchical, schema-less entity store.
//!
//! This crate defines the value types (keys, typed multi-valued properties,
//! queries, cursors) and the [`RawDatastore`] contract that service code is
//! written against. Backend bindings live in their own crates and translate
//! this model into a concrete engine's native representation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! │        (typed entity helpers, request handlers)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     entitystore                             │
//! │      Key │ PropertyMap │ Query │ Cursor │ RawDatastore      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  entitystore-cloud                          │
//! │  key/property codecs │ query compiler │ batches │ txns      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Remote datastore client                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Scopes
//!
//! There is no ambient per-request state. A binding produces one
//! [`RawDatastore`] value per request scope (app id, namespace, optional
//! transaction), and transactional code receives its transactional scope as
//! an explicit argument.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cursor;
pub mod error;
pub mod info;
pub mod key;
pub mod property;
pub mod query;
pub mod raw;

pub use cursor::Cursor;
pub use error::{BoxError, ConfigError, DatastoreError, DatastoreResult};
pub use info::{EnvironmentInfo, RequestInfo};
pub use key::{Key, KeyTok};
pub use property::{
    BlobKey, GeoPoint, IndexSetting, Property, PropertyMap, PropertyType, PropertyValue,
};
pub use query::{FinalizedQuery, IndexColumn, InequalityOp, Query, QueryBound};
pub use raw::{
    CursorSource, DEFAULT_TRANSACTION_ATTEMPTS, DeleteMultiCallback, GetMultiCallback,
    PutMultiCallback, RawDatastore, RunCallback, TransactionFn, TransactionOptions,
    transaction_fn,
};
