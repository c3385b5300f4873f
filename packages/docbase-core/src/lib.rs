//! Schema-governed document database core.
//!
//! Provides the schema controller, the database controller with ACL and
//! relation handling, the storage adapter contract with an in-memory
//! implementation, query matching, and the pub/sub glue that feeds live
//! queries.

pub mod acl;
pub mod auth;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod ops;
pub mod pubsub;
pub mod query;
pub mod schema;
pub mod storage;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

/// A stored object or an update payload in REST format.
pub type Document = Map<String, Value>;

/// A REST-format query (`where` clause).
pub type Query = Map<String, Value>;

pub use error::{DbError, ErrorCode};

/// Generates a new random 10-character alphanumeric object id.
pub fn new_object_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Returns the current time as an ISO-8601 string with millisecond precision.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
