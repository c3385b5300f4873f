//! Query validation, in-memory matching and subscription hashing.

mod hash;
mod matcher;
mod validate;

pub use hash::{canonical_json, query_hash};
pub use matcher::{compare_values, lookup_path, matches_query, values_equal};
pub use validate::{distribute_or_siblings, validate_query};
