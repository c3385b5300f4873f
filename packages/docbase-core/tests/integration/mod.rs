//! Integration tests for the database core.
//!
//! Exercises the public API end to end through an [`AppContext`]:
//! 1. Object lifecycle with ACLs and relations
//! 2. Snapshot persistence across restarts
//! 3. Change publication for live queries

pub mod helpers;
pub mod lifecycle_tests;
pub mod persistence_tests;
pub mod publish_tests;
