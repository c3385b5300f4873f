//! Integration tests for the REST API.
//!
//! Requests go through [`Router::handle`](docbase_api::Router::handle)
//! against an in-memory application:
//! 1. Object CRUD, queries and ACLs under `/classes`
//! 2. Schema management under `/schemas`
//! 3. Authentication headers and routing errors
//! 4. The socket listener and its shutdown

pub mod auth_tests;
pub mod class_tests;
pub mod helpers;
pub mod schema_tests;
pub mod server_tests;
