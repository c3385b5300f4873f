//! Integration tests for the LiveQuery server.
//!
//! Drives a running runtime through an [`AppContext`]:
//! 1. Event types and ACL gating for writes made through the database
//! 2. The WebSocket transport

pub mod event_tests;
pub mod helpers;
pub mod websocket_tests;
