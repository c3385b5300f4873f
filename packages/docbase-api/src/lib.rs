//! REST API for docbase.
//!
//! Exposes `/classes` for object CRUD and `/schemas` for schema
//! management over hyper, routed with matchit. Writes publish change
//! events for live queries.

pub mod handlers;
pub mod router;
pub mod server;

pub use router::{AppState, Router, RouterError};
pub use server::Server;
