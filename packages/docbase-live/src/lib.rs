//! Real-time LiveQuery server.
//!
//! Clients connect over WebSocket, subscribe to `(className, where)`
//! queries and receive `create`, `enter`, `update`, `leave` and `delete`
//! events as writes are published on the application's change channels.
//! Every event is re-checked against the object's ACL for each viewer.

pub mod client;
pub mod config;
pub mod message;
pub mod runtime;
pub mod server;
pub mod session_token_cache;
pub mod subscription;
pub mod visibility;
pub mod websocket;

use thiserror::Error;

pub use config::LiveQueryConfig;
pub use runtime::{spawn, LiveQueryHandle};
pub use server::LiveQueryServer;

/// Transport and runtime failures of the LiveQuery server.
#[derive(Error, Debug)]
pub enum LiveError {
    /// The runtime task has stopped
    #[error("LiveQuery runtime is not running")]
    RuntimeClosed,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for LiveQuery operations.
pub type Result<T> = std::result::Result<T, LiveError>;
