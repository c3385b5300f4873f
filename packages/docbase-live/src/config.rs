//! LiveQuery server configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key accepted as proof of master access on connect.
pub const MASTER_KEY: &str = "masterKey";

/// LiveQuery server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveQueryConfig {
    /// Application id, the prefix of the change channels
    pub app_id: String,
    /// Accepted connect keys such as `clientKey` or `masterKey` (empty accepts every connection)
    pub key_pairs: BTreeMap<String, String>,
    /// Maximum cached session tokens
    pub cache_max_size: usize,
    /// Session token cache time-to-live in milliseconds
    pub cache_ttl_ms: u64,
    /// Interval between keepalive pings in milliseconds
    pub websocket_timeout_ms: u64,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            app_id: "docbase".to_string(),
            key_pairs: BTreeMap::new(),
            cache_max_size: 10_000,
            cache_ttl_ms: 30 * 24 * 60 * 60 * 1000, // 30 days
            websocket_timeout_ms: 10_000,           // 10 seconds
        }
    }
}
