//! Database configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Application id, used as the prefix of pub/sub channel names
    pub app_id: String,
    /// Master key granting unrestricted access
    pub master_key: Option<String>,
    /// Time-to-live of cached schemas in milliseconds (0 disables caching)
    pub schema_cache_ttl_ms: u64,
    /// Data directory for snapshots (None keeps data in memory only)
    pub data_dir: Option<PathBuf>,
    /// Interval between snapshot flushes in milliseconds
    pub flush_interval_ms: u64,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
    /// Capacity of each in-process pub/sub channel
    pub pubsub_capacity: usize,
    /// Classes whose changes are published to live queries
    pub live_query_class_names: Vec<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            app_id: "docbase".to_string(),
            master_key: None,
            schema_cache_ttl_ms: 5000,
            data_dir: None,
            flush_interval_ms: 1000,
            persistence_max_retries: 3,      // Default retry attempts
            persistence_retry_delay_ms: 100, // 100ms delay between retries
            pubsub_capacity: 1024,
            live_query_class_names: Vec::new(),
        }
    }
}
