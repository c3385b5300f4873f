//! Server configuration: an optional TOML file overridden by command-line flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use docbase_core::config::DbConfig;
use docbase_core::schema::defined::DefinedSchemasOptions;
use docbase_live::LiveQueryConfig;
use serde::{Deserialize, Serialize};

/// Command-line arguments for the database server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port of the REST API
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the LiveQuery WebSocket endpoint
    #[arg(long)]
    pub live_query_port: Option<u16>,

    /// Application id
    #[arg(long)]
    pub app_id: Option<String>,

    /// Master key
    #[arg(long, env = "DOCBASE_MASTER_KEY")]
    pub master_key: Option<String>,

    /// Data directory for snapshots; data stays in memory when unset
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Class definitions (JSON) applied at startup
    #[arg(long)]
    pub schemas: Option<PathBuf>,

    /// Classes whose changes are pushed to live queries
    #[arg(long, value_delimiter = ',')]
    pub live_query_classes: Vec<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

/// LiveQuery section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveQuerySection {
    /// Port of the WebSocket endpoint; LiveQuery is off when unset
    pub port: Option<u16>,
    pub key_pairs: BTreeMap<String, String>,
    pub cache_max_size: usize,
    pub cache_ttl_ms: u64,
    pub websocket_timeout_ms: u64,
}

impl Default for LiveQuerySection {
    fn default() -> Self {
        let defaults = LiveQueryConfig::default();
        Self {
            port: None,
            key_pairs: defaults.key_pairs,
            cache_max_size: defaults.cache_max_size,
            cache_ttl_ms: defaults.cache_ttl_ms,
            websocket_timeout_ms: defaults.websocket_timeout_ms,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Time allowed for reading a request body in milliseconds
    pub request_timeout_ms: u64,
    /// Class definitions applied at startup
    pub schemas: Option<PathBuf>,
    pub defined_schemas: DefinedSchemasOptions,
    pub database: DbConfig,
    pub live_query: LiveQuerySection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1337,
            request_timeout_ms: 5000,
            schemas: None,
            defined_schemas: DefinedSchemasOptions::default(),
            database: DbConfig::default(),
            live_query: LiveQuerySection::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Loads the file named by `--config`, if any, and applies the other flags on top.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(port) = args.live_query_port {
            self.live_query.port = Some(port);
        }
        if let Some(app_id) = &args.app_id {
            self.database.app_id = app_id.clone();
        }
        if let Some(master_key) = &args.master_key {
            self.database.master_key = Some(master_key.clone());
        }
        if let Some(data_dir) = &args.data_dir {
            self.database.data_dir = Some(data_dir.clone());
        }
        if let Some(schemas) = &args.schemas {
            self.schemas = Some(schemas.clone());
        }
        if !args.live_query_classes.is_empty() {
            self.database.live_query_class_names = args.live_query_classes.clone();
        }
        if let Some(timeout) = args.request_timeout_ms {
            self.request_timeout_ms = timeout;
        }
    }

    /// LiveQuery settings for the configured application.
    pub fn live_query_config(&self) -> LiveQueryConfig {
        LiveQueryConfig {
            app_id: self.database.app_id.clone(),
            key_pairs: self.live_query.key_pairs.clone(),
            cache_max_size: self.live_query.cache_max_size,
            cache_ttl_ms: self.live_query.cache_ttl_ms,
            websocket_timeout_ms: self.live_query.websocket_timeout_ms,
        }
    }
}
