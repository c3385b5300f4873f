//! Per-application context shared by every component.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::{AuthResolver, DatabaseAuth};
use crate::config::DbConfig;
use crate::database::DatabaseController;
use crate::error::DbError;
use crate::pubsub::{ChangePublisher, InProcessPubSub, PubSub};
use crate::schema::cache::InMemorySchemaCache;
use crate::schema::SchemaController;
use crate::storage::{MemoryStorageAdapter, StorageAdapter};

/// Everything one application needs, created at startup and passed by reference.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DbConfig>,
    pub database: DatabaseController,
    pub pubsub: Arc<dyn PubSub>,
    pub publisher: ChangePublisher,
    pub auth: Arc<dyn AuthResolver>,
    memory: Option<Arc<MemoryStorageAdapter>>,
}

impl AppContext {
    /// Builds a context over an existing adapter and transport.
    pub fn new(config: DbConfig, adapter: Arc<dyn StorageAdapter>, pubsub: Arc<dyn PubSub>) -> Self {
        let cache = Arc::new(InMemorySchemaCache::new(Duration::from_millis(
            config.schema_cache_ttl_ms,
        )));
        let schema = SchemaController::new(Arc::clone(&adapter), cache);
        let database = DatabaseController::new(adapter, schema);
        let publisher = ChangePublisher::new(
            Arc::clone(&pubsub),
            config.app_id.clone(),
            &config.live_query_class_names,
        );
        let auth: Arc<dyn AuthResolver> = Arc::new(DatabaseAuth::new(database.clone()));
        Self {
            config: Arc::new(config),
            database,
            pubsub,
            publisher,
            auth,
            memory: None,
        }
    }

    /// Builds a context over the in-memory adapter, loading the snapshot in
    /// `data_dir` when one is configured.
    pub fn from_config(config: DbConfig) -> Result<Self, DbError> {
        let memory = Arc::new(MemoryStorageAdapter::from_config(&config)?);
        let pubsub: Arc<dyn PubSub> = Arc::new(InProcessPubSub::new(config.pubsub_capacity));
        let adapter: Arc<dyn StorageAdapter> = memory.clone();
        let mut context = Self::new(config, adapter, pubsub);
        context.memory = Some(memory);
        Ok(context)
    }

    /// Loads the schema and creates the system classes.
    pub async fn initialize(&self) -> Result<(), DbError> {
        self.database.load_schema(true).await?;
        self.database.perform_initialization().await?;
        info!(
            "Application {} initialized with {} classes",
            self.config.app_id,
            self.database.schema().snapshot().class_names().len()
        );
        Ok(())
    }

    /// Writes pending in-memory changes to the data directory.
    ///
    /// # Returns
    /// Whether a snapshot was written.
    pub fn flush(&self) -> Result<bool, DbError> {
        match &self.memory {
            Some(memory) => memory.flush(),
            None => Ok(false),
        }
    }
}
