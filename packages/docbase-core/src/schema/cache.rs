//! Schema cache in front of the storage adapter's schema collection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::schema::Schema;

/// Cache of loaded schemas.
#[async_trait]
pub trait SchemaCache: Send + Sync {
    async fn get_all_classes(&self) -> Option<Vec<Schema>>;
    async fn get_one_schema(&self, class_name: &str) -> Option<Schema>;
    async fn set_all_classes(&self, schemas: Vec<Schema>);
    async fn set_one_schema(&self, class_name: &str, schema: Schema);
    async fn clear(&self);
}

#[derive(Default)]
struct CacheState {
    all: Option<(Instant, Vec<Schema>)>,
    by_class: HashMap<String, (Instant, Schema)>,
}

/// Process-local schema cache with a time-to-live.
///
/// A zero TTL disables caching entirely.
pub struct InMemorySchemaCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl InMemorySchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn fresh(&self, stored_at: Instant) -> bool {
        stored_at.elapsed() < self.ttl
    }
}

#[async_trait]
impl SchemaCache for InMemorySchemaCache {
    async fn get_all_classes(&self) -> Option<Vec<Schema>> {
        let state = self.state.lock();
        match &state.all {
            Some((stored_at, schemas)) if self.fresh(*stored_at) => Some(schemas.clone()),
            _ => None,
        }
    }

    async fn get_one_schema(&self, class_name: &str) -> Option<Schema> {
        let state = self.state.lock();
        match state.by_class.get(class_name) {
            Some((stored_at, schema)) if self.fresh(*stored_at) => Some(schema.clone()),
            _ => None,
        }
    }

    async fn set_all_classes(&self, schemas: Vec<Schema>) {
        if self.ttl.is_zero() {
            return;
        }
        self.state.lock().all = Some((Instant::now(), schemas));
    }

    async fn set_one_schema(&self, class_name: &str, schema: Schema) {
        if self.ttl.is_zero() {
            return;
        }
        self.state
            .lock()
            .by_class
            .insert(class_name.to_string(), (Instant::now(), schema));
    }

    async fn clear(&self) {
        let mut state = self.state.lock();
        state.all = None;
        state.by_class.clear();
    }
}
