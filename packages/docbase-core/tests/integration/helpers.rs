//! Shared fixtures for integration tests.

use docbase_core::config::DbConfig;
use docbase_core::context::AppContext;
use docbase_core::Document;
use serde_json::Value;

/// Converts a `json!` object literal into a document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn pointer(class_name: &str, object_id: &str) -> Value {
    serde_json::json!({"__type": "Pointer", "className": class_name, "objectId": object_id})
}

/// Builds and initializes an in-memory context.
pub async fn context_with(config: DbConfig) -> AppContext {
    let context = AppContext::from_config(config).unwrap();
    context.initialize().await.unwrap();
    context
}

pub async fn context() -> AppContext {
    context_with(DbConfig::default()).await
}
