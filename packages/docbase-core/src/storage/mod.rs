//! Storage adapter contract.
//!
//! The database controller talks to storage exclusively through
//! [`StorageAdapter`]. Objects cross this boundary in storage format:
//! ACLs as `_rperm`/`_wperm`, update payloads possibly carrying `__op`
//! operators.

pub mod memory;
pub mod persistence;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DbError;
use crate::schema::clp::ClassLevelPermissions;
use crate::schema::{FieldType, Schema};
use crate::{Document, Query};

pub use memory::MemoryStorageAdapter;

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Pagination, ordering and projection for a find.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    /// Keys in priority order
    pub sort: Vec<(String, SortDirection)>,
    /// Restricts returned keys; identity and ACL keys are always kept
    pub keys: Option<Vec<String>>,
}

/// Capability contract of a document store.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn find(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError>;

    /// Inserts a new object. Fails with `DUPLICATE_VALUE` on unique key conflicts.
    async fn create_object(
        &self,
        class_name: &str,
        schema: &Schema,
        object: Document,
    ) -> Result<Document, DbError>;

    /// Applies `update` to every match and returns the number of updated objects.
    async fn update_objects_by_query(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<u64, DbError>;

    /// Updates the first match or inserts a new object built from the query's equality constraints.
    async fn upsert_one_object(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<(), DbError>;

    /// Updates the first match and returns it after the update.
    async fn find_one_and_update(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<Option<Document>, DbError>;

    /// Deletes every match. Fails with `OBJECT_NOT_FOUND` if nothing matched.
    async fn delete_objects_by_query(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &Query,
    ) -> Result<u64, DbError>;

    async fn count(&self, class_name: &str, schema: &Schema, query: &Query) -> Result<u64, DbError>;

    async fn get_all_classes(&self) -> Result<Vec<Schema>, DbError>;

    async fn get_class(&self, class_name: &str) -> Result<Option<Schema>, DbError>;

    /// Persists a new class schema. Fails with `DUPLICATE_VALUE` if it exists.
    async fn create_class(&self, class_name: &str, schema: &Schema) -> Result<Schema, DbError>;

    /// Adds a field unless one with that name already exists.
    async fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> Result<(), DbError>;

    /// Removes fields from the schema and their values from every object.
    async fn delete_fields(
        &self,
        class_name: &str,
        schema: &Schema,
        field_names: &[String],
    ) -> Result<(), DbError>;

    /// Drops a class and its data. Returns whether it was a known class.
    async fn delete_class(&self, class_name: &str) -> Result<bool, DbError>;

    /// Enforces uniqueness of the combined field values.
    async fn ensure_uniqueness(
        &self,
        class_name: &str,
        schema: &Schema,
        field_names: &[String],
    ) -> Result<(), DbError>;

    async fn set_class_level_permissions(
        &self,
        class_name: &str,
        clp: &ClassLevelPermissions,
    ) -> Result<(), DbError>;

    async fn set_indexes(
        &self,
        class_name: &str,
        indexes: &BTreeMap<String, Value>,
    ) -> Result<(), DbError>;

    /// Prepares storage for classes whose schema is never created explicitly.
    async fn perform_initialization(&self, volatile_schemas: &[Schema]) -> Result<(), DbError>;
}
