//! Database controller: schema-aware, permission-checked access to storage.
//!
//! Every operation follows the same shape: load the schema, check class
//! level permissions, rewrite relation constraints, restrict by pointer
//! permissions and ACL, validate the query, then call the storage adapter.

mod permissions;
mod relations;
mod transform;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::acl::transform_object_acl;
use crate::error::{DbError, ErrorCode};
use crate::query::validate_query;
use crate::schema::defaults::{
    class_name_is_valid, field_name_is_valid, join_table_name, root_field_name, SPECIAL_UPDATE_KEYS,
    VOLATILE_CLASSES,
};
use crate::schema::{FieldType, Operation, Schema, SchemaController};
use crate::storage::{QueryOptions, SortDirection, StorageAdapter};
use crate::{new_object_id, now_iso, Document, Query};

pub use permissions::{add_pointer_permissions, add_read_acl, add_write_acl, Access};
pub use transform::{
    add_in_object_ids_ids, add_not_in_object_ids_ids, flatten_update_operators_for_create,
    normalize_sort, sanitize_database_result, untransform_result,
};

use permissions::is_authenticated;
use relations::{collect_relation_updates, relation_owner_id};
use transform::is_auth_data_id;

/// Options of a find or count.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Vec<(String, SortDirection)>,
    pub keys: Option<Vec<String>>,
    /// Operation checked against class-level permissions; inferred when `None`
    pub op: Option<Operation>,
}

/// Options of an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every match instead of exactly one object
    pub many: bool,
    /// Insert when nothing matches
    pub upsert: bool,
}

/// Query ready for the storage adapter, or a decision that nothing can match.
enum PreparedQuery {
    Ready { schema: Schema, query: Query },
    Empty,
}

/// Mediates all object reads and writes.
#[derive(Clone)]
pub struct DatabaseController {
    adapter: Arc<dyn StorageAdapter>,
    schema: SchemaController,
}

/// A query that is exactly `{objectId: "<id>"}` is a get.
fn infer_operation(query: &Query) -> Operation {
    if query.len() == 1 && query.get("objectId").map(Value::is_string).unwrap_or(false) {
        Operation::Get
    } else {
        Operation::Find
    }
}

/// Normalizes a timestamp to the REST date form, using `now` when absent.
fn stamp_date(object: &mut Document, key: &str, now: &str) {
    let iso = match object.get(key) {
        Some(Value::String(iso)) => iso.clone(),
        Some(value) if value.get("__type").and_then(Value::as_str) == Some("Date") => return,
        _ => now.to_string(),
    };
    object.insert(key.to_string(), json!({"__type": "Date", "iso": iso}));
}

impl DatabaseController {
    pub fn new(adapter: Arc<dyn StorageAdapter>, schema: SchemaController) -> Self {
        Self { adapter, schema }
    }

    pub fn schema(&self) -> &SchemaController {
        &self.schema
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Refreshes the schema snapshot. Concurrent callers share one reload.
    pub async fn load_schema(&self, clear_cache: bool) -> Result<&SchemaController, DbError> {
        self.schema.reload_data(clear_cache).await?;
        Ok(&self.schema)
    }

    fn adapter_schema(&self, class_name: &str) -> Schema {
        self.schema
            .snapshot()
            .get(class_name)
            .map(Schema::to_adapter_schema)
            .unwrap_or_else(|| Schema::new(class_name))
    }

    async fn prepare_read(
        &self,
        class_name: &str,
        query: &Query,
        access: &Access,
        op: Operation,
    ) -> Result<PreparedQuery, DbError> {
        self.load_schema(false).await?;
        let snapshot = self.schema.snapshot();
        let Some(schema) = snapshot.get(class_name).cloned() else {
            debug!("Read on missing class {}", class_name);
            return if op == Operation::Get {
                Err(DbError::object_not_found())
            } else {
                Ok(PreparedQuery::Empty)
            };
        };

        let acl_group = access.acl_group();
        if !access.is_master() {
            self.schema.validate_permission(class_name, acl_group, op)?;
        }
        let query = self.reduce_relation_keys(class_name, query.clone()).await?;
        let mut query = self.reduce_in_relation(class_name, query).await?;

        if !access.is_master() {
            query = match add_pointer_permissions(&self.schema, class_name, op, &query, acl_group) {
                Some(query) => query,
                None if op == Operation::Get => return Err(DbError::object_not_found()),
                None => return Ok(PreparedQuery::Empty),
            };
            query = match op {
                Operation::Update | Operation::Delete => add_write_acl(&query, acl_group),
                _ => add_read_acl(&query, acl_group),
            };
        }
        let query = validate_query(&query)?;
        Ok(PreparedQuery::Ready { schema, query })
    }

    /// Finds objects visible to the caller.
    ///
    /// # Arguments
    /// * `class_name` - Class to query; a missing class yields no results
    /// * `query` - REST-format where clause
    /// * `access` - Caller identity
    /// * `options` - Pagination, sort, projection and operation override
    ///
    /// # Returns
    /// REST-format objects, or `OBJECT_NOT_FOUND` for a get on a missing class.
    pub async fn find(
        &self,
        class_name: &str,
        query: &Query,
        access: &Access,
        options: FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let op = options.op.unwrap_or_else(|| infer_operation(query));
        let sort = normalize_sort(class_name, &options.sort)?;
        let PreparedQuery::Ready { schema, query } =
            self.prepare_read(class_name, query, access, op).await?
        else {
            return Ok(Vec::new());
        };

        let storage_options = QueryOptions {
            skip: options.skip,
            limit: options.limit,
            sort,
            keys: options.keys,
        };
        let objects = self
            .adapter
            .find(class_name, &schema.to_adapter_schema(), &query, &storage_options)
            .await?;

        let acl_group = access.acl_group();
        let protected: BTreeSet<String> = if access.is_master() {
            BTreeSet::new()
        } else {
            schema
                .class_level_permissions
                .protected_fields_for(acl_group, is_authenticated(acl_group))
        };
        Ok(objects
            .into_iter()
            .map(|object| {
                untransform_result(class_name, object, access.is_master(), acl_group, &protected)
            })
            .collect())
    }

    /// Fetches one object by id.
    pub async fn get(&self, class_name: &str, object_id: &str, access: &Access) -> Result<Document, DbError> {
        let mut query = Query::new();
        query.insert("objectId".to_string(), json!(object_id));
        let options = FindOptions {
            limit: Some(1),
            op: Some(Operation::Get),
            ..Default::default()
        };
        self.find(class_name, &query, access, options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(DbError::object_not_found)
    }

    /// Counts objects visible to the caller.
    pub async fn count(&self, class_name: &str, query: &Query, access: &Access) -> Result<u64, DbError> {
        match self
            .prepare_read(class_name, query, access, Operation::Count)
            .await?
        {
            PreparedQuery::Ready { schema, query } => {
                self.adapter
                    .count(class_name, &schema.to_adapter_schema(), &query)
                    .await
            }
            PreparedQuery::Empty => Ok(0),
        }
    }

    async fn can_add_field(&self, class_name: &str, object: &Document, access: &Access) -> Result<(), DbError> {
        if access.is_master() {
            return Ok(());
        }
        let snapshot = self.schema.snapshot();
        let Some(schema) = snapshot.get(class_name) else {
            return Ok(());
        };
        let adds_field = object.iter().any(|(field, value)| {
            let is_delete = value.get("__op").and_then(Value::as_str) == Some("Delete");
            !is_delete && !schema.fields.contains_key(root_field_name(field))
        });
        if adds_field {
            self.schema
                .validate_permission(class_name, access.acl_group(), Operation::AddField)?;
        }
        Ok(())
    }

    /// Grows the schema to fit an object, checking `addField` permission for new keys.
    pub async fn validate_object(
        &self,
        class_name: &str,
        object: &Document,
        query: Option<&Query>,
        access: &Access,
    ) -> Result<(), DbError> {
        self.load_schema(false).await?;
        self.can_add_field(class_name, object, access).await?;
        self.schema.validate_object(class_name, object, query).await
    }

    /// Creates an object.
    ///
    /// Missing `objectId`/`createdAt`/`updatedAt` are generated. Relation
    /// operators are applied to join collections once the insert succeeds.
    ///
    /// # Returns
    /// The stored values of keys written through `Add`, `AddUnique`,
    /// `Remove` or `Increment` operators.
    pub async fn create(&self, class_name: &str, object: Document, access: &Access) -> Result<Document, DbError> {
        if !class_name_is_valid(class_name) {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                format!("invalid className: {}", class_name),
            ));
        }
        let original = object.clone();
        let mut object = object;
        let now = now_iso();
        object
            .entry("objectId".to_string())
            .or_insert_with(|| Value::String(new_object_id()));
        stamp_date(&mut object, "createdAt", &now);
        if !object.contains_key("updatedAt") {
            let created = object.get("createdAt").cloned().unwrap_or(Value::Null);
            object.insert("updatedAt".to_string(), created);
        }
        stamp_date(&mut object, "updatedAt", &now);

        self.load_schema(false).await?;
        if !access.is_master() {
            self.schema
                .validate_permission(class_name, access.acl_group(), Operation::Create)?;
        }
        self.validate_object(class_name, &object, None, access).await?;

        let relation_updates = collect_relation_updates(&mut object)?;
        let object_id = object
            .get("objectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbError::new(ErrorCode::MissingObjectId, "objectId is required"))?;

        transform_object_acl(&mut object)?;
        flatten_update_operators_for_create(&mut object)?;

        let stored = self
            .adapter
            .create_object(class_name, &self.adapter_schema(class_name), object)
            .await?;
        if !relation_updates.is_empty() {
            self.handle_relation_updates(class_name, &object_id, &relation_updates)
                .await?;
        }
        Ok(sanitize_database_result(&original, &stored))
    }

    fn validate_update_keys(class_name: &str, update: &Document) -> Result<(), DbError> {
        for (field, value) in update {
            let root = root_field_name(field);
            let valid = !is_auth_data_id(field)
                && (field_name_is_valid(root, class_name) || SPECIAL_UPDATE_KEYS.contains(&root));
            if !valid {
                return Err(DbError::invalid_key_name(format!(
                    "Invalid field name for update: {}",
                    field
                )));
            }
            if let Some(map) = value.as_object() {
                if map.keys().any(|k| k.contains('$') || k.contains('.')) {
                    return Err(DbError::new(
                        ErrorCode::InvalidNestedKey,
                        "Nested keys should not contain the '$' or '.' characters",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Updates objects matching `query`.
    ///
    /// # Arguments
    /// * `update` - REST-format values and `__op` operators
    /// * `options` - `many` updates every match, `upsert` inserts when nothing matches
    ///
    /// # Returns
    /// The echoed operator results for single-object updates; an empty
    /// document for `many`/`upsert`. A single-object update that reaches
    /// nothing fails with `OBJECT_NOT_FOUND`.
    pub async fn update(
        &self,
        class_name: &str,
        query: &Query,
        update: Document,
        access: &Access,
        options: UpdateOptions,
    ) -> Result<Document, DbError> {
        let original = update.clone();
        let mut update = update;
        stamp_date(&mut update, "updatedAt", &now_iso());
        let acl_group = access.acl_group();

        self.load_schema(false).await?;
        if !access.is_master() {
            self.schema
                .validate_permission(class_name, acl_group, Operation::Update)?;
        }
        let relation_updates = collect_relation_updates(&mut update)?;

        let mut query = query.clone();
        if !access.is_master() {
            query = match add_pointer_permissions(&self.schema, class_name, Operation::Update, &query, acl_group) {
                Some(query) => query,
                None if options.many => return Ok(Document::new()),
                None => return Err(DbError::object_not_found()),
            };
            query = add_write_acl(&query, acl_group);
        }
        let query = validate_query(&query)?;
        Self::validate_update_keys(class_name, &update)?;

        let schema_fields: Document = update
            .iter()
            .filter(|(key, _)| !SPECIAL_UPDATE_KEYS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.validate_object(class_name, &schema_fields, Some(&query), access)
            .await?;

        // Many and upsert writes never report which object they touched.
        let declared_owner = if !relation_updates.is_empty() && (options.many || options.upsert) {
            Some(relation_owner_id(&update, &query)?)
        } else {
            None
        };

        transform_object_acl(&mut update)?;

        let schema = self.adapter_schema(class_name);
        if options.many {
            let updated = self
                .adapter
                .update_objects_by_query(class_name, &schema, &query, &update)
                .await?;
            debug!("Updated {} objects in {}", updated, class_name);
            if let Some(owner) = declared_owner.filter(|_| updated > 0) {
                self.handle_relation_updates(class_name, &owner, &relation_updates)
                    .await?;
            }
            return Ok(Document::new());
        }
        if options.upsert {
            self.adapter
                .upsert_one_object(class_name, &schema, &query, &update)
                .await?;
            if let Some(owner) = declared_owner {
                self.handle_relation_updates(class_name, &owner, &relation_updates)
                    .await?;
            }
            return Ok(Document::new());
        }
        let stored = self
            .adapter
            .find_one_and_update(class_name, &schema, &query, &update)
            .await?
            .ok_or_else(DbError::object_not_found)?;
        if !relation_updates.is_empty() {
            let owner = stored
                .get("objectId")
                .and_then(Value::as_str)
                .ok_or_else(|| DbError::new(ErrorCode::MissingObjectId, "objectId is required"))?;
            self.handle_relation_updates(class_name, owner, &relation_updates)
                .await?;
        }
        Ok(sanitize_database_result(&original, &stored))
    }

    /// Deletes objects matching `query`.
    ///
    /// Deleting nothing fails with `OBJECT_NOT_FOUND`, except on `_Session`.
    pub async fn destroy(&self, class_name: &str, query: &Query, access: &Access) -> Result<(), DbError> {
        let acl_group = access.acl_group();
        self.load_schema(false).await?;
        let mut query = query.clone();
        if !access.is_master() {
            self.schema
                .validate_permission(class_name, acl_group, Operation::Delete)?;
            query = add_pointer_permissions(&self.schema, class_name, Operation::Delete, &query, acl_group)
                .ok_or_else(DbError::object_not_found)?;
            query = add_write_acl(&query, acl_group);
        }
        let query = validate_query(&query)?;

        match self
            .adapter
            .delete_objects_by_query(class_name, &self.adapter_schema(class_name), &query)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if class_name == "_Session" && e.is(ErrorCode::ObjectNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drops an empty class together with the join collections of its relations.
    pub async fn delete_schema(&self, class_name: &str) -> Result<(), DbError> {
        if !class_name_is_valid(class_name) {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                crate::schema::defaults::invalid_class_name_message(class_name),
            ));
        }
        let schema = self
            .schema
            .get_one_schema(class_name, false, true)
            .await?
            .unwrap_or_else(|| Schema::new(class_name));

        let count = self
            .adapter
            .count(class_name, &schema.to_adapter_schema(), &Query::new())
            .await?;
        if count > 0 {
            return Err(DbError::new(
                ErrorCode::InvalidSchemaOperation,
                format!(
                    "Class {} is not empty, contains {} objects, cannot drop schema.",
                    class_name, count
                ),
            ));
        }

        if self.adapter.delete_class(class_name).await? {
            for (field_name, field_type) in &schema.fields {
                if matches!(field_type, FieldType::Relation { .. }) {
                    self.adapter
                        .delete_class(&join_table_name(field_name, class_name))
                        .await?;
                }
            }
        }
        self.load_schema(true).await?;
        Ok(())
    }

    /// Creates the user and role classes, their uniqueness constraints and
    /// the storage for volatile classes.
    pub async fn perform_initialization(&self) -> Result<(), DbError> {
        self.schema.enforce_class_exists("_User").await?;
        self.schema.enforce_class_exists("_Role").await?;

        for (class_name, field) in [("_User", "username"), ("_User", "email"), ("_Role", "name")] {
            let schema = self.adapter_schema(class_name);
            if let Err(e) = self
                .adapter
                .ensure_uniqueness(class_name, &schema, &[field.to_string()])
                .await
            {
                warn!("Unable to ensure uniqueness for {}.{}: {}", class_name, field, e);
            }
        }

        let volatile: Vec<Schema> = VOLATILE_CLASSES
            .iter()
            .map(|name| Schema::new(*name).with_defaults())
            .collect();
        self.adapter.perform_initialization(&volatile).await
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
