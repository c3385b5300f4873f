//! Validated in-memory view of every class schema and the rules for evolving it.
//!
//! Reads go through an [`ArcSwap`] snapshot. Reloads are single-flight: a
//! non-clearing reload joins whichever reload is already running, a clearing
//! reload always starts a fresh one. Every applied reload bumps a generation
//! counter so holders of an older snapshot can tell it is stale.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{DbError, ErrorCode};
use crate::schema::cache::SchemaCache;
use crate::schema::clp::{self, ClassLevelPermissions, Operation};
use crate::schema::defaults::{
    class_name_is_valid, default_columns, field_name_is_valid, field_name_is_valid_for_class,
    invalid_class_name_message, is_volatile_class, join_table_name, required_write_columns,
    VOLATILE_CLASSES,
};
use crate::schema::types::{infer_type, FieldType};
use crate::schema::Schema;
use crate::storage::StorageAdapter;
use crate::{Document, Query};

type SharedReload = Shared<BoxFuture<'static, Result<(), DbError>>>;

/// Immutable snapshot of every known class, defaults injected.
#[derive(Debug, Default)]
pub struct SchemaData {
    classes: HashMap<String, Schema>,
}

impl SchemaData {
    fn new(schemas: Vec<Schema>) -> Self {
        let mut classes: HashMap<String, Schema> = schemas
            .into_iter()
            .map(|schema| (schema.class_name.clone(), schema))
            .collect();
        for class_name in VOLATILE_CLASSES {
            classes.insert(class_name.to_string(), Schema::new(*class_name).with_defaults());
        }
        Self { classes }
    }

    pub fn get(&self, class_name: &str) -> Option<&Schema> {
        self.classes.get(class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Outcome of a create-or-adopt attempt.
enum ClassCreation {
    Created(Schema),
    AlreadyExists,
}

struct Inner {
    adapter: Arc<dyn StorageAdapter>,
    cache: Arc<dyn SchemaCache>,
    data: ArcSwap<SchemaData>,
    generation: AtomicU64,
    in_flight: Mutex<Option<(u64, SharedReload)>>,
    next_reload_id: AtomicU64,
    applied_reload_id: Mutex<u64>,
}

impl Inner {
    async fn set_all_classes(&self) -> Result<Vec<Schema>, DbError> {
        let schemas: Vec<Schema> = self
            .adapter
            .get_all_classes()
            .await?
            .into_iter()
            .map(Schema::from_adapter_schema)
            .collect();
        self.cache.set_all_classes(schemas.clone()).await;
        for schema in &schemas {
            self.cache
                .set_one_schema(&schema.class_name, schema.clone())
                .await;
        }
        Ok(schemas)
    }

    async fn get_all_classes(&self, clear_cache: bool) -> Result<Vec<Schema>, DbError> {
        if clear_cache {
            self.cache.clear().await;
            return self.set_all_classes().await;
        }
        match self.cache.get_all_classes().await {
            Some(cached) if !cached.is_empty() => Ok(cached),
            _ => self.set_all_classes().await,
        }
    }

    async fn run_reload(self: Arc<Self>, id: u64, clear_cache: bool) -> Result<(), DbError> {
        let result = self.get_all_classes(clear_cache).await;
        {
            let mut slot = self.in_flight.lock();
            if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                *slot = None;
            }
        }
        let schemas = result.map_err(|e| {
            warn!("Schema reload failed: {}", e);
            e
        })?;

        // A reload that started earlier must not overwrite a newer snapshot.
        let mut applied = self.applied_reload_id.lock();
        if id >= *applied {
            self.data.store(Arc::new(SchemaData::new(schemas)));
            *applied = id;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Schema reloaded (generation {})", generation);
        }
        Ok(())
    }
}

/// Owner of the validated schema of every class.
#[derive(Clone)]
pub struct SchemaController {
    inner: Arc<Inner>,
}

impl SchemaController {
    /// Creates a controller with an empty snapshot. Call [`reload_data`](Self::reload_data) before use.
    pub fn new(adapter: Arc<dyn StorageAdapter>, cache: Arc<dyn SchemaCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                cache,
                data: ArcSwap::from_pointee(SchemaData::new(Vec::new())),
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                next_reload_id: AtomicU64::new(1),
                applied_reload_id: Mutex::new(0),
            }),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.inner.adapter
    }

    /// Current schema snapshot.
    pub fn snapshot(&self) -> Arc<SchemaData> {
        self.inner.data.load_full()
    }

    /// Number of reloads applied so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Reloads every class from the cache, falling back to storage.
    ///
    /// # Arguments
    /// * `clear_cache` - Drop cached schemas and read from storage
    pub async fn reload_data(&self, clear_cache: bool) -> Result<(), DbError> {
        let reload = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((_, running)) if !clear_cache => running.clone(),
                _ => {
                    let id = self.inner.next_reload_id.fetch_add(1, Ordering::SeqCst);
                    let future = Arc::clone(&self.inner)
                        .run_reload(id, clear_cache)
                        .boxed()
                        .shared();
                    *slot = Some((id, future.clone()));
                    future
                }
            }
        };
        reload.await
    }

    pub async fn get_all_classes(&self, clear_cache: bool) -> Result<Vec<Schema>, DbError> {
        self.inner.get_all_classes(clear_cache).await
    }

    /// Loads one class schema. `Ok(None)` means the class does not exist.
    ///
    /// # Arguments
    /// * `class_name` - Class to load
    /// * `allow_volatile` - Serve volatile classes from the in-memory snapshot
    /// * `clear_cache` - Bypass the schema cache
    pub async fn get_one_schema(
        &self,
        class_name: &str,
        allow_volatile: bool,
        clear_cache: bool,
    ) -> Result<Option<Schema>, DbError> {
        if clear_cache {
            self.inner.cache.clear().await;
        }
        if allow_volatile && is_volatile_class(class_name) {
            return Ok(self.snapshot().get(class_name).cloned());
        }
        if !clear_cache {
            if let Some(cached) = self.inner.cache.get_one_schema(class_name).await {
                return Ok(Some(cached));
            }
        }
        let schemas = self.inner.set_all_classes().await?;
        Ok(schemas.into_iter().find(|s| s.class_name == class_name))
    }

    pub async fn has_class(&self, class_name: &str) -> Result<bool, DbError> {
        if self.snapshot().contains(class_name) {
            return Ok(true);
        }
        self.reload_data(false).await?;
        Ok(self.snapshot().contains(class_name))
    }

    pub fn get_expected_type(&self, class_name: &str, field_name: &str) -> Option<FieldType> {
        self.snapshot()
            .get(class_name)
            .and_then(|schema| schema.fields.get(field_name).cloned())
    }

    pub fn get_class_level_permissions(&self, class_name: &str) -> Option<ClassLevelPermissions> {
        self.snapshot()
            .get(class_name)
            .map(|schema| schema.class_level_permissions.clone())
    }

    pub fn test_permissions_for_class_name(
        &self,
        class_name: &str,
        acl_group: &[String],
        operation: Operation,
    ) -> bool {
        clp::test_permissions(
            self.get_class_level_permissions(class_name).as_ref(),
            acl_group,
            operation,
        )
    }

    /// Checks class-level permissions for an operation.
    pub fn validate_permission(
        &self,
        class_name: &str,
        acl_group: &[String],
        operation: Operation,
    ) -> Result<(), DbError> {
        clp::validate_permission(
            self.get_class_level_permissions(class_name).as_ref(),
            class_name,
            acl_group,
            operation,
        )
    }

    /// Validates new fields and permissions of a class.
    ///
    /// Fields listed in `existing_field_names` are not re-validated. Returns
    /// the field map with default columns merged in.
    pub fn validate_schema_data(
        class_name: &str,
        fields: &BTreeMap<String, FieldType>,
        class_level_permissions: &ClassLevelPermissions,
        existing_field_names: &[String],
    ) -> Result<BTreeMap<String, FieldType>, DbError> {
        for (field_name, field_type) in fields {
            if existing_field_names.iter().any(|n| n == field_name) {
                continue;
            }
            if !field_name_is_valid(field_name, class_name) {
                return Err(DbError::invalid_key_name(format!(
                    "invalid field name: {}",
                    field_name
                )));
            }
            if !field_name_is_valid_for_class(field_name, class_name) {
                return Err(DbError::new(
                    ErrorCode::ChangedImmutableField,
                    format!("field {} cannot be added", field_name),
                ));
            }
            if let Some(target) = field_type.target_class() {
                if !class_name_is_valid(target) {
                    return Err(DbError::new(
                        ErrorCode::InvalidClassName,
                        invalid_class_name_message(target),
                    ));
                }
            }
        }

        let mut merged = fields.clone();
        merged.extend(default_columns(class_name));

        let geo_points: Vec<&String> = merged
            .iter()
            .filter(|(_, t)| **t == FieldType::GeoPoint)
            .map(|(name, _)| name)
            .collect();
        if geo_points.len() > 1 {
            return Err(DbError::new(
                ErrorCode::IncorrectType,
                format!(
                    "currently, only one GeoPoint field may exist in an object. Adding {} when {} already exists.",
                    geo_points[1], geo_points[0]
                ),
            ));
        }

        class_level_permissions.validate(&merged)?;
        Ok(merged)
    }

    fn validate_new_class(
        &self,
        class_name: &str,
        fields: &BTreeMap<String, FieldType>,
        class_level_permissions: &ClassLevelPermissions,
    ) -> Result<BTreeMap<String, FieldType>, DbError> {
        if !class_name_is_valid(class_name) {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                invalid_class_name_message(class_name),
            ));
        }
        Self::validate_schema_data(class_name, fields, class_level_permissions, &[])
    }

    async fn create_or_adopt_class(
        &self,
        class_name: &str,
        fields: BTreeMap<String, FieldType>,
        class_level_permissions: Option<ClassLevelPermissions>,
    ) -> Result<ClassCreation, DbError> {
        if self.snapshot().contains(class_name) {
            return Ok(ClassCreation::AlreadyExists);
        }
        let class_level_permissions = class_level_permissions.unwrap_or_default();
        let fields = self.validate_new_class(class_name, &fields, &class_level_permissions)?;
        let schema = Schema {
            class_name: class_name.to_string(),
            fields,
            class_level_permissions,
            indexes: BTreeMap::new(),
        };
        match self
            .inner
            .adapter
            .create_class(class_name, &schema.to_adapter_schema())
            .await
        {
            Ok(created) => {
                self.reload_data(true).await?;
                Ok(ClassCreation::Created(Schema::from_adapter_schema(created)))
            }
            Err(e) if e.is(ErrorCode::DuplicateValue) => Ok(ClassCreation::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    /// Creates a new class.
    ///
    /// # Arguments
    /// * `class_name` - Class to create
    /// * `fields` - Non-default fields
    /// * `class_level_permissions` - Permissions, empty when `None`
    ///
    /// # Returns
    /// The created schema, or `INVALID_CLASS_NAME` if the class already exists.
    pub async fn add_class_if_not_exists(
        &self,
        class_name: &str,
        fields: BTreeMap<String, FieldType>,
        class_level_permissions: Option<ClassLevelPermissions>,
    ) -> Result<Schema, DbError> {
        match self
            .create_or_adopt_class(class_name, fields, class_level_permissions)
            .await?
        {
            ClassCreation::Created(schema) => Ok(schema),
            ClassCreation::AlreadyExists => Err(DbError::new(
                ErrorCode::InvalidClassName,
                format!("Class {} already exists.", class_name),
            )),
        }
    }

    /// Makes sure a class exists, adopting one created concurrently by another caller.
    pub async fn enforce_class_exists(&self, class_name: &str) -> Result<(), DbError> {
        if self.snapshot().contains(class_name) {
            return Ok(());
        }
        self.create_or_adopt_class(class_name, BTreeMap::new(), None)
            .await?;
        self.reload_data(true).await?;
        if self.snapshot().contains(class_name) {
            Ok(())
        } else {
            Err(DbError::invalid_json("schema class name does not revalidate"))
        }
    }

    /// Makes sure a field exists with the given type.
    ///
    /// # Arguments
    /// * `class_name` - Owning class
    /// * `field_name` - Field; for a dotted path the root is enforced as `Object`
    /// * `field_type` - Expected type; `None` only validates the name
    /// * `freeze` - Refuse to add the field if it is missing
    pub async fn enforce_field_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: Option<FieldType>,
        freeze: bool,
    ) -> Result<(), DbError> {
        let (field_name, field_type) = normalize_field(field_name, field_type);
        if !field_name_is_valid(field_name, class_name) {
            return Err(DbError::invalid_key_name(format!(
                "Invalid field name: {}.",
                field_name
            )));
        }
        let Some(field_type) = field_type else {
            return Ok(());
        };
        if freeze && self.get_expected_type(class_name, field_name).is_none() {
            return Err(DbError::invalid_json(format!(
                "schema is frozen, cannot add {} field",
                field_name
            )));
        }
        self.enforce_fields_exist(class_name, vec![(field_name.to_string(), field_type)])
            .await
    }

    /// Creates every missing field, then reloads once and verifies the result.
    async fn enforce_fields_exist(
        &self,
        class_name: &str,
        fields: Vec<(String, FieldType)>,
    ) -> Result<(), DbError> {
        let mut added = Vec::new();
        for (field_name, field_type) in fields {
            if let Some(expected) = self.get_expected_type(class_name, &field_name) {
                check_type(class_name, &field_name, &expected, &field_type)?;
                continue;
            }
            if field_type == FieldType::GeoPoint {
                self.check_single_geo_point(class_name, &field_name)?;
            }
            match self
                .inner
                .adapter
                .add_field_if_not_exists(class_name, &field_name, &field_type)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is(ErrorCode::DuplicateValue) => {
                    debug!("Field {}.{} created concurrently", class_name, field_name);
                }
                Err(e) => return Err(e),
            }
            added.push((field_name, field_type));
        }
        if added.is_empty() {
            return Ok(());
        }

        self.reload_data(true).await?;
        for (field_name, field_type) in &added {
            match self.get_expected_type(class_name, field_name) {
                Some(expected) => check_type(class_name, field_name, &expected, field_type)?,
                None => {
                    return Err(DbError::invalid_json(format!(
                        "Could not add field {}",
                        field_name
                    )))
                }
            }
        }
        Ok(())
    }

    fn check_single_geo_point(&self, class_name: &str, field_name: &str) -> Result<(), DbError> {
        let snapshot = self.snapshot();
        let existing = snapshot.get(class_name).and_then(|schema| {
            schema
                .fields
                .iter()
                .find(|(name, t)| **t == FieldType::GeoPoint && name.as_str() != field_name)
                .map(|(name, _)| name.clone())
        });
        match existing {
            Some(existing) => Err(DbError::new(
                ErrorCode::IncorrectType,
                format!(
                    "currently, only one GeoPoint field may exist in an object. Adding {} when {} already exists.",
                    field_name, existing
                ),
            )),
            None => Ok(()),
        }
    }

    /// Deletes a non-default field. Relation fields also drop their join collection.
    pub async fn delete_field(&self, field_name: &str, class_name: &str) -> Result<(), DbError> {
        if !class_name_is_valid(class_name) {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                invalid_class_name_message(class_name),
            ));
        }
        if !field_name_is_valid(field_name, class_name) {
            return Err(DbError::invalid_key_name(format!(
                "invalid field name: {}",
                field_name
            )));
        }
        if !field_name_is_valid_for_class(field_name, class_name) {
            return Err(DbError::new(
                ErrorCode::ChangedImmutableField,
                format!("field {} cannot be changed", field_name),
            ));
        }

        let schema = self
            .get_one_schema(class_name, false, true)
            .await?
            .ok_or_else(|| {
                DbError::new(
                    ErrorCode::InvalidClassName,
                    format!("Class {} does not exist.", class_name),
                )
            })?;
        let Some(field_type) = schema.fields.get(field_name) else {
            return Err(DbError::new(
                ErrorCode::InvalidSchemaOperation,
                format!("Field {} does not exist, cannot delete.", field_name),
            ));
        };

        let adapter = &self.inner.adapter;
        adapter
            .delete_fields(class_name, &schema.to_adapter_schema(), &[field_name.to_string()])
            .await?;
        if field_type.is_relation() {
            adapter
                .delete_class(&join_table_name(field_name, class_name))
                .await?;
        }
        self.reload_data(true).await
    }

    /// Replaces the permissions of a class after validating them against `fields`.
    pub async fn set_permissions(
        &self,
        class_name: &str,
        class_level_permissions: ClassLevelPermissions,
        fields: &BTreeMap<String, FieldType>,
    ) -> Result<(), DbError> {
        class_level_permissions.validate(fields)?;
        self.inner
            .adapter
            .set_class_level_permissions(class_name, &class_level_permissions)
            .await?;
        self.reload_data(true).await
    }

    /// Replaces every index of a class.
    pub async fn set_indexes(
        &self,
        class_name: &str,
        indexes: &BTreeMap<String, Value>,
    ) -> Result<(), DbError> {
        self.inner.adapter.set_indexes(class_name, indexes).await?;
        self.reload_data(true).await
    }

    /// Adds and removes fields, then replaces permissions and applies index changes.
    ///
    /// # Arguments
    /// * `submitted_fields` - New field definitions, or `{"__op": "Delete"}` to drop a field
    /// * `class_level_permissions` - Replacement permissions, if any
    /// * `submitted_indexes` - New index specs, or `{"__op": "Delete"}` to drop an index
    pub async fn update_class(
        &self,
        class_name: &str,
        submitted_fields: &Map<String, Value>,
        class_level_permissions: Option<ClassLevelPermissions>,
        submitted_indexes: Option<&Map<String, Value>>,
    ) -> Result<Schema, DbError> {
        let existing = self
            .get_one_schema(class_name, false, true)
            .await?
            .ok_or_else(|| {
                DbError::new(
                    ErrorCode::InvalidClassName,
                    format!("Class {} does not exist.", class_name),
                )
            })?;

        let mut additions = BTreeMap::new();
        let mut deletions = Vec::new();
        for (name, change) in submitted_fields {
            let is_delete = is_delete_op(change);
            let exists = existing.fields.contains_key(name);
            if exists && !is_delete {
                return Err(DbError::new(
                    ErrorCode::InvalidSchemaOperation,
                    format!("Field {} exists, cannot update.", name),
                ));
            }
            if !exists && is_delete {
                return Err(DbError::new(
                    ErrorCode::InvalidSchemaOperation,
                    format!("Field {} does not exist, cannot delete.", name),
                ));
            }
            if is_delete {
                deletions.push(name.clone());
            } else {
                additions.insert(name.clone(), FieldType::from_json(change)?);
            }
        }

        let mut new_fields = existing.fields.clone();
        for name in &deletions {
            new_fields.remove(name);
        }
        new_fields.extend(additions.clone());
        let existing_names: Vec<String> = existing.fields.keys().cloned().collect();
        let permissions_to_check = class_level_permissions
            .clone()
            .unwrap_or_else(|| existing.class_level_permissions.clone());
        Self::validate_schema_data(class_name, &new_fields, &permissions_to_check, &existing_names)?;

        for name in &deletions {
            self.delete_field(name, class_name).await?;
        }
        self.enforce_fields_exist(class_name, additions.into_iter().collect())
            .await?;
        if let Some(permissions) = class_level_permissions {
            self.set_permissions(class_name, permissions, &new_fields)
                .await?;
        }
        if let Some(submitted) = submitted_indexes {
            let indexes = merge_indexes(&existing.indexes, submitted, &new_fields)?;
            self.set_indexes(class_name, &indexes).await?;
        }

        self.reload_data(true).await?;
        self.get_one_schema(class_name, false, false)
            .await?
            .ok_or_else(|| DbError::internal(format!("Class {} vanished during update", class_name)))
    }

    /// Grows the schema to fit an incoming object.
    ///
    /// # Arguments
    /// * `class_name` - Target class, created if missing
    /// * `object` - REST-format object or update payload
    /// * `query` - Present for updates; relaxes required-column checks
    pub async fn validate_object(
        &self,
        class_name: &str,
        object: &Document,
        query: Option<&Query>,
    ) -> Result<(), DbError> {
        self.enforce_class_exists(class_name).await?;

        let mut geo_count = 0;
        let mut pending = Vec::new();
        for (field_name, value) in object {
            let inferred = infer_type(value)?;
            if inferred == Some(FieldType::GeoPoint) {
                geo_count += 1;
                if geo_count > 1 {
                    return Err(DbError::new(
                        ErrorCode::IncorrectType,
                        "there can only be one geopoint field in a class",
                    ));
                }
            }
            if field_name == "ACL" {
                continue;
            }
            let (name, inferred) = normalize_field(field_name, inferred);
            if !field_name_is_valid(name, class_name) {
                return Err(DbError::invalid_key_name(format!("Invalid field name: {}.", name)));
            }
            if let Some(field_type) = inferred {
                pending.push((name.to_string(), field_type));
            }
        }
        self.enforce_fields_exist(class_name, pending).await?;
        Self::validate_required_columns(class_name, object, query)
    }

    /// Fails with `INCORRECT_TYPE` when a required column is missing or being deleted.
    pub fn validate_required_columns(
        class_name: &str,
        object: &Document,
        query: Option<&Query>,
    ) -> Result<(), DbError> {
        let is_update = query.map(|q| q.contains_key("objectId")).unwrap_or(false);
        let missing = required_write_columns(class_name).iter().find(|column| {
            let value = object.get(**column);
            if is_update {
                value.map(is_delete_op).unwrap_or(false)
            } else {
                value.map(is_falsy).unwrap_or(true)
            }
        });
        match missing {
            Some(column) => Err(DbError::new(
                ErrorCode::IncorrectType,
                format!("{} is required.", column),
            )),
            None => Ok(()),
        }
    }
}

fn normalize_field(field_name: &str, field_type: Option<FieldType>) -> (&str, Option<FieldType>) {
    match field_name.split_once('.') {
        Some((root, _)) if !root.is_empty() => (root, Some(FieldType::Object)),
        _ => (field_name, field_type),
    }
}

fn check_type(
    class_name: &str,
    field_name: &str,
    expected: &FieldType,
    actual: &FieldType,
) -> Result<(), DbError> {
    if expected == actual {
        return Ok(());
    }
    Err(DbError::new(
        ErrorCode::IncorrectType,
        format!(
            "schema mismatch for {}.{}; expected {} but got {}",
            class_name, field_name, expected, actual
        ),
    ))
}

fn is_delete_op(value: &Value) -> bool {
    value.get("__op").and_then(Value::as_str) == Some("Delete")
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn merge_indexes(
    existing: &BTreeMap<String, Value>,
    submitted: &Map<String, Value>,
    fields: &BTreeMap<String, FieldType>,
) -> Result<BTreeMap<String, Value>, DbError> {
    let mut indexes = existing.clone();
    for (name, spec) in submitted {
        let is_delete = is_delete_op(spec);
        let exists = indexes.contains_key(name);
        if exists && !is_delete {
            return Err(DbError::invalid_query(format!("Index {} exists, cannot update.", name)));
        }
        if !exists && is_delete {
            return Err(DbError::invalid_query(format!(
                "Index {} does not exist, cannot delete.",
                name
            )));
        }
        if is_delete {
            indexes.remove(name);
            continue;
        }
        let Some(keys) = spec.as_object() else {
            return Err(DbError::invalid_query(format!("Index {} must be an object", name)));
        };
        for key in keys.keys() {
            if !fields.contains_key(key) {
                return Err(DbError::invalid_query(format!(
                    "Field {} does not exist, cannot add index.",
                    key
                )));
            }
        }
        indexes.insert(name.clone(), spec.clone());
    }
    Ok(indexes)
}
