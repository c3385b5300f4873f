//! In-memory storage adapter with optional snapshot persistence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::error::{DbError, ErrorCode};
use crate::ops::UpdateOp;
use crate::query::{compare_values, lookup_path, matches_query, values_equal};
use crate::schema::clp::ClassLevelPermissions;
use crate::schema::{FieldType, Schema};
use crate::storage::persistence::{ClassSnapshot, SnapshotStore};
use crate::storage::{QueryOptions, SortDirection, StorageAdapter};
use crate::{new_object_id, Document, Query};

/// Keys every projection keeps.
const ALWAYS_KEPT_KEYS: &[&str] = &["objectId", "createdAt", "updatedAt", "_rperm", "_wperm", "ACL"];

#[derive(Debug, Default, Clone)]
struct Collection {
    objects: Vec<Document>,
    unique: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct State {
    schemas: HashMap<String, Schema>,
    collections: HashMap<String, Collection>,
}

impl State {
    fn schema_mut(&mut self, class_name: &str) -> Result<&mut Schema, DbError> {
        self.schemas.get_mut(class_name).ok_or_else(|| {
            DbError::new(
                ErrorCode::InvalidClassName,
                format!("Class {} does not exist.", class_name),
            )
        })
    }
}

/// Storage adapter keeping every class in process memory.
///
/// With a data directory configured the whole state is written as a
/// snapshot on [`flush`](MemoryStorageAdapter::flush) and reloaded on start.
pub struct MemoryStorageAdapter {
    state: RwLock<State>,
    store: Option<SnapshotStore>,
    dirty: AtomicBool,
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageAdapter {
    /// Creates an empty, memory-only adapter.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            store: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Creates an adapter backed by snapshots in `config.data_dir`, loading
    /// the latest snapshot if one exists.
    pub fn from_config(config: &DbConfig) -> Result<Self, DbError> {
        let Some(data_dir) = &config.data_dir else {
            return Ok(Self::new());
        };
        let store = SnapshotStore::new(data_dir, config);
        let mut state = State::default();
        if let Some(classes) = store.load()? {
            info!(
                "Loaded snapshot with {} classes from {}",
                classes.len(),
                data_dir.display()
            );
            for class in classes {
                if let Some(schema) = class.schema {
                    state.schemas.insert(class.class_name.clone(), schema);
                }
                state.collections.insert(
                    class.class_name,
                    Collection {
                        objects: class.objects,
                        unique: class.unique,
                    },
                );
            }
        }
        Ok(Self {
            state: RwLock::new(state),
            store: Some(store),
            dirty: AtomicBool::new(false),
        })
    }

    /// Returns true if there are changes not yet written to a snapshot.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(AtomicOrdering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }

    /// Writes a snapshot if anything changed since the last flush.
    ///
    /// # Returns
    /// Whether a snapshot was written. Always false without a data directory.
    pub fn flush(&self) -> Result<bool, DbError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        if let Err(e) = store.save(snapshot) {
            self.mark_dirty();
            return Err(e);
        }
        Ok(true)
    }

    fn snapshot(&self) -> Vec<ClassSnapshot> {
        let state = self.state.read();
        let mut names: Vec<&String> = state
            .collections
            .keys()
            .chain(state.schemas.keys())
            .collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| {
                let collection = state.collections.get(name).cloned().unwrap_or_default();
                ClassSnapshot {
                    class_name: name.clone(),
                    schema: state.schemas.get(name).cloned(),
                    objects: collection.objects,
                    unique: collection.unique,
                }
            })
            .collect()
    }
}

/// Stores the built-in timestamps as plain ISO strings.
fn normalize_timestamps(object: &mut Document) {
    for key in ["createdAt", "updatedAt"] {
        if let Some(iso) = object
            .get(key)
            .and_then(|v| v.get("iso"))
            .and_then(Value::as_str)
            .map(str::to_string)
        {
            object.insert(key.to_string(), Value::String(iso));
        }
    }
}

fn set_path(object: &mut Document, path: &str, value: Option<Value>) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = object;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    match value {
        Some(value) => {
            current.insert(last.to_string(), value);
        }
        None => {
            current.remove(last);
        }
    }
}

fn apply_update(object: &mut Document, update: &Document) -> Result<(), DbError> {
    for (key, value) in update {
        match UpdateOp::parse(value)? {
            Some(op) => {
                let updated = op.apply(lookup_path(object, key))?;
                set_path(object, key, updated);
            }
            None => set_path(object, key, Some(value.clone())),
        }
    }
    normalize_timestamps(object);
    Ok(())
}

/// Builds the seed of an upserted object from the query's equality constraints.
fn seed_from_query(query: &Query) -> Document {
    let mut seed = Document::new();
    for (key, value) in query {
        if key.starts_with('$') {
            continue;
        }
        let is_operator = value
            .as_object()
            .map(|m| m.keys().any(|k| k.starts_with('$')))
            .unwrap_or(false);
        if !is_operator {
            set_path(&mut seed, key, Some(value.clone()));
        }
    }
    seed
}

fn unique_key<'a>(object: &'a Document, fields: &[String]) -> Option<Vec<&'a Value>> {
    fields
        .iter()
        .map(|f| lookup_path(object, f).filter(|v| !v.is_null()))
        .collect()
}

fn duplicate_value_error() -> DbError {
    DbError::new(
        ErrorCode::DuplicateValue,
        "A duplicate value for a field with unique values was provided",
    )
}

/// Fails if `candidate` collides with any object other than the one at `skip`.
fn check_unique(
    collection: &Collection,
    candidate: &Document,
    skip: Option<usize>,
) -> Result<(), DbError> {
    let candidate_id = candidate.get("objectId");
    for (index, other) in collection.objects.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        if candidate_id.is_some() && other.get("objectId") == candidate_id {
            return Err(duplicate_value_error());
        }
        for fields in &collection.unique {
            let (Some(a), Some(b)) = (unique_key(candidate, fields), unique_key(other, fields)) else {
                continue;
            };
            if a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y)) {
                return Err(duplicate_value_error());
            }
        }
    }
    Ok(())
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn project(object: Document, keys: &[String]) -> Document {
    object
        .into_iter()
        .filter(|(key, _)| {
            ALWAYS_KEPT_KEYS.contains(&key.as_str())
                || keys
                    .iter()
                    .any(|k| k == key || k.split('.').next() == Some(key.as_str()))
        })
        .collect()
}

impl MemoryStorageAdapter {
    /// Updates matching objects in place; stops after the first when `first_only`.
    fn update_matching(
        &self,
        class_name: &str,
        query: &Query,
        update: &Document,
        first_only: bool,
    ) -> Result<Vec<Document>, DbError> {
        let mut state = self.state.write();
        let Some(collection) = state.collections.get_mut(class_name) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for index in 0..collection.objects.len() {
            if !matches_query(&collection.objects[index], query) {
                continue;
            }
            let mut candidate = collection.objects[index].clone();
            apply_update(&mut candidate, update)?;
            check_unique(collection, &candidate, Some(index))?;
            collection.objects[index] = candidate.clone();
            updated.push(candidate);
            if first_only {
                break;
            }
        }
        if !updated.is_empty() {
            self.mark_dirty();
        }
        Ok(updated)
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn find(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError> {
        let state = self.state.read();
        let Some(collection) = state.collections.get(class_name) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Document> = collection
            .objects
            .iter()
            .filter(|object| matches_query(object, query))
            .cloned()
            .collect();
        drop(state);

        if !options.sort.is_empty() {
            results.sort_by(|a, b| {
                for (key, direction) in &options.sort {
                    let ordering = compare_optional(lookup_path(a, key), lookup_path(b, key));
                    let ordering = match direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let results = results
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX));
        Ok(match &options.keys {
            Some(keys) => results.map(|object| project(object, keys)).collect(),
            None => results.collect(),
        })
    }

    async fn create_object(
        &self,
        class_name: &str,
        _schema: &Schema,
        mut object: Document,
    ) -> Result<Document, DbError> {
        normalize_timestamps(&mut object);
        let mut state = self.state.write();
        let collection = state.collections.entry(class_name.to_string()).or_default();
        check_unique(collection, &object, None)?;
        collection.objects.push(object.clone());
        self.mark_dirty();
        Ok(object)
    }

    async fn update_objects_by_query(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<u64, DbError> {
        let updated = self.update_matching(class_name, query, update, false)?;
        Ok(updated.len() as u64)
    }

    async fn upsert_one_object(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<(), DbError> {
        if !self.update_matching(class_name, query, update, true)?.is_empty() {
            return Ok(());
        }
        let mut object = seed_from_query(query);
        apply_update(&mut object, update)?;
        object
            .entry("objectId".to_string())
            .or_insert_with(|| Value::String(new_object_id()));

        let mut state = self.state.write();
        let collection = state.collections.entry(class_name.to_string()).or_default();
        check_unique(collection, &object, None)?;
        collection.objects.push(object);
        self.mark_dirty();
        Ok(())
    }

    async fn find_one_and_update(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &Query,
        update: &Document,
    ) -> Result<Option<Document>, DbError> {
        Ok(self
            .update_matching(class_name, query, update, true)?
            .into_iter()
            .next())
    }

    async fn delete_objects_by_query(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &Query,
    ) -> Result<u64, DbError> {
        let mut state = self.state.write();
        let Some(collection) = state.collections.get_mut(class_name) else {
            return Err(DbError::object_not_found());
        };
        let before = collection.objects.len();
        collection.objects.retain(|object| !matches_query(object, query));
        let removed = (before - collection.objects.len()) as u64;
        if removed == 0 {
            return Err(DbError::object_not_found());
        }
        self.mark_dirty();
        Ok(removed)
    }

    async fn count(&self, class_name: &str, _schema: &Schema, query: &Query) -> Result<u64, DbError> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(class_name)
            .map(|c| c.objects.iter().filter(|o| matches_query(o, query)).count() as u64)
            .unwrap_or(0))
    }

    async fn get_all_classes(&self) -> Result<Vec<Schema>, DbError> {
        let state = self.state.read();
        let mut schemas: Vec<Schema> = state.schemas.values().cloned().collect();
        schemas.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        Ok(schemas)
    }

    async fn get_class(&self, class_name: &str) -> Result<Option<Schema>, DbError> {
        Ok(self.state.read().schemas.get(class_name).cloned())
    }

    async fn create_class(&self, class_name: &str, schema: &Schema) -> Result<Schema, DbError> {
        let mut state = self.state.write();
        if state.schemas.contains_key(class_name) {
            return Err(DbError::new(
                ErrorCode::DuplicateValue,
                format!("Class {} already exists.", class_name),
            ));
        }
        state.schemas.insert(class_name.to_string(), schema.clone());
        state.collections.entry(class_name.to_string()).or_default();
        self.mark_dirty();
        debug!("Created class {}", class_name);
        Ok(schema.clone())
    }

    async fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> Result<(), DbError> {
        let mut state = self.state.write();
        let schema = state
            .schemas
            .get_mut(class_name)
            .ok_or_else(DbError::object_not_found)?;
        if schema.fields.contains_key(field_name) {
            return Ok(());
        }
        schema
            .fields
            .insert(field_name.to_string(), field_type.clone());
        self.mark_dirty();
        Ok(())
    }

    async fn delete_fields(
        &self,
        class_name: &str,
        _schema: &Schema,
        field_names: &[String],
    ) -> Result<(), DbError> {
        let mut state = self.state.write();
        let schema = state.schema_mut(class_name)?;
        for field in field_names {
            schema.fields.remove(field);
        }
        if let Some(collection) = state.collections.get_mut(class_name) {
            for object in &mut collection.objects {
                for field in field_names {
                    object.remove(field);
                }
            }
            collection
                .unique
                .retain(|fields| !fields.iter().any(|f| field_names.contains(f)));
        }
        self.mark_dirty();
        Ok(())
    }

    async fn delete_class(&self, class_name: &str) -> Result<bool, DbError> {
        let mut state = self.state.write();
        let had_schema = state.schemas.remove(class_name).is_some();
        let had_data = state.collections.remove(class_name).is_some();
        if had_schema || had_data {
            self.mark_dirty();
        }
        Ok(had_schema)
    }

    async fn ensure_uniqueness(
        &self,
        class_name: &str,
        _schema: &Schema,
        field_names: &[String],
    ) -> Result<(), DbError> {
        let mut state = self.state.write();
        let collection = state.collections.entry(class_name.to_string()).or_default();
        if collection.unique.iter().any(|fields| fields == field_names) {
            return Ok(());
        }

        let keys: Vec<Vec<&Value>> = collection
            .objects
            .iter()
            .filter_map(|object| unique_key(object, field_names))
            .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y)) {
                    return Err(DbError::new(
                        ErrorCode::DuplicateValue,
                        "Tried to ensure field uniqueness for a class that already has duplicates.",
                    ));
                }
            }
        }
        collection.unique.push(field_names.to_vec());
        self.mark_dirty();
        Ok(())
    }

    async fn set_class_level_permissions(
        &self,
        class_name: &str,
        clp: &ClassLevelPermissions,
    ) -> Result<(), DbError> {
        let mut state = self.state.write();
        state.schema_mut(class_name)?.class_level_permissions = clp.clone();
        self.mark_dirty();
        Ok(())
    }

    async fn set_indexes(
        &self,
        class_name: &str,
        indexes: &BTreeMap<String, Value>,
    ) -> Result<(), DbError> {
        let mut state = self.state.write();
        state.schema_mut(class_name)?.indexes = indexes.clone();
        self.mark_dirty();
        Ok(())
    }

    async fn perform_initialization(&self, volatile_schemas: &[Schema]) -> Result<(), DbError> {
        let mut state = self.state.write();
        for schema in volatile_schemas {
            state
                .collections
                .entry(schema.class_name.clone())
                .or_default();
        }
        Ok(())
    }
}
