//! Declarative class definitions synchronised into the live schema.
//!
//! Definitions describe the desired fields, indexes and class-level
//! permissions of each class. A run creates missing classes, adds missing
//! fields and replaces permissions and indexes that differ. `addField` is
//! always reset to `{}` so clients cannot grow a managed schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::database::DatabaseController;
use crate::error::{DbError, ErrorCode};
use crate::schema::clp::PermissionRule;
use crate::schema::defaults::{is_default_column, is_join_table, is_system_class, is_volatile_class};
use crate::schema::{ClassLevelPermissions, FieldType, Schema};

/// Desired state of one class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDefinition {
    pub class_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_level_permissions: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefinedSchemasOptions {
    /// Drop empty classes that have no definition
    pub delete_extra_classes: bool,
    /// Drop and re-add fields whose type changed instead of keeping them
    pub recreate_modified_fields: bool,
    /// Drop fields that have no definition
    pub strict: bool,
}

/// Changes applied by one synchronisation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created_classes: Vec<String>,
    pub added_fields: Vec<(String, String)>,
    pub deleted_fields: Vec<(String, String)>,
    pub recreated_fields: Vec<(String, String)>,
    pub updated_permissions: Vec<String>,
    pub updated_indexes: Vec<String>,
    pub deleted_classes: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.created_classes.is_empty()
            && self.added_fields.is_empty()
            && self.deleted_fields.is_empty()
            && self.recreated_fields.is_empty()
            && self.updated_permissions.is_empty()
            && self.updated_indexes.is_empty()
            && self.deleted_classes.is_empty()
    }
}

/// Parsed form of a definition.
struct ResolvedDefinition {
    class_name: String,
    fields: BTreeMap<String, FieldType>,
    indexes: Option<BTreeMap<String, Value>>,
    class_level_permissions: ClassLevelPermissions,
}

fn delete_op() -> Value {
    json!({"__op": "Delete"})
}

/// Checks a set of definitions without touching storage.
pub fn validate_definitions(definitions: &[ClassDefinition]) -> Result<(), DbError> {
    resolve_definitions(definitions).map(|_| ())
}

fn resolve_definitions(definitions: &[ClassDefinition]) -> Result<Vec<ResolvedDefinition>, DbError> {
    let mut resolved: Vec<ResolvedDefinition> = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let class_name = &definition.class_name;
        if resolved.iter().any(|r| &r.class_name == class_name) {
            return Err(DbError::invalid_json(format!(
                "Class {} is defined more than once.",
                class_name
            )));
        }
        if is_volatile_class(class_name) {
            return Err(DbError::new(
                ErrorCode::InvalidSchemaOperation,
                format!("Class {} is managed internally and cannot be defined.", class_name),
            ));
        }

        let mut fields = BTreeMap::new();
        for (name, spec) in &definition.fields {
            if is_default_column(class_name, name) {
                return Err(DbError::new(
                    ErrorCode::ChangedImmutableField,
                    format!("Field {} of {} is a default field and cannot be defined.", name, class_name),
                ));
            }
            fields.insert(name.clone(), FieldType::from_json(spec)?);
        }

        let mut class_level_permissions = match &definition.class_level_permissions {
            Some(value) => ClassLevelPermissions::from_json(value)?,
            None => {
                warn!("classLevelPermissions not provided for {}.", class_name);
                ClassLevelPermissions::default()
            }
        };
        class_level_permissions.add_field = Some(PermissionRule::new());

        let all_fields: BTreeMap<String, FieldType> = Schema {
            fields: fields.clone(),
            ..Schema::new(class_name.clone())
        }
        .with_defaults()
        .fields;
        class_level_permissions.validate(&all_fields)?;

        resolved.push(ResolvedDefinition {
            class_name: class_name.clone(),
            fields,
            indexes: definition.indexes.clone(),
            class_level_permissions,
        });
    }
    Ok(resolved)
}

/// Applies class definitions through the schema controller.
pub struct DefinedSchemas {
    database: DatabaseController,
    definitions: Vec<ClassDefinition>,
    options: DefinedSchemasOptions,
}

impl DefinedSchemas {
    pub fn new(
        database: DatabaseController,
        definitions: Vec<ClassDefinition>,
        options: DefinedSchemasOptions,
    ) -> Self {
        Self {
            database,
            definitions,
            options,
        }
    }

    /// Brings the schema in line with the definitions.
    ///
    /// # Returns
    /// The changes made. Running again without changing the definitions
    /// yields an empty report.
    pub async fn execute(&self) -> Result<SyncReport, DbError> {
        let definitions = resolve_definitions(&self.definitions)?;
        let schema = self.database.load_schema(true).await?;
        let mut report = SyncReport::default();

        for definition in &definitions {
            match schema
                .get_one_schema(&definition.class_name, false, false)
                .await?
            {
                Some(existing) => self.update_class(definition, &existing, &mut report).await?,
                None => self.create_class(definition, &mut report).await?,
            }
        }

        if self.options.delete_extra_classes {
            self.delete_extra_classes(&definitions, &mut report).await?;
        }

        info!(
            "Schema sync: {} classes created, {} fields added, {} fields deleted",
            report.created_classes.len(),
            report.added_fields.len(),
            report.deleted_fields.len()
        );
        Ok(report)
    }

    async fn create_class(
        &self,
        definition: &ResolvedDefinition,
        report: &mut SyncReport,
    ) -> Result<(), DbError> {
        let schema = self.database.schema();
        schema
            .add_class_if_not_exists(
                &definition.class_name,
                definition.fields.clone(),
                Some(definition.class_level_permissions.clone()),
            )
            .await?;
        report.created_classes.push(definition.class_name.clone());

        if let Some(indexes) = definition.indexes.as_ref().filter(|i| !i.is_empty()) {
            let submitted: Map<String, Value> = indexes.clone().into_iter().collect();
            schema
                .update_class(&definition.class_name, &Map::new(), None, Some(&submitted))
                .await?;
            report.updated_indexes.push(definition.class_name.clone());
        }
        Ok(())
    }

    async fn update_class(
        &self,
        definition: &ResolvedDefinition,
        existing: &Schema,
        report: &mut SyncReport,
    ) -> Result<(), DbError> {
        let class_name = &definition.class_name;
        let mut first_pass = Map::new();
        let mut second_pass = Map::new();

        for (name, field_type) in &definition.fields {
            match existing.fields.get(name) {
                None => {
                    first_pass.insert(name.clone(), field_type.to_value());
                    report.added_fields.push((class_name.clone(), name.clone()));
                }
                Some(current) if current != field_type => {
                    if self.options.recreate_modified_fields {
                        first_pass.insert(name.clone(), delete_op());
                        second_pass.insert(name.clone(), field_type.to_value());
                        report.recreated_fields.push((class_name.clone(), name.clone()));
                    } else {
                        warn!(
                            "Field {}.{} is {} but defined as {}; keeping the stored type",
                            class_name, name, current, field_type
                        );
                    }
                }
                Some(_) => {}
            }
        }

        if self.options.strict {
            for name in existing.fields.keys() {
                if !definition.fields.contains_key(name) && !is_default_column(class_name, name) {
                    first_pass.insert(name.clone(), delete_op());
                    report.deleted_fields.push((class_name.clone(), name.clone()));
                }
            }
        }

        let mut first_indexes = Map::new();
        let mut second_indexes = Map::new();
        if let Some(indexes) = &definition.indexes {
            for (name, spec) in indexes {
                match existing.indexes.get(name) {
                    None => {
                        first_indexes.insert(name.clone(), spec.clone());
                    }
                    Some(current) if current != spec => {
                        first_indexes.insert(name.clone(), delete_op());
                        second_indexes.insert(name.clone(), spec.clone());
                    }
                    Some(_) => {}
                }
            }
            for name in existing.indexes.keys() {
                if !indexes.contains_key(name) {
                    first_indexes.insert(name.clone(), delete_op());
                }
            }
        }
        if !first_indexes.is_empty() {
            report.updated_indexes.push(class_name.clone());
        }

        let permissions = (existing.class_level_permissions != definition.class_level_permissions)
            .then(|| definition.class_level_permissions.clone());
        if permissions.is_some() {
            report.updated_permissions.push(class_name.clone());
        }

        let schema = self.database.schema();
        if !first_pass.is_empty() || !first_indexes.is_empty() || permissions.is_some() {
            let indexes = (!first_indexes.is_empty()).then_some(&first_indexes);
            schema
                .update_class(class_name, &first_pass, permissions, indexes)
                .await?;
        }
        if !second_pass.is_empty() || !second_indexes.is_empty() {
            let indexes = (!second_indexes.is_empty()).then_some(&second_indexes);
            schema
                .update_class(class_name, &second_pass, None, indexes)
                .await?;
        }
        Ok(())
    }

    async fn delete_extra_classes(
        &self,
        definitions: &[ResolvedDefinition],
        report: &mut SyncReport,
    ) -> Result<(), DbError> {
        let snapshot = self.database.schema().snapshot();
        for class_name in snapshot.class_names() {
            let defined = definitions.iter().any(|d| d.class_name == class_name);
            if defined || is_system_class(&class_name) || is_join_table(&class_name) {
                continue;
            }
            match self.database.delete_schema(&class_name).await {
                Ok(()) => report.deleted_classes.push(class_name),
                Err(e) if e.is(ErrorCode::InvalidSchemaOperation) => {
                    warn!("Keeping undefined class {}: {}", class_name, e.message);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
