//! Class schemas: field maps, class-level permissions and indexes.

pub mod cache;
pub mod clp;
pub mod controller;
pub mod defaults;
pub mod defined;
pub mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use clp::{ClassLevelPermissions, Operation};
pub use controller::SchemaController;
pub use types::FieldType;

/// Schema of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub class_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub class_level_permissions: ClassLevelPermissions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexes: BTreeMap<String, Value>,
}

impl Schema {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: BTreeMap::new(),
            class_level_permissions: ClassLevelPermissions::default(),
            indexes: BTreeMap::new(),
        }
    }

    /// Schema of a relation join collection.
    pub fn join_table(name: impl Into<String>) -> Self {
        let mut schema = Self::new(name);
        schema.fields.insert("relatedId".to_string(), FieldType::String);
        schema.fields.insert("owningId".to_string(), FieldType::String);
        schema
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Adds the default columns for the class. Explicit fields win.
    pub fn with_defaults(mut self) -> Self {
        for (name, field_type) in defaults::default_columns(&self.class_name) {
            self.fields.entry(name).or_insert(field_type);
        }
        self
    }

    /// Converts to the storage representation: `ACL` becomes `_rperm`/`_wperm`
    /// and `_User.password` becomes `_hashed_password`.
    pub fn to_adapter_schema(&self) -> Schema {
        let mut schema = self.clone().with_defaults();
        schema.fields.remove("ACL");
        schema.fields.insert("_rperm".to_string(), FieldType::Array);
        schema.fields.insert("_wperm".to_string(), FieldType::Array);
        if schema.class_name == "_User" {
            schema.fields.remove("password");
            schema
                .fields
                .insert("_hashed_password".to_string(), FieldType::String);
        }
        schema
    }

    /// Inverse of [`Schema::to_adapter_schema`], with defaults injected.
    pub fn from_adapter_schema(mut schema: Schema) -> Schema {
        schema.fields.remove("_rperm");
        schema.fields.remove("_wperm");
        schema.fields.insert("ACL".to_string(), FieldType::Acl);
        if schema.class_name == "_User" {
            schema.fields.remove("authData");
            schema.fields.remove("_hashed_password");
            schema.fields.insert("password".to_string(), FieldType::String);
        }
        schema.with_defaults()
    }
}
