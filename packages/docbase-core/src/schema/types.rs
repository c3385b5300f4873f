//! Field types and REST value type inference.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbError, ErrorCode};
use crate::schema::defaults::{class_name_is_valid, invalid_class_name_message};

/// Type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    Bytes,
    Polygon,
    Pointer {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    Relation {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    #[serde(rename = "ACL")]
    Acl,
}

impl FieldType {
    pub fn pointer(target_class: impl Into<String>) -> Self {
        FieldType::Pointer {
            target_class: target_class.into(),
        }
    }

    pub fn relation(target_class: impl Into<String>) -> Self {
        FieldType::Relation {
            target_class: target_class.into(),
        }
    }

    /// Returns the bare type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Object => "Object",
            FieldType::Array => "Array",
            FieldType::GeoPoint => "GeoPoint",
            FieldType::File => "File",
            FieldType::Bytes => "Bytes",
            FieldType::Polygon => "Polygon",
            FieldType::Pointer { .. } => "Pointer",
            FieldType::Relation { .. } => "Relation",
            FieldType::Acl => "ACL",
        }
    }

    pub fn target_class(&self) -> Option<&str> {
        match self {
            FieldType::Pointer { target_class } | FieldType::Relation { target_class } => {
                Some(target_class)
            }
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation { .. })
    }

    /// Parses a field definition such as `{"type": "Pointer", "targetClass": "_User"}`.
    pub fn from_json(value: &Value) -> Result<Self, DbError> {
        let type_name = match value.get("type") {
            Some(Value::String(name)) => name.as_str(),
            _ => return Err(DbError::invalid_json("invalid JSON")),
        };

        if type_name == "Pointer" || type_name == "Relation" {
            let target = match value.get("targetClass") {
                None | Some(Value::Null) => {
                    return Err(DbError::new(
                        ErrorCode::MissingRequiredField,
                        format!("type {} needs a class name", type_name),
                    ))
                }
                Some(Value::String(target)) => target.clone(),
                Some(_) => return Err(DbError::invalid_json("invalid JSON")),
            };
            if !class_name_is_valid(&target) {
                return Err(DbError::new(
                    ErrorCode::InvalidClassName,
                    invalid_class_name_message(&target),
                ));
            }
            return Ok(if type_name == "Pointer" {
                FieldType::pointer(target)
            } else {
                FieldType::relation(target)
            });
        }

        Ok(match type_name {
            "String" => FieldType::String,
            "Number" => FieldType::Number,
            "Boolean" => FieldType::Boolean,
            "Date" => FieldType::Date,
            "Object" => FieldType::Object,
            "Array" => FieldType::Array,
            "GeoPoint" => FieldType::GeoPoint,
            "File" => FieldType::File,
            "Bytes" => FieldType::Bytes,
            "Polygon" => FieldType::Polygon,
            "ACL" => FieldType::Acl,
            other => {
                return Err(DbError::new(
                    ErrorCode::IncorrectType,
                    format!("invalid field type: {}", other),
                ))
            }
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_class() {
            Some(target) => write!(f, "{}<{}>", self.type_name(), target),
            None => write!(f, "{}", self.type_name()),
        }
    }
}

/// Parses a map of field definitions.
pub fn parse_fields(value: &Value) -> Result<BTreeMap<String, FieldType>, DbError> {
    let Some(map) = value.as_object() else {
        return Err(DbError::invalid_json("fields must be an object"));
    };
    let mut fields = BTreeMap::new();
    for (name, definition) in map {
        fields.insert(name.clone(), FieldType::from_json(definition)?);
    }
    Ok(fields)
}

/// Infers the schema type of a REST value.
///
/// Returns `Ok(None)` for null values and `Delete` operations, which never
/// grow the schema.
pub fn infer_type(value: &Value) -> Result<Option<FieldType>, DbError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(_) => Ok(Some(FieldType::Boolean)),
        Value::String(_) => Ok(Some(FieldType::String)),
        Value::Number(_) => Ok(Some(FieldType::Number)),
        Value::Array(_) => Ok(Some(FieldType::Array)),
        Value::Object(map) => infer_object_type(map),
    }
}

fn infer_object_type(map: &serde_json::Map<String, Value>) -> Result<Option<FieldType>, DbError> {
    if let Some(kind) = map.get("__type").and_then(Value::as_str) {
        let class_name = map.get("className").and_then(Value::as_str);
        let inferred = match kind {
            "Pointer" => class_name.map(FieldType::pointer),
            "Relation" => class_name.map(FieldType::relation),
            "File" if map.contains_key("name") => Some(FieldType::File),
            "Date" if map.contains_key("iso") => Some(FieldType::Date),
            "GeoPoint"
                if !map.get("latitude").unwrap_or(&Value::Null).is_null()
                    && !map.get("longitude").unwrap_or(&Value::Null).is_null() =>
            {
                Some(FieldType::GeoPoint)
            }
            "Bytes" if map.contains_key("base64") => Some(FieldType::Bytes),
            "Polygon" if map.contains_key("coordinates") => Some(FieldType::Polygon),
            _ => None,
        };
        return match inferred {
            Some(field_type) => Ok(Some(field_type)),
            None => Err(DbError::new(
                ErrorCode::IncorrectType,
                format!("This is not a valid {}", kind),
            )),
        };
    }

    if let Some(inner) = map.get("$ne") {
        if !inner.is_null() {
            return infer_type(inner);
        }
    }

    if let Some(op) = map.get("__op").and_then(Value::as_str) {
        return match op {
            "Increment" => Ok(Some(FieldType::Number)),
            "Delete" => Ok(None),
            "Add" | "AddUnique" | "Remove" => Ok(Some(FieldType::Array)),
            "AddRelation" | "RemoveRelation" => {
                let target = map
                    .get("objects")
                    .and_then(Value::as_array)
                    .and_then(|objects| objects.first())
                    .and_then(|first| first.get("className"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| DbError::invalid_json(format!("{} requires pointer objects", op)))?;
                Ok(Some(FieldType::relation(target)))
            }
            "Batch" => match map.get("ops").and_then(Value::as_array).and_then(|ops| ops.first()) {
                Some(first) => infer_type(first),
                None => Err(DbError::invalid_json("Batch requires ops")),
            },
            other => Err(DbError::invalid_json(format!("unexpected op: {}", other))),
        };
    }

    Ok(Some(FieldType::Object))
}
