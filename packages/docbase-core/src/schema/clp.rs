//! Class-level permissions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acl::{PUBLIC, ROLE_PREFIX};
use crate::error::{DbError, ErrorCode};
use crate::schema::defaults::base_columns;
use crate::schema::types::FieldType;

/// Subjects permitted for one operation, each mapped to `true`.
pub type PermissionRule = BTreeMap<String, bool>;

/// Key requiring an authenticated caller instead of naming subjects.
pub const REQUIRES_AUTHENTICATION: &str = "requiresAuthentication";

/// An operation checked against class-level permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Find,
    Count,
    Create,
    Update,
    Delete,
    AddField,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Find => "find",
            Operation::Count => "count",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::AddField => "addField",
        }
    }

    /// Read operations are governed by `readUserFields`, the rest by `writeUserFields`.
    pub fn is_read(self) -> bool {
        matches!(self, Operation::Get | Operation::Find | Operation::Count)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-class access rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLevelPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_field: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_user_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_user_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_fields: Option<BTreeMap<String, Vec<String>>>,
}

const VALID_OPERATIONS: &[&str] = &[
    "find",
    "count",
    "get",
    "create",
    "update",
    "delete",
    "addField",
    "readUserFields",
    "writeUserFields",
    "protectedFields",
];

impl ClassLevelPermissions {
    /// Parses REST-format permissions, rejecting unknown operations and malformed rules.
    pub fn from_json(value: &Value) -> Result<Self, DbError> {
        let Some(map) = value.as_object() else {
            return Err(DbError::invalid_json("class level permissions must be an object"));
        };
        for (operation, rule) in map {
            if !VALID_OPERATIONS.contains(&operation.as_str()) {
                return Err(DbError::invalid_json(format!(
                    "{} is not a valid operation for class level permissions",
                    operation
                )));
            }
            match operation.as_str() {
                "readUserFields" | "writeUserFields" => {
                    let valid = rule
                        .as_array()
                        .map(|items| items.iter().all(Value::is_string))
                        .unwrap_or(false);
                    if !valid {
                        return Err(DbError::invalid_json(format!(
                            "'{}' is not a valid value for class level permissions {}",
                            rule, operation
                        )));
                    }
                }
                "protectedFields" => {
                    let Some(entities) = rule.as_object() else {
                        return Err(DbError::invalid_json(format!(
                            "'{}' is not a valid value for class level permissions protectedFields",
                            rule
                        )));
                    };
                    for (entity, fields) in entities {
                        validate_protected_fields_key(entity)?;
                        if !fields.as_array().map(|f| f.iter().all(Value::is_string)).unwrap_or(false) {
                            return Err(DbError::invalid_json(format!(
                                "'{}' is not a valid value for protectedFields[{}] - expected an array.",
                                fields, entity
                            )));
                        }
                    }
                }
                _ => {
                    let Some(entries) = rule.as_object() else {
                        return Err(DbError::invalid_json(format!(
                            "'{}' is not a valid value for class level permissions {}",
                            rule, operation
                        )));
                    };
                    for (key, permit) in entries {
                        validate_permission_key(key)?;
                        if permit != &Value::Bool(true) {
                            return Err(DbError::invalid_json(format!(
                                "'{}' is not a valid value for class level permissions {}:{}:{}",
                                permit, operation, key, permit
                            )));
                        }
                    }
                }
            }
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Default::default()))
    }

    /// Permissions that allow every operation to the public.
    pub fn public() -> Self {
        let public: PermissionRule = [(PUBLIC.to_string(), true)].into_iter().collect();
        Self {
            find: Some(public.clone()),
            get: Some(public.clone()),
            count: Some(public.clone()),
            create: Some(public.clone()),
            update: Some(public.clone()),
            delete: Some(public.clone()),
            add_field: Some(public),
            ..Default::default()
        }
    }

    pub fn rule(&self, operation: Operation) -> Option<&PermissionRule> {
        match operation {
            Operation::Get => self.get.as_ref(),
            Operation::Find => self.find.as_ref(),
            Operation::Count => self.count.as_ref(),
            Operation::Create => self.create.as_ref(),
            Operation::Update => self.update.as_ref(),
            Operation::Delete => self.delete.as_ref(),
            Operation::AddField => self.add_field.as_ref(),
        }
    }

    /// Pointer fields that grant access for an operation.
    pub fn pointer_fields(&self, operation: Operation) -> &[String] {
        let fields = if operation.is_read() {
            &self.read_user_fields
        } else {
            &self.write_user_fields
        };
        fields.as_deref().unwrap_or(&[])
    }

    /// Validates the permissions against the class's fields.
    pub fn validate(&self, fields: &BTreeMap<String, FieldType>) -> Result<(), DbError> {
        for (operation, names) in [
            ("readUserFields", &self.read_user_fields),
            ("writeUserFields", &self.write_user_fields),
        ] {
            for name in names.iter().flatten() {
                let is_user_pointer = matches!(
                    fields.get(name),
                    Some(FieldType::Pointer { target_class }) if target_class == "_User"
                );
                if !is_user_pointer {
                    return Err(DbError::invalid_json(format!(
                        "'{}' is not a valid column for class level pointer permissions {}",
                        name, operation
                    )));
                }
            }
        }
        for (entity, protected) in self.protected_fields.iter().flatten() {
            for field in protected {
                if base_columns().iter().any(|(name, _)| name == field) {
                    return Err(DbError::invalid_json(format!(
                        "Default field '{}' can not be protected",
                        field
                    )));
                }
                if !fields.contains_key(field) {
                    return Err(DbError::invalid_json(format!(
                        "Field '{}' in protectedFields:{} does not exist",
                        field, entity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fields hidden from a caller, intersecting every protected set that applies to them.
    pub fn protected_fields_for(&self, acl_group: &[String], authenticated: bool) -> BTreeSet<String> {
        let Some(protected) = &self.protected_fields else {
            return BTreeSet::new();
        };
        let mut result: Option<BTreeSet<String>> = None;
        for (entity, fields) in protected {
            let applies = entity == PUBLIC
                || (authenticated && entity == "authenticated")
                || acl_group.iter().any(|g| g == entity);
            if !applies {
                continue;
            }
            let set: BTreeSet<String> = fields.iter().cloned().collect();
            result = Some(match result {
                None => set,
                Some(current) => current.intersection(&set).cloned().collect(),
            });
        }
        result.unwrap_or_default()
    }
}

fn is_user_id(key: &str) -> bool {
    key.len() == 10 && key.chars().all(|c| c.is_ascii_alphanumeric())
}

fn validate_permission_key(key: &str) -> Result<(), DbError> {
    let valid = key == PUBLIC
        || key == REQUIRES_AUTHENTICATION
        || key.starts_with(ROLE_PREFIX)
        || is_user_id(key);
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_json(format!(
            "'{}' is not a valid key for class level permissions",
            key
        )))
    }
}

fn validate_protected_fields_key(key: &str) -> Result<(), DbError> {
    let valid = key == PUBLIC
        || key == "authenticated"
        || key.starts_with(ROLE_PREFIX)
        || is_user_id(key);
    if valid {
        Ok(())
    } else {
        Err(DbError::new(
            ErrorCode::InvalidJson,
            format!("'{}' is not a valid key for class level permissions", key),
        ))
    }
}

/// Public or group-based check of a single operation.
///
/// A class without a rule for the operation is open to everyone.
pub fn test_permissions(
    clp: Option<&ClassLevelPermissions>,
    acl_group: &[String],
    operation: Operation,
) -> bool {
    let Some(rule) = clp.and_then(|c| c.rule(operation)) else {
        return true;
    };
    if rule.get(PUBLIC).copied().unwrap_or(false) {
        return true;
    }
    acl_group
        .iter()
        .any(|entry| rule.get(entry).copied().unwrap_or(false))
}

/// Full permission check including `requiresAuthentication` and pointer permissions.
pub fn validate_permission(
    clp: Option<&ClassLevelPermissions>,
    class_name: &str,
    acl_group: &[String],
    operation: Operation,
) -> Result<(), DbError> {
    if test_permissions(clp, acl_group, operation) {
        return Ok(());
    }
    let Some(clp) = clp else {
        return Ok(());
    };
    let Some(rule) = clp.rule(operation) else {
        return Ok(());
    };

    if rule.get(REQUIRES_AUTHENTICATION).copied().unwrap_or(false) {
        let anonymous = acl_group.is_empty() || (acl_group.len() == 1 && acl_group[0] == PUBLIC);
        if anonymous {
            return Err(DbError::new(
                ErrorCode::ObjectNotFound,
                "Permission denied, user needs to be authenticated.",
            ));
        }
        return Ok(());
    }

    let denied = || {
        DbError::new(
            ErrorCode::OperationForbidden,
            format!("Permission denied for action {} on class {}.", operation, class_name),
        )
    };
    // No pointer exists yet to check against on create.
    if operation == Operation::Create {
        return Err(denied());
    }
    if !clp.pointer_fields(operation).is_empty() {
        return Ok(());
    }
    Err(denied())
}
