//! Default columns, system classes and name validation rules.

use std::collections::BTreeMap;

use crate::schema::types::FieldType;

/// Classes owned by the server itself.
pub const SYSTEM_CLASSES: &[&str] = &[
    "_User",
    "_Installation",
    "_Role",
    "_Session",
    "_Product",
    "_PushStatus",
    "_JobStatus",
    "_Hooks",
    "_GlobalConfig",
];

/// Classes whose schema is synthesized in memory on every reload.
pub const VOLATILE_CLASSES: &[&str] = &["_Hooks", "_JobStatus", "_PushStatus", "_GlobalConfig"];

/// Field names that may never be used.
const INVALID_COLUMNS: &[&str] = &["length"];

/// Internal update keys allowed even though they fail field-name validation.
pub const SPECIAL_UPDATE_KEYS: &[&str] = &[
    "_hashed_password",
    "_perishable_token",
    "_email_verify_token",
    "_email_verify_token_expires_at",
    "_account_lockout_expires_at",
    "_failed_login_count",
    "_perishable_token_expires_at",
    "_password_changed_at",
    "_password_history",
];

/// Internal query keys allowed at the top level of a query.
pub const SPECIAL_QUERY_KEYS: &[&str] = &[
    "$and",
    "$or",
    "$nor",
    "_rperm",
    "_wperm",
    "_perishable_token",
    "_email_verify_token",
    "_email_verify_token_expires_at",
    "_account_lockout_expires_at",
    "_failed_login_count",
];

/// Columns present on every class.
pub fn base_columns() -> Vec<(&'static str, FieldType)> {
    vec![
        ("objectId", FieldType::String),
        ("createdAt", FieldType::Date),
        ("updatedAt", FieldType::Date),
        ("ACL", FieldType::Acl),
    ]
}

/// Class-specific default columns, excluding the base columns.
pub fn class_columns(class_name: &str) -> Vec<(&'static str, FieldType)> {
    use FieldType::*;
    match class_name {
        "_User" => vec![
            ("username", String),
            ("password", String),
            ("email", String),
            ("emailVerified", Boolean),
            ("authData", Object),
        ],
        "_Installation" => vec![
            ("installationId", String),
            ("deviceToken", String),
            ("channels", Array),
            ("deviceType", String),
            ("pushType", String),
            ("GCMSenderId", String),
            ("timeZone", String),
            ("localeIdentifier", String),
            ("badge", Number),
            ("appVersion", String),
            ("appName", String),
            ("appIdentifier", String),
            ("parseVersion", String),
        ],
        "_Role" => vec![
            ("name", String),
            ("users", FieldType::relation("_User")),
            ("roles", FieldType::relation("_Role")),
        ],
        "_Session" => vec![
            ("user", FieldType::pointer("_User")),
            ("installationId", String),
            ("sessionToken", String),
            ("expiresAt", Date),
            ("createdWith", Object),
        ],
        "_Product" => vec![
            ("productIdentifier", String),
            ("download", File),
            ("downloadName", String),
            ("icon", File),
            ("order", Number),
            ("title", String),
            ("subtitle", String),
        ],
        "_PushStatus" => vec![
            ("pushTime", String),
            ("source", String),
            ("query", String),
            ("payload", String),
            ("title", String),
            ("expiry", Number),
            ("expiration_interval", Number),
            ("status", String),
            ("numSent", Number),
            ("numFailed", Number),
            ("pushHash", String),
            ("errorMessage", Object),
            ("sentPerType", Object),
            ("failedPerType", Object),
            ("sentPerUTCOffset", Object),
            ("failedPerUTCOffset", Object),
            ("count", Number),
        ],
        "_JobStatus" => vec![
            ("jobName", String),
            ("source", String),
            ("status", String),
            ("message", String),
            ("params", Object),
            ("finishedAt", Date),
        ],
        "_Hooks" => vec![
            ("functionName", String),
            ("className", String),
            ("triggerName", String),
            ("url", String),
        ],
        "_GlobalConfig" => vec![("params", Object), ("masterKeyOnly", Object)],
        _ => Vec::new(),
    }
}

/// All default columns of a class, base columns included.
pub fn default_columns(class_name: &str) -> BTreeMap<String, FieldType> {
    base_columns()
        .into_iter()
        .chain(class_columns(class_name))
        .map(|(name, field_type)| (name.to_string(), field_type))
        .collect()
}

pub fn is_default_column(class_name: &str, field_name: &str) -> bool {
    base_columns().iter().any(|(name, _)| *name == field_name)
        || class_columns(class_name).iter().any(|(name, _)| *name == field_name)
}

/// Columns that must be present when an object of the class is written.
pub fn required_write_columns(class_name: &str) -> &'static [&'static str] {
    match class_name {
        "_Product" => &["productIdentifier", "icon", "order", "title", "subtitle"],
        "_Role" => &["name", "ACL"],
        _ => &[],
    }
}

pub fn is_system_class(class_name: &str) -> bool {
    SYSTEM_CLASSES.contains(&class_name)
}

pub fn is_volatile_class(class_name: &str) -> bool {
    VOLATILE_CLASSES.contains(&class_name)
}

/// Matches `^[A-Za-z][A-Za-z0-9_]*$`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_word(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns true for `_Join:<field>:<class>` names.
pub fn is_join_table(class_name: &str) -> bool {
    let mut parts = class_name.splitn(3, ':');
    parts.next() == Some("_Join")
        && parts.next().map(is_word).unwrap_or(false)
        && parts.next().map(is_word).unwrap_or(false)
}

pub fn join_table_name(key: &str, class_name: &str) -> String {
    format!("_Join:{}:{}", key, class_name)
}

pub fn class_name_is_valid(class_name: &str) -> bool {
    is_system_class(class_name) || is_join_table(class_name) || field_name_is_valid(class_name, class_name)
}

pub fn invalid_class_name_message(class_name: &str) -> String {
    format!(
        "Invalid classname: {}, classnames can only have alphanumeric characters and _, and must start with an alpha character ",
        class_name
    )
}

pub fn field_name_is_valid(field_name: &str, class_name: &str) -> bool {
    if class_name != "_Hooks" && field_name == "className" {
        return false;
    }
    is_identifier(field_name) && !INVALID_COLUMNS.contains(&field_name)
}

/// Valid and not one of the class's default columns.
pub fn field_name_is_valid_for_class(field_name: &str, class_name: &str) -> bool {
    field_name_is_valid(field_name, class_name) && !is_default_column(class_name, field_name)
}

/// Root of a dotted field path (`a.b.c` -> `a`).
pub fn root_field_name(field_name: &str) -> &str {
    field_name.split('.').next().unwrap_or(field_name)
}
