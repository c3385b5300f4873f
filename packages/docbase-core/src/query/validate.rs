//! Structural validation of REST queries.

use serde_json::Value;

use crate::error::DbError;
use crate::schema::defaults::SPECIAL_QUERY_KEYS;
use crate::Query;

/// Validates a query and returns it with `$or` siblings distributed.
///
/// The input is left untouched.
///
/// # Returns
/// `INVALID_QUERY` for malformed logical operators, ACL constraints or
/// regex options; `INVALID_KEY_NAME` for keys that are not field paths.
pub fn validate_query(query: &Query) -> Result<Query, DbError> {
    if query.contains_key("ACL") {
        return Err(DbError::invalid_query("Cannot query on ACL."));
    }

    let mut query = query.clone();

    if let Some(or) = query.get("$or") {
        let branches = validate_branches(or, "Bad $or format - use an array value.", false)?;
        query.insert("$or".to_string(), Value::Array(branches));
        distribute_or_siblings(&mut query);
        if let Some(Value::Array(branches)) = query.get("$or") {
            let revalidated = validate_branches(
                &Value::Array(branches.clone()),
                "Bad $or format - use an array value.",
                false,
            )?;
            query.insert("$or".to_string(), Value::Array(revalidated));
        }
    }

    if let Some(and) = query.get("$and") {
        let branches = validate_branches(and, "Bad $and format - use an array value.", false)?;
        query.insert("$and".to_string(), Value::Array(branches));
    }

    if let Some(nor) = query.get("$nor") {
        let branches = validate_branches(
            nor,
            "Bad $nor format - use an array of at least 1 value.",
            true,
        )?;
        query.insert("$nor".to_string(), Value::Array(branches));
    }

    for (key, value) in &query {
        if let Some(constraint) = value.as_object() {
            if constraint.contains_key("$regex") {
                if let Some(options) = constraint.get("$options").and_then(Value::as_str) {
                    if !valid_regex_options(options) {
                        return Err(DbError::invalid_query(format!(
                            "Bad $options value for query: {}",
                            options
                        )));
                    }
                }
            }
        }
        if !SPECIAL_QUERY_KEYS.contains(&key.as_str()) && !valid_query_key(key) {
            return Err(DbError::invalid_key_name(format!("Invalid key name: {}", key)));
        }
    }

    Ok(query)
}

fn validate_branches(value: &Value, message: &str, non_empty: bool) -> Result<Vec<Value>, DbError> {
    let Some(branches) = value.as_array() else {
        return Err(DbError::invalid_query(message));
    };
    if non_empty && branches.is_empty() {
        return Err(DbError::invalid_query(message));
    }
    branches
        .iter()
        .map(|branch| match branch.as_object() {
            Some(sub) => validate_query(sub).map(Value::Object),
            None => Err(DbError::invalid_query(message)),
        })
        .collect()
}

/// Moves top-level constraints next to `$or` into every branch.
///
/// A sibling stays at the top level when any branch already constrains the
/// same key, or when it is a `$near`/`$nearSphere` constraint.
pub fn distribute_or_siblings(query: &mut Query) {
    let Some(Value::Array(branches)) = query.get("$or") else {
        return;
    };
    let movable: Vec<String> = query
        .iter()
        .filter(|(key, value)| {
            if key.as_str() == "$or" {
                return false;
            }
            let collides = branches
                .iter()
                .any(|branch| branch.as_object().map(|b| b.contains_key(*key)).unwrap_or(false));
            let has_near = value
                .as_object()
                .map(|c| c.contains_key("$near") || c.contains_key("$nearSphere"))
                .unwrap_or(false);
            !collides && !has_near
        })
        .map(|(key, _)| key.clone())
        .collect();
    if movable.is_empty() {
        return;
    }

    let moved: Vec<(String, Value)> = movable
        .into_iter()
        .filter_map(|key| query.remove(&key).map(|value| (key, value)))
        .collect();
    if let Some(Value::Array(branches)) = query.get_mut("$or") {
        for branch in branches.iter_mut() {
            if let Some(branch) = branch.as_object_mut() {
                for (key, value) in &moved {
                    branch.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

fn valid_regex_options(options: &str) -> bool {
    !options.is_empty() && options.chars().all(|c| matches!(c, 'i' | 'm' | 'x' | 's'))
}

/// Matches `^[a-zA-Z][a-zA-Z0-9_.]*$`.
fn valid_query_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
