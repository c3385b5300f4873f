//! Pure rewrites of queries, sort keys, create payloads and results.

use std::collections::{BTreeSet, HashSet};

use serde_json::{json, Map, Value};

use crate::acl::untransform_object_acl;
use crate::error::DbError;
use crate::ops::UpdateOp;
use crate::query::lookup_path;
use crate::schema::defaults::{field_name_is_valid, root_field_name};
use crate::storage::SortDirection;
use crate::{Document, Query};

/// Above this many ids in total, intersections switch to hash sets.
const BIG_INTERSECTION_THRESHOLD: usize = 125;

/// Operators whose computed values are echoed back after a write.
const ECHOED_OPERATORS: &[&str] = &["Add", "AddUnique", "Remove", "Increment"];

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn intersect_small(lists: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    let mut result: Vec<String> = Vec::new();
    for id in first {
        if result.contains(id) {
            continue;
        }
        if rest.iter().all(|list| list.contains(id)) {
            result.push(id.clone());
        }
    }
    result
}

fn intersect_big(lists: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    let sets: Vec<HashSet<&str>> = rest
        .iter()
        .map(|list| list.iter().map(String::as_str).collect())
        .collect();
    let mut seen = HashSet::new();
    first
        .iter()
        .filter(|id| seen.insert(id.as_str()) && sets.iter().all(|set| set.contains(id.as_str())))
        .cloned()
        .collect()
}

/// Intersection preserving the order of the first list, without duplicates.
pub(crate) fn intersect_ids(lists: &[Vec<String>]) -> Vec<String> {
    let total: usize = lists.iter().map(Vec::len).sum();
    if total > BIG_INTERSECTION_THRESHOLD {
        intersect_big(lists)
    } else {
        intersect_small(lists)
    }
}

/// Restricts `objectId` to the intersection of its current constraints and `ids`.
///
/// A shorthand `objectId: "x"` constraint is kept as `$eq`.
pub fn add_in_object_ids_ids(ids: Option<&[String]>, query: &Query) -> Query {
    let mut query = query.clone();
    let current = query.get("objectId");
    let from_string = current.and_then(Value::as_str).map(|id| vec![id.to_string()]);
    let from_eq = current
        .and_then(|c| c.get("$eq"))
        .and_then(Value::as_str)
        .map(|id| vec![id.to_string()]);
    let from_in = string_list(current.and_then(|c| c.get("$in")));

    let lists: Vec<Vec<String>> = [from_string, from_eq, from_in, ids.map(<[String]>::to_vec)]
        .into_iter()
        .flatten()
        .collect();
    let intersection = intersect_ids(&lists);

    let mut constraint = match query.remove("objectId") {
        Some(Value::Object(map)) => map,
        Some(Value::String(id)) => {
            let mut map = Map::new();
            map.insert("$eq".to_string(), Value::String(id));
            map
        }
        _ => Map::new(),
    };
    constraint.insert("$in".to_string(), json!(intersection));
    query.insert("objectId".to_string(), Value::Object(constraint));
    query
}

/// Adds `ids` to the `objectId` exclusion list.
pub fn add_not_in_object_ids_ids(ids: &[String], query: &Query) -> Query {
    let mut query = query.clone();
    let existing = string_list(query.get("objectId").and_then(|c| c.get("$nin"))).unwrap_or_default();
    let mut seen = HashSet::new();
    let all: Vec<String> = existing
        .into_iter()
        .chain(ids.iter().cloned())
        .filter(|id| seen.insert(id.clone()))
        .collect();

    let mut constraint = match query.remove("objectId") {
        Some(Value::Object(map)) => map,
        Some(Value::String(id)) => {
            let mut map = Map::new();
            map.insert("$eq".to_string(), Value::String(id));
            map
        }
        _ => Map::new(),
    };
    constraint.insert("$nin".to_string(), json!(all));
    query.insert("objectId".to_string(), Value::Object(constraint));
    query
}

/// Maps legacy `_created_at`/`_updated_at` sort keys and validates the rest.
///
/// When both spellings of a key are present the first one wins.
pub fn normalize_sort(
    class_name: &str,
    sort: &[(String, SortDirection)],
) -> Result<Vec<(String, SortDirection)>, DbError> {
    let mut normalized: Vec<(String, SortDirection)> = Vec::with_capacity(sort.len());
    for (key, direction) in sort {
        let key = match key.as_str() {
            "_created_at" => "createdAt",
            "_updated_at" => "updatedAt",
            other => other,
        };
        if normalized.iter().any(|(existing, _)| existing == key) {
            continue;
        }
        if is_auth_data_id(key) {
            return Err(DbError::invalid_key_name(format!("Cannot sort by {}", key)));
        }
        if !field_name_is_valid(root_field_name(key), class_name) {
            return Err(DbError::invalid_key_name(format!("Invalid field name: {}.", key)));
        }
        normalized.push((key.to_string(), *direction));
    }
    Ok(normalized)
}

/// Matches `authData.<provider>.id`.
pub(crate) fn is_auth_data_id(key: &str) -> bool {
    let parts: Vec<&str> = key.split('.').collect();
    parts.len() == 3
        && parts[0] == "authData"
        && parts[2] == "id"
        && !parts[1].is_empty()
        && parts[1].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replaces update operators in a create payload with their initial values.
pub fn flatten_update_operators_for_create(object: &mut Document) -> Result<(), DbError> {
    let keys: Vec<String> = object.keys().cloned().collect();
    for key in keys {
        let Some(op) = object.get(&key).map(UpdateOp::parse).transpose()?.flatten() else {
            continue;
        };
        match op.flatten_for_create()? {
            Some(value) => {
                object.insert(key, value);
            }
            None => {
                object.remove(&key);
            }
        }
    }
    Ok(())
}

/// Echoes back the stored values of keys written through array or increment operators.
pub fn sanitize_database_result(original: &Document, result: &Document) -> Document {
    let mut response = Document::new();
    for (key, value) in original {
        let op = value.get("__op").and_then(Value::as_str);
        if !op.map(|op| ECHOED_OPERATORS.contains(&op)).unwrap_or(false) {
            continue;
        }
        let Some(stored) = lookup_path(result, key) else {
            continue;
        };
        let parts: Vec<&str> = key.split('.').collect();
        insert_at_path(&mut response, &parts, stored.clone());
    }
    response
}

/// Writes `value` at a dotted path, replacing non-object intermediates.
fn insert_at_path(target: &mut Document, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(next) = entry {
                insert_at_path(next, rest, value);
            }
        }
    }
}

/// Converts a stored object back to REST format for a caller.
///
/// Internal `_`-prefixed keys are dropped, `_User` secrets are hidden, and
/// `protected_fields` are removed unless the caller reads their own user.
pub fn untransform_result(
    class_name: &str,
    mut object: Document,
    is_master: bool,
    acl_group: &[String],
    protected_fields: &BTreeSet<String>,
) -> Document {
    untransform_object_acl(&mut object);
    let is_own_user = class_name == "_User"
        && object
            .get("objectId")
            .and_then(Value::as_str)
            .map(|id| acl_group.iter().any(|g| g == id))
            .unwrap_or(false);
    if class_name == "_User" {
        object.remove("sessionToken");
        if !is_master && !is_own_user {
            object.remove("authData");
        }
    }
    object.retain(|key, _| !key.starts_with('_'));
    if !is_own_user {
        for field in protected_fields {
            object.remove(field);
        }
    }
    object
}
