//! Evaluates REST queries against objects held in memory.
//!
//! Used by the memory storage adapter and by live query fan-out. Both
//! REST-format values (`{"__type": "Date", "iso": ...}`) and plain ISO
//! strings are accepted for dates.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::{Document, Query};

/// Returns true if `object` satisfies every constraint of `query`.
pub fn matches_query(object: &Document, query: &Query) -> bool {
    query
        .iter()
        .all(|(key, constraint)| matches_key(object, key, constraint))
}

fn matches_key(object: &Document, key: &str, constraint: &Value) -> bool {
    match key {
        "$or" => sub_queries(constraint).map_or(false, |mut q| q.any(|q| matches_query(object, q))),
        "$and" => sub_queries(constraint).map_or(false, |mut q| q.all(|q| matches_query(object, q))),
        "$nor" => sub_queries(constraint).map_or(false, |mut q| !q.any(|q| matches_query(object, q))),
        // Relation constraints are rewritten before reaching storage.
        "$relatedTo" => false,
        _ => matches_constraint(lookup_path(object, key), constraint),
    }
}

fn sub_queries(value: &Value) -> Option<impl Iterator<Item = &Map<String, Value>>> {
    value
        .as_array()
        .map(|branches| branches.iter().filter_map(Value::as_object))
}

/// Resolves a dotted path such as `address.city`.
pub fn lookup_path<'a>(object: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = object.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn matches_constraint(value: Option<&Value>, constraint: &Value) -> bool {
    match constraint {
        Value::Object(map) if is_operator_map(map) => map
            .iter()
            .all(|(op, operand)| apply_operator(value, op, operand, map)),
        _ => equals_or_contains(value, constraint),
    }
}

fn apply_operator(
    value: Option<&Value>,
    op: &str,
    operand: &Value,
    constraint: &Map<String, Value>,
) -> bool {
    match op {
        "$lt" | "$lte" | "$gt" | "$gte" => {
            let Some(value) = value else {
                return false;
            };
            let Some(ordering) = compare_values(value, operand) else {
                return false;
            };
            match op {
                "$lt" => ordering == Ordering::Less,
                "$lte" => ordering != Ordering::Greater,
                "$gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        "$eq" => equals_or_contains(value, operand),
        "$ne" => !equals_or_contains(value, operand),
        "$in" => operand.as_array().map_or(false, |list| in_list(value, list)),
        "$nin" => operand.as_array().map_or(false, |list| !in_list(value, list)),
        "$all" => match (value.and_then(Value::as_array), operand.as_array()) {
            (Some(items), Some(required)) => required
                .iter()
                .all(|r| items.iter().any(|item| values_equal(item, r))),
            _ => false,
        },
        "$containedBy" => match (value.and_then(Value::as_array), operand.as_array()) {
            (Some(items), Some(allowed)) => items
                .iter()
                .all(|item| allowed.iter().any(|a| values_equal(item, a))),
            _ => false,
        },
        "$exists" => operand.as_bool().unwrap_or(false) == value.is_some(),
        "$regex" => {
            let options = constraint.get("$options").and_then(Value::as_str).unwrap_or("");
            match (value.and_then(Value::as_str), operand.as_str()) {
                (Some(text), Some(pattern)) => regex_matches(text, pattern, options),
                _ => false,
            }
        }
        "$options" | "$maxDistance" => true,
        // $select, $dontSelect, geo operators and anything unknown never match in memory.
        _ => false,
    }
}

fn in_list(value: Option<&Value>, list: &[Value]) -> bool {
    match value {
        None | Some(Value::Null) => list.iter().any(Value::is_null),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| list.iter().any(|candidate| values_equal(item, candidate))),
        Some(value) => list.iter().any(|candidate| values_equal(value, candidate)),
    }
}

fn equals_or_contains(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn pointer_identity(value: &Value) -> Option<(&str, &str)> {
    let map = value.as_object()?;
    if map.get("__type").and_then(Value::as_str) != Some("Pointer") {
        return None;
    }
    Some((
        map.get("className")?.as_str()?,
        map.get("objectId")?.as_str()?,
    ))
}

fn date_iso(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("Date") => {
            map.get("iso").and_then(Value::as_str)
        }
        _ => None,
    }
}

fn parse_date(value: &Value) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(date_iso(value)?).ok()
}

/// Equality that treats numerically equal numbers, equivalent dates and
/// pointers to the same object as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        _ => {
            if let (Some(x), Some(y)) = (pointer_identity(a), pointer_identity(b)) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (parse_date(a), parse_date(b)) {
                return x == y;
            }
            a == b
        }
    }
}

/// Orders two values of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64()?.partial_cmp(&y.as_f64()?);
    }
    if let (Some(x), Some(y)) = (parse_date(a), parse_date(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn regex_matches(text: &str, pattern: &str, options: &str) -> bool {
    let pattern = expand_literal_blocks(pattern);
    let mut builder = RegexBuilder::new(&pattern);
    builder
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .ignore_whitespace(options.contains('x'))
        .dot_matches_new_line(options.contains('s'));
    match builder.build() {
        Ok(regex) => regex.is_match(text),
        Err(_) => false,
    }
}

/// Replaces `\Q...\E` literal blocks with escaped text.
fn expand_literal_blocks(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("\\Q") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("\\E") {
            Some(end) => {
                out.push_str(&regex::escape(&after[..end]));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&regex::escape(after));
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
