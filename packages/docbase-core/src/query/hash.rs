//! Stable hashing of subscription queries.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Query;

/// Serializes a value as JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hash identifying a (class, where) pair.
///
/// Equivalent queries hash equally regardless of key order. A query that is
/// only an `$or` also ignores branch order and duplicate branches.
pub fn query_hash(class_name: &str, where_clause: &Query) -> String {
    let canonical = match where_clause.get("$or") {
        Some(Value::Array(branches)) if where_clause.len() == 1 => {
            let mut parts: Vec<String> = branches.iter().map(canonical_json).collect();
            parts.sort();
            parts.dedup();
            format!("{{\"$or\":[{}]}}", parts.join(","))
        }
        _ => canonical_json(&Value::Object(where_clause.clone())),
    };

    let mut hasher = Sha256::new();
    hasher.update(class_name.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
