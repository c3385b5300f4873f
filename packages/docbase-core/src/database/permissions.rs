//! ACL and pointer-permission query rewrites.

use serde_json::{json, Value};

use crate::acl::{PUBLIC, ROLE_PREFIX};
use crate::schema::{Operation, SchemaController};
use crate::Query;

/// Who is performing a database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Bypasses every permission check
    Master,
    /// ACL group of the caller: `*`, the user id and `role:<name>` entries
    Group(Vec<String>),
}

impl Access {
    /// Access of an unauthenticated caller.
    pub fn public() -> Self {
        Access::Group(vec![PUBLIC.to_string()])
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Access::Master)
    }

    pub fn acl_group(&self) -> &[String] {
        match self {
            Access::Master => &[],
            Access::Group(group) => group,
        }
    }
}

/// Returns true if the group contains a user id.
pub(crate) fn is_authenticated(acl_group: &[String]) -> bool {
    acl_group
        .iter()
        .any(|entry| entry != PUBLIC && !entry.starts_with(ROLE_PREFIX))
}

fn permission_list(leading: &[Value], acl_group: &[String]) -> Value {
    let mut list: Vec<Value> = leading.to_vec();
    for entry in acl_group {
        let entry = Value::String(entry.clone());
        if !list.contains(&entry) {
            list.push(entry);
        }
    }
    json!({ "$in": list })
}

/// Restricts a query to objects readable by the group.
pub fn add_read_acl(query: &Query, acl_group: &[String]) -> Query {
    let mut query = query.clone();
    query.insert(
        "_rperm".to_string(),
        permission_list(&[Value::Null, json!(PUBLIC)], acl_group),
    );
    query
}

/// Restricts a query to objects writable by the group.
pub fn add_write_acl(query: &Query, acl_group: &[String]) -> Query {
    let mut query = query.clone();
    query.insert(
        "_wperm".to_string(),
        permission_list(&[Value::Null], acl_group),
    );
    query
}

/// Rewrites a query so it only reaches objects whose pointer-permission
/// fields point at the caller.
///
/// # Returns
/// The query unchanged when the class-level permission already grants the
/// operation or no pointer fields are configured, and `None` when the caller
/// cannot be matched against pointer fields at all.
pub fn add_pointer_permissions(
    schema: &SchemaController,
    class_name: &str,
    operation: Operation,
    query: &Query,
    acl_group: &[String],
) -> Option<Query> {
    if schema.test_permissions_for_class_name(class_name, acl_group, operation) {
        return Some(query.clone());
    }
    let Some(clp) = schema.get_class_level_permissions(class_name) else {
        return Some(query.clone());
    };
    let fields = clp.pointer_fields(operation);
    if fields.is_empty() {
        return Some(query.clone());
    }

    let users: Vec<&String> = acl_group
        .iter()
        .filter(|entry| entry.as_str() != PUBLIC && !entry.starts_with(ROLE_PREFIX))
        .collect();
    let [user_id] = users.as_slice() else {
        return None;
    };
    let user_pointer = json!({"__type": "Pointer", "className": "_User", "objectId": user_id});

    let mut branches: Vec<Value> = fields
        .iter()
        .map(|field| {
            if query.contains_key(field) {
                let mut pointer_constraint = Query::new();
                pointer_constraint.insert(field.clone(), user_pointer.clone());
                json!({"$and": [Value::Object(pointer_constraint), Value::Object(query.clone())]})
            } else {
                let mut branch = query.clone();
                branch.insert(field.clone(), user_pointer.clone());
                Value::Object(branch)
            }
        })
        .collect();

    if branches.len() == 1 {
        return branches.pop().and_then(|branch| match branch {
            Value::Object(map) => Some(map),
            _ => None,
        });
    }
    let mut rewritten = Query::new();
    rewritten.insert("$or".to_string(), Value::Array(branches));
    Some(rewritten)
}
