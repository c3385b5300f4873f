//! Field update operators (`{"__op": ...}` payloads).

use serde_json::{Map, Value};

use crate::error::{DbError, ErrorCode};
use crate::query::values_equal;

/// A parsed `__op` update operator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Increment(Value),
    Add(Vec<Value>),
    AddUnique(Vec<Value>),
    Remove(Vec<Value>),
    Delete,
    AddRelation(Vec<Value>),
    RemoveRelation(Vec<Value>),
    Batch(Vec<UpdateOp>),
}

impl UpdateOp {
    /// Parses an operator payload. Plain values return `Ok(None)`.
    pub fn parse(value: &Value) -> Result<Option<UpdateOp>, DbError> {
        let Some(map) = value.as_object() else {
            return Ok(None);
        };
        let Some(op) = map.get("__op").and_then(Value::as_str) else {
            return Ok(None);
        };
        let parsed = match op {
            "Increment" => match map.get("amount") {
                Some(amount @ Value::Number(_)) => UpdateOp::Increment(amount.clone()),
                _ => {
                    return Err(DbError::invalid_json(
                        "incrementing must provide a number",
                    ))
                }
            },
            "Add" => UpdateOp::Add(objects(map)?),
            "AddUnique" => UpdateOp::AddUnique(objects(map)?),
            "Remove" => UpdateOp::Remove(objects(map)?),
            "Delete" => UpdateOp::Delete,
            "AddRelation" => UpdateOp::AddRelation(objects(map)?),
            "RemoveRelation" => UpdateOp::RemoveRelation(objects(map)?),
            "Batch" => {
                let Some(ops) = map.get("ops").and_then(Value::as_array) else {
                    return Err(DbError::invalid_json("Batch ops must be an array"));
                };
                let mut parsed = Vec::with_capacity(ops.len());
                for op in ops {
                    match UpdateOp::parse(op)? {
                        Some(op) => parsed.push(op),
                        None => return Err(DbError::invalid_json("Batch ops must be operators")),
                    }
                }
                UpdateOp::Batch(parsed)
            }
            other => return Err(unsupported(other)),
        };
        Ok(Some(parsed))
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpdateOp::Increment(_) => "Increment",
            UpdateOp::Add(_) => "Add",
            UpdateOp::AddUnique(_) => "AddUnique",
            UpdateOp::Remove(_) => "Remove",
            UpdateOp::Delete => "Delete",
            UpdateOp::AddRelation(_) => "AddRelation",
            UpdateOp::RemoveRelation(_) => "RemoveRelation",
            UpdateOp::Batch(_) => "Batch",
        }
    }

    /// True for operators that write join collections.
    pub fn is_relation_op(&self) -> bool {
        match self {
            UpdateOp::AddRelation(_) | UpdateOp::RemoveRelation(_) => true,
            UpdateOp::Batch(ops) => ops.iter().any(UpdateOp::is_relation_op),
            _ => false,
        }
    }

    /// Applies the operator to the current stored value.
    ///
    /// # Returns
    /// The new value, or `None` if the field should be removed.
    pub fn apply(&self, current: Option<&Value>) -> Result<Option<Value>, DbError> {
        let current_items = || -> Vec<Value> {
            current
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let updated = match self {
            UpdateOp::Increment(amount) => Some(increment(current, amount)),
            UpdateOp::Add(items) => {
                let mut list = current_items();
                list.extend(items.iter().cloned());
                Some(Value::Array(list))
            }
            UpdateOp::AddUnique(items) => {
                let mut list = current_items();
                for item in items {
                    if !list.iter().any(|existing| values_equal(existing, item)) {
                        list.push(item.clone());
                    }
                }
                Some(Value::Array(list))
            }
            UpdateOp::Remove(items) => {
                let mut list = current_items();
                list.retain(|existing| !items.iter().any(|item| values_equal(existing, item)));
                Some(Value::Array(list))
            }
            UpdateOp::Delete => None,
            other => return Err(unsupported(other.name())),
        };
        Ok(updated)
    }

    /// Value stored when the operator appears in a create payload.
    ///
    /// # Returns
    /// `None` when the key must be dropped from the new object.
    pub fn flatten_for_create(&self) -> Result<Option<Value>, DbError> {
        match self {
            UpdateOp::Increment(amount) => Ok(Some(amount.clone())),
            UpdateOp::Add(items) | UpdateOp::AddUnique(items) => Ok(Some(Value::Array(items.clone()))),
            UpdateOp::Remove(_) => Ok(Some(Value::Array(Vec::new()))),
            UpdateOp::Delete => Ok(None),
            other => Err(unsupported(other.name())),
        }
    }

    /// Pointer targets of relation operators, flattening batches.
    ///
    /// # Returns
    /// `(added, removed)` object ids.
    pub fn relation_targets(&self) -> (Vec<String>, Vec<String>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        self.collect_relation_targets(&mut added, &mut removed);
        (added, removed)
    }

    fn collect_relation_targets(&self, added: &mut Vec<String>, removed: &mut Vec<String>) {
        match self {
            UpdateOp::AddRelation(objects) => added.extend(pointer_ids(objects)),
            UpdateOp::RemoveRelation(objects) => removed.extend(pointer_ids(objects)),
            UpdateOp::Batch(ops) => {
                for op in ops {
                    op.collect_relation_targets(added, removed);
                }
            }
            _ => {}
        }
    }
}

fn objects(map: &Map<String, Value>) -> Result<Vec<Value>, DbError> {
    match map.get("objects") {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(DbError::invalid_json("objects to add must be an array")),
    }
}

fn pointer_ids(objects: &[Value]) -> impl Iterator<Item = String> + '_ {
    objects
        .iter()
        .filter_map(|o| o.get("objectId").and_then(Value::as_str))
        .map(str::to_string)
}

fn increment(current: Option<&Value>, amount: &Value) -> Value {
    let current = current.cloned().unwrap_or_else(|| Value::from(0));
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return Value::from(a.saturating_add(b));
    }
    let sum = current.as_f64().unwrap_or(0.0) + amount.as_f64().unwrap_or(0.0);
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn unsupported(op: &str) -> DbError {
    DbError::new(
        ErrorCode::CommandUnavailable,
        format!("The {} operator is not supported yet.", op),
    )
}
