//! Join-collection maintenance and relation-aware query rewriting.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};

use crate::error::{DbError, ErrorCode};
use crate::ops::UpdateOp;
use crate::schema::defaults::join_table_name;
use crate::schema::{FieldType, Schema};
use crate::storage::QueryOptions;
use crate::{Document, Query};

use super::transform::{add_in_object_ids_ids, add_not_in_object_ids_ids};
use super::DatabaseController;

/// Removes relation operators from a write payload.
///
/// # Returns
/// `(key, operator)` pairs in payload order.
pub(crate) fn collect_relation_updates(update: &mut Document) -> Result<Vec<(String, UpdateOp)>, DbError> {
    let mut collected = Vec::new();
    for (key, value) in update.iter() {
        if let Some(op) = UpdateOp::parse(value)? {
            if op.is_relation_op() {
                collected.push((key.clone(), op));
            }
        }
    }
    for (key, _) in &collected {
        update.remove(key);
    }
    Ok(collected)
}

/// Resolves the object that owns relation writes for many and upsert updates.
///
/// Accepts an `objectId` on the payload, or a plain or `$eq` `objectId`
/// constraint on the query.
pub(crate) fn relation_owner_id(update: &Document, query: &Query) -> Result<String, DbError> {
    let from_query = query.get("objectId").and_then(|constraint| match constraint {
        Value::String(id) => Some(id.as_str()),
        Value::Object(map) => map.get("$eq").and_then(Value::as_str),
        _ => None,
    });
    update
        .get("objectId")
        .and_then(Value::as_str)
        .or(from_query)
        .map(str::to_string)
        .ok_or_else(|| {
            DbError::new(
                ErrorCode::MissingObjectId,
                "relation updates need a single objectId",
            )
        })
}

/// One relation constraint resolved against a join collection.
struct RelationConstraint {
    negated: bool,
    related_ids: Vec<String>,
}

fn pointer_id(value: &Value) -> Option<String> {
    value.get("objectId").and_then(Value::as_str).map(str::to_string)
}

fn relation_constraints(constraint: &Value) -> Vec<RelationConstraint> {
    let Some(map) = constraint.as_object() else {
        return vec![RelationConstraint {
            negated: false,
            related_ids: Vec::new(),
        }];
    };
    let recognized = map.contains_key("$in")
        || map.contains_key("$nin")
        || map.contains_key("$ne")
        || map.get("__type").and_then(Value::as_str) == Some("Pointer");
    if !recognized {
        return vec![RelationConstraint {
            negated: false,
            related_ids: Vec::new(),
        }];
    }

    let ids_of = |value: &Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(pointer_id).collect())
            .unwrap_or_default()
    };
    map.iter()
        .filter_map(|(key, value)| match key.as_str() {
            "objectId" => value.as_str().map(|id| RelationConstraint {
                negated: false,
                related_ids: vec![id.to_string()],
            }),
            "$in" => Some(RelationConstraint {
                negated: false,
                related_ids: ids_of(value),
            }),
            "$nin" => Some(RelationConstraint {
                negated: true,
                related_ids: ids_of(value),
            }),
            "$ne" => Some(RelationConstraint {
                negated: true,
                related_ids: pointer_id(value).into_iter().collect(),
            }),
            _ => None,
        })
        .collect()
}

impl DatabaseController {
    /// Adds one row to the join collection of `from_class_name.key`.
    pub async fn add_relation(
        &self,
        key: &str,
        from_class_name: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<(), DbError> {
        let join_table = join_table_name(key, from_class_name);
        let row = json!({"relatedId": to_id, "owningId": from_id});
        let Value::Object(row) = row else {
            return Err(DbError::internal("relation row must be an object"));
        };
        self.adapter
            .upsert_one_object(&join_table, &Schema::join_table(&join_table), &row, &row)
            .await
    }

    /// Removes one join row. Removing a missing row is not an error.
    pub async fn remove_relation(
        &self,
        key: &str,
        from_class_name: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<(), DbError> {
        let join_table = join_table_name(key, from_class_name);
        let row = json!({"relatedId": to_id, "owningId": from_id});
        let Value::Object(row) = row else {
            return Err(DbError::internal("relation row must be an object"));
        };
        match self
            .adapter
            .delete_objects_by_query(&join_table, &Schema::join_table(&join_table), &row)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is(ErrorCode::ObjectNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ids of the objects related to `owning_id` through `class_name.key`.
    pub async fn related_ids(
        &self,
        class_name: &str,
        key: &str,
        owning_id: &str,
    ) -> Result<Vec<String>, DbError> {
        let mut query = Query::new();
        query.insert("owningId".to_string(), json!(owning_id));
        self.join_column(class_name, key, &query, "relatedId").await
    }

    /// Ids of the owners of any of `related_ids` through `class_name.key`.
    pub async fn owning_ids(
        &self,
        class_name: &str,
        key: &str,
        related_ids: &[String],
    ) -> Result<Vec<String>, DbError> {
        let mut query = Query::new();
        query.insert("relatedId".to_string(), json!({"$in": related_ids}));
        self.join_column(class_name, key, &query, "owningId").await
    }

    async fn join_column(
        &self,
        class_name: &str,
        key: &str,
        query: &Query,
        column: &str,
    ) -> Result<Vec<String>, DbError> {
        let join_table = join_table_name(key, class_name);
        let options = QueryOptions {
            keys: Some(vec![column.to_string()]),
            ..Default::default()
        };
        let rows = self
            .adapter
            .find(&join_table, &Schema::join_table(&join_table), query, &options)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Writes join rows for collected relation operators.
    pub(crate) async fn handle_relation_updates(
        &self,
        class_name: &str,
        object_id: &str,
        updates: &[(String, UpdateOp)],
    ) -> Result<(), DbError> {
        for (key, op) in updates {
            let (added, removed) = op.relation_targets();
            for id in &added {
                self.add_relation(key, class_name, object_id, id).await?;
            }
            for id in &removed {
                self.remove_relation(key, class_name, object_id, id).await?;
            }
        }
        Ok(())
    }

    /// Resolves `$relatedTo` constraints into `objectId` sets, descending into `$or`/`$and`.
    pub fn reduce_relation_keys<'a>(
        &'a self,
        class_name: &'a str,
        query: Query,
    ) -> BoxFuture<'a, Result<Query, DbError>> {
        async move {
            let mut query = query;
            for logical in ["$or", "$and"] {
                if let Some(Value::Array(branches)) = query.remove(logical) {
                    let mut reduced = Vec::with_capacity(branches.len());
                    for branch in branches {
                        match branch {
                            Value::Object(sub) => {
                                reduced.push(Value::Object(self.reduce_relation_keys(class_name, sub).await?))
                            }
                            other => reduced.push(other),
                        }
                    }
                    query.insert(logical.to_string(), Value::Array(reduced));
                }
            }

            let Some(related_to) = query.remove("$relatedTo") else {
                return Ok(query);
            };
            let object = related_to.get("object");
            let owner_class = object.and_then(|o| o.get("className")).and_then(Value::as_str);
            let owner_id = object.and_then(|o| o.get("objectId")).and_then(Value::as_str);
            let key = related_to.get("key").and_then(Value::as_str);
            let (Some(owner_class), Some(owner_id), Some(key)) = (owner_class, owner_id, key) else {
                return Err(DbError::invalid_query("bad $relatedTo"));
            };
            let ids = self.related_ids(owner_class, key, owner_id).await?;
            let query = add_in_object_ids_ids(Some(&ids), &query);
            self.reduce_relation_keys(class_name, query).await
        }
        .boxed()
    }

    /// Resolves constraints on relation-typed keys into `objectId` sets.
    ///
    /// Multiple constraints on one key are intersected. A value on a
    /// relation key that is not `$in`/`$nin`/`$ne`/pointer matches nothing.
    pub fn reduce_in_relation<'a>(
        &'a self,
        class_name: &'a str,
        query: Query,
    ) -> BoxFuture<'a, Result<Query, DbError>> {
        async move {
            let mut query = query;
            for logical in ["$or", "$and"] {
                if let Some(Value::Array(branches)) = query.remove(logical) {
                    let mut reduced = Vec::with_capacity(branches.len());
                    for branch in branches {
                        match branch {
                            Value::Object(sub) => {
                                reduced.push(Value::Object(self.reduce_in_relation(class_name, sub).await?))
                            }
                            other => reduced.push(other),
                        }
                    }
                    query.insert(logical.to_string(), Value::Array(reduced));
                }
            }

            let relation_keys: Vec<String> = query
                .keys()
                .filter(|key| {
                    matches!(
                        self.schema.get_expected_type(class_name, key),
                        Some(FieldType::Relation { .. })
                    )
                })
                .cloned()
                .collect();

            for key in relation_keys {
                let Some(constraint) = query.remove(&key) else {
                    continue;
                };
                for resolved in relation_constraints(&constraint) {
                    let ids = self.owning_ids(class_name, &key, &resolved.related_ids).await?;
                    query = if resolved.negated {
                        add_not_in_object_ids_ids(&ids, &query)
                    } else {
                        add_in_object_ids_ids(Some(&ids), &query)
                    };
                }
            }
            Ok(query)
        }
        .boxed()
    }
}
