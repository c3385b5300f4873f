//! Schema handlers under `/schemas`. Every endpoint requires the master key.

use hyper::body::Bytes;
use hyper::Response;
use serde_json::{json, Map, Value};

use docbase_core::schema::types::parse_fields;
use docbase_core::schema::ClassLevelPermissions;
use docbase_core::{DbError, Document, ErrorCode};

use super::request_utils::{json_response, parse_json_body};
use crate::router::{AppState, RestRequest, RouterError};

fn require_master(req: &RestRequest) -> Result<(), RouterError> {
    if req.auth.is_master {
        Ok(())
    } else {
        Err(DbError::new(ErrorCode::OperationForbidden, "unauthorized: master key is required").into())
    }
}

fn class_does_not_exist(class_name: &str) -> RouterError {
    DbError::new(
        ErrorCode::InvalidClassName,
        format!("Class {} does not exist.", class_name),
    )
    .into()
}

fn class_level_permissions(body: &Document) -> Result<Option<ClassLevelPermissions>, RouterError> {
    match body.get("classLevelPermissions") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(ClassLevelPermissions::from_json(value)?)),
    }
}

fn object_member<'a>(body: &'a Document, key: &str) -> Result<Option<&'a Map<String, Value>>, RouterError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(DbError::invalid_json(format!("{} must be an object", key)).into()),
    }
}

/// Lists every class schema.
///
/// # Endpoint
/// `GET /schemas`
pub async fn list_schemas(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    require_master(&req)?;
    let schemas = state.ctx.database.schema().get_all_classes(true).await?;
    let results: Vec<Value> = schemas.iter().map(|s| s.to_value()).collect();
    json_response(200, &json!({ "results": results }))
}

/// Fetches one class schema.
///
/// # Endpoint
/// `GET /schemas/{className}`
pub async fn get_schema(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    require_master(&req)?;
    let class_name = req.class_name.unwrap_or_default();
    let schema = state
        .ctx
        .database
        .schema()
        .get_one_schema(&class_name, false, true)
        .await?
        .ok_or_else(|| class_does_not_exist(&class_name))?;
    json_response(200, &schema.to_value())
}

/// Creates a class.
///
/// # Endpoint
/// `POST /schemas` or `POST /schemas/{className}`
///
/// # Request Body
/// ```json
/// {
///   "className": "Game",
///   "fields": {"score": {"type": "Number"}},
///   "classLevelPermissions": {"find": {"*": true}},
///   "indexes": {"score_1": {"score": 1}}
/// }
/// ```
pub async fn create_schema(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    require_master(&req)?;
    let body = parse_json_body(&req.body)?;
    let body_class = body.get("className").and_then(Value::as_str);
    let class_name = match (req.class_name.as_deref(), body_class) {
        (Some(path), Some(body)) if path != body => {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                format!("Class name mismatch between {} and {}.", body, path),
            )
            .into());
        }
        (Some(path), _) => path.to_string(),
        (None, Some(body)) => body.to_string(),
        (None, None) => {
            return Err(DbError::new(ErrorCode::MissingRequiredField, "POST /schemas needs a class name.").into());
        }
    };

    let fields = match body.get("fields") {
        None | Some(Value::Null) => Default::default(),
        Some(value) => parse_fields(value)?,
    };
    let clp = class_level_permissions(&body)?;
    let controller = state.ctx.database.schema();
    let mut schema = controller
        .add_class_if_not_exists(&class_name, fields, clp)
        .await?;
    if let Some(indexes) = object_member(&body, "indexes")? {
        schema = controller
            .update_class(&class_name, &Map::new(), None, Some(indexes))
            .await?;
    }
    json_response(200, &schema.to_value())
}

/// Changes fields, permissions or indexes of a class.
///
/// # Endpoint
/// `PUT /schemas/{className}`
///
/// Fields and indexes submitted as `{"__op": "Delete"}` are dropped.
pub async fn update_schema(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    require_master(&req)?;
    let class_name = req.class_name.clone().unwrap_or_default();
    let body = parse_json_body(&req.body)?;
    if let Some(body_class) = body.get("className").and_then(Value::as_str) {
        if body_class != class_name {
            return Err(DbError::new(
                ErrorCode::InvalidClassName,
                format!("Class name mismatch between {} and {}.", body_class, class_name),
            )
            .into());
        }
    }

    let empty = Map::new();
    let fields = object_member(&body, "fields")?.unwrap_or(&empty);
    let clp = class_level_permissions(&body)?;
    let indexes = object_member(&body, "indexes")?;
    let schema = state
        .ctx
        .database
        .schema()
        .update_class(&class_name, fields, clp, indexes)
        .await?;
    json_response(200, &schema.to_value())
}

/// Deletes an empty class.
///
/// # Endpoint
/// `DELETE /schemas/{className}`
pub async fn delete_schema(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    require_master(&req)?;
    let class_name = req.class_name.unwrap_or_default();
    state.ctx.database.delete_schema(&class_name).await?;
    json_response(200, &json!({}))
}
