//! Object handlers under `/classes`.

use hyper::body::Bytes;
use hyper::Response;
use serde_json::{json, Value};
use tracing::debug;

use docbase_core::database::{Access, FindOptions, UpdateOptions};
use docbase_core::{new_object_id, Document, Query};

use super::request_utils::{build_response, json_response, parse_find_params, parse_json_body};
use super::response::ListResponse;
use crate::router::{AppState, RestRequest, RouterError};

fn path_param(value: Option<String>, name: &str) -> Result<String, RouterError> {
    value.ok_or_else(|| RouterError::InternalError(format!("route is missing {}", name)))
}

fn object_id_query(object_id: &str) -> Query {
    let mut query = Query::new();
    query.insert("objectId".to_string(), Value::String(object_id.to_string()));
    query
}

fn merge_echo(mut response: Document, echo: Document) -> Value {
    response.extend(echo);
    Value::Object(response)
}

/// Creates an object.
///
/// # Endpoint
/// `POST /classes/{className}`
///
/// # Response
/// - **201 Created** with a `Location` header
/// ```json
/// {"objectId": "Ed1nuqPvcm", "createdAt": "2024-01-01T00:00:00.000Z"}
/// ```
/// Values written through `Increment` or array operators are echoed back.
pub async fn create_object(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let class_name = path_param(req.class_name, "className")?;
    let mut object = parse_json_body(&req.body)?;
    let object_id = match object.get("objectId").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            let id = new_object_id();
            object.insert("objectId".to_string(), Value::String(id.clone()));
            id
        }
    };

    let database = &state.ctx.database;
    let echo = database.create(&class_name, object, &req.auth.access()).await?;
    let stored = database.get(&class_name, &object_id, &Access::Master).await?;
    let published = state.ctx.publisher.after_save(&class_name, &stored, None);
    debug!("Created {}/{} ({} live subscribers)", class_name, object_id, published);

    let mut response = Document::new();
    response.insert("objectId".to_string(), Value::String(object_id.clone()));
    if let Some(created_at) = stored.get("createdAt") {
        response.insert("createdAt".to_string(), created_at.clone());
    }
    let body = serde_json::to_vec(&merge_echo(response, echo))
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize response: {}", e)))?;
    let mut response = build_response(201, body)?;
    let location = format!("/classes/{}/{}", class_name, object_id);
    if let Ok(value) = location.parse::<hyper::header::HeaderValue>() {
        response.headers_mut().insert(hyper::header::LOCATION, value);
    }
    Ok(response)
}

/// Finds objects.
///
/// # Endpoint
/// `GET /classes/{className}?where=...&limit=...&skip=...&order=...&keys=...&count=1`
///
/// # Response
/// ```json
/// {"results": [...], "count": 42}
/// ```
/// `count` is present only when requested; `limit=0` with `count=1` only counts.
pub async fn find_objects(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let class_name = path_param(req.class_name, "className")?;
    let params = parse_find_params(req.query.as_deref())?;
    let access = req.auth.access();
    let database = &state.ctx.database;

    let results = if params.limit == 0 && params.count {
        Vec::new()
    } else {
        let options = FindOptions {
            skip: params.skip,
            limit: Some(params.limit),
            sort: params.order,
            keys: params.keys,
            op: None,
        };
        database
            .find(&class_name, &params.where_clause, &access, options)
            .await?
    };

    let count = if params.count {
        Some(database.count(&class_name, &params.where_clause, &access).await?)
    } else {
        None
    };
    json_response(200, &ListResponse { results, count })
}

/// Fetches one object.
///
/// # Endpoint
/// `GET /classes/{className}/{objectId}`
///
/// # Errors
/// - **404 Not Found** (code 101) when the object is missing or not readable
pub async fn get_object(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let class_name = path_param(req.class_name, "className")?;
    let object_id = path_param(req.object_id, "objectId")?;
    let object = state
        .ctx
        .database
        .get(&class_name, &object_id, &req.auth.access())
        .await?;
    json_response(200, &Value::Object(object))
}

/// Updates one object.
///
/// # Endpoint
/// `PUT /classes/{className}/{objectId}`
///
/// # Response
/// ```json
/// {"updatedAt": "2024-01-01T00:00:00.000Z"}
/// ```
/// plus echoed operator results.
pub async fn update_object(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let class_name = path_param(req.class_name, "className")?;
    let object_id = path_param(req.object_id, "objectId")?;
    let update = parse_json_body(&req.body)?;
    let database = &state.ctx.database;

    let original = database.get(&class_name, &object_id, &Access::Master).await?;
    let echo = database
        .update(
            &class_name,
            &object_id_query(&object_id),
            update,
            &req.auth.access(),
            UpdateOptions::default(),
        )
        .await?;
    let current = database.get(&class_name, &object_id, &Access::Master).await?;
    state
        .ctx
        .publisher
        .after_save(&class_name, &current, Some(&original));

    let mut response = Document::new();
    if let Some(updated_at) = current.get("updatedAt") {
        response.insert("updatedAt".to_string(), updated_at.clone());
    }
    json_response(200, &merge_echo(response, echo))
}

/// Deletes one object.
///
/// # Endpoint
/// `DELETE /classes/{className}/{objectId}`
///
/// # Response
/// An empty object.
pub async fn delete_object(req: RestRequest, state: &AppState) -> Result<Response<Bytes>, RouterError> {
    let class_name = path_param(req.class_name, "className")?;
    let object_id = path_param(req.object_id, "objectId")?;
    let database = &state.ctx.database;

    let original = database.get(&class_name, &object_id, &Access::Master).await?;
    database
        .destroy(&class_name, &object_id_query(&object_id), &req.auth.access())
        .await?;
    state.ctx.publisher.after_delete(&class_name, &original);
    json_response(200, &json!({}))
}
