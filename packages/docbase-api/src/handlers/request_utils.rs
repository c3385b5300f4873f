//! Request utilities for HTTP endpoints.

use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value;
use tokio::time;

use docbase_core::storage::SortDirection;
use docbase_core::{DbError, Document, Query};

use super::response::error_response;
use crate::router::RouterError;

/// Default page size of a find.
pub const DEFAULT_LIMIT: usize = 100;

/// Helper function to read request body with timeout
pub async fn read_request_body_with_timeout<B>(req: Request<B>, timeout_ms: u64) -> Result<Bytes, RouterError>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let timeout_duration = time::Duration::from_millis(timeout_ms);
    let body = time::timeout(timeout_duration, req.into_body().collect())
        .await
        .map_err(|_| RouterError::Timeout)?
        .map_err(|e| RouterError::InternalError(format!("Failed to read request body: {}", e)))?;
    Ok(body.to_bytes())
}

/// Helper to build HTTP response with proper error handling
pub fn build_response(status: u16, json: Vec<u8>) -> Result<Response<Bytes>, RouterError> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Bytes::from(json))
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}

/// Serializes a JSON body into a response.
pub fn json_response<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Response<Bytes>, RouterError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize response: {}", e)))?;
    build_response(status, body)
}

/// Builds an error response. Never fails: a bad status falls back to a bare 500.
pub fn build_error_response(status: u16, code: Option<i32>, message: &str) -> Response<Bytes> {
    let body = serde_json::to_vec(&error_response(code, message)).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Bytes::from(body))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Bytes::from_static(b"Internal Server Error"));
            *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

/// Parses a JSON object body. An empty body is an empty object.
pub fn parse_json_body(body: &Bytes) -> Result<Document, RouterError> {
    if body.is_empty() {
        return Ok(Document::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DbError::invalid_json("request body must be a JSON object").into()),
        Err(e) => Err(DbError::invalid_json(format!("Invalid JSON: {}", e)).into()),
    }
}

/// Query string parameters of a find.
#[derive(Debug, Clone, PartialEq)]
pub struct FindParams {
    pub where_clause: Query,
    pub limit: usize,
    pub skip: Option<usize>,
    pub order: Vec<(String, SortDirection)>,
    pub keys: Option<Vec<String>>,
    pub count: bool,
}

impl Default for FindParams {
    fn default() -> Self {
        Self {
            where_clause: Query::new(),
            limit: DEFAULT_LIMIT,
            skip: None,
            order: Vec::new(),
            keys: None,
            count: false,
        }
    }
}

/// Parse find parameters from URL query string.
///
/// Understands `where` (JSON), `limit`, `skip`, `order` (`-score,name`),
/// `keys` (`name,score`) and `count` (`1` or `true`). Unknown keys are ignored.
pub fn parse_find_params(query_str: Option<&str>) -> Result<FindParams, RouterError> {
    let mut params = FindParams::default();
    let Some(query_str) = query_str else {
        return Ok(params);
    };

    for pair in query_str.split('&') {
        let Some((key, encoded_value)) = pair.split_once('=') else {
            continue;
        };
        // Form encoding turns spaces into '+'.
        let encoded_value = encoded_value.replace('+', " ");
        let decoded_value = percent_decode_str(&encoded_value).decode_utf8_lossy();

        match key {
            "where" => {
                params.where_clause = match serde_json::from_str::<Value>(&decoded_value) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => return Err(DbError::invalid_query("where must be a JSON object").into()),
                    Err(e) => return Err(DbError::invalid_json(format!("Invalid where: {}", e)).into()),
                };
            }
            "limit" => {
                params.limit = decoded_value.parse().map_err(|e| {
                    DbError::invalid_query(format!("Invalid limit value '{}': {}", decoded_value, e))
                })?;
            }
            "skip" => {
                params.skip = Some(decoded_value.parse().map_err(|e| {
                    DbError::invalid_query(format!("Invalid skip value '{}': {}", decoded_value, e))
                })?);
            }
            "order" => {
                params.order = split_list(&decoded_value)
                    .map(|field| match field.strip_prefix('-') {
                        Some(name) => (name.to_string(), SortDirection::Descending),
                        None => (field.to_string(), SortDirection::Ascending),
                    })
                    .collect();
            }
            "keys" => params.keys = Some(split_list(&decoded_value).map(str::to_string).collect()),
            "count" => params.count = matches!(decoded_value.as_ref(), "1" | "true"),
            _ => {}
        }
    }
    Ok(params)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
