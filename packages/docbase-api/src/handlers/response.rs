//! Response bodies.

use serde::Serialize;

/// Error body: `{"code": 101, "error": "Object not found."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Operation error code; absent for routing and authorization failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub error: String,
}

/// Body of a list endpoint.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Helper to create error response
pub fn error_response(code: Option<i32>, error: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        code,
        error: error.into(),
    }
}
