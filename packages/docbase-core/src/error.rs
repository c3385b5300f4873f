//! Database error types.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Numeric error codes shared with REST and LiveQuery clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    OtherCause,
    InternalServerError,
    ObjectNotFound,
    InvalidQuery,
    InvalidClassName,
    MissingObjectId,
    InvalidKeyName,
    InvalidJson,
    CommandUnavailable,
    IncorrectType,
    OperationForbidden,
    InvalidNestedKey,
    InvalidAcl,
    MissingRequiredField,
    ChangedImmutableField,
    DuplicateValue,
    InvalidSessionToken,
    InvalidSchemaOperation,
}

impl ErrorCode {
    /// Returns the wire value of the code.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::OtherCause => -1,
            ErrorCode::InternalServerError => 1,
            ErrorCode::ObjectNotFound => 101,
            ErrorCode::InvalidQuery => 102,
            ErrorCode::InvalidClassName => 103,
            ErrorCode::MissingObjectId => 104,
            ErrorCode::InvalidKeyName => 105,
            ErrorCode::InvalidJson => 107,
            ErrorCode::CommandUnavailable => 108,
            ErrorCode::IncorrectType => 111,
            ErrorCode::OperationForbidden => 119,
            ErrorCode::InvalidNestedKey => 121,
            ErrorCode::InvalidAcl => 123,
            ErrorCode::MissingRequiredField => 135,
            ErrorCode::ChangedImmutableField => 136,
            ErrorCode::DuplicateValue => 137,
            ErrorCode::InvalidSessionToken => 209,
            ErrorCode::InvalidSchemaOperation => 255,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

/// Database operation error: a code plus a human readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn object_not_found() -> Self {
        Self::new(ErrorCode::ObjectNotFound, "Object not found.")
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidJson, message)
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, message)
    }

    pub fn invalid_key_name(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidKeyName, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    /// Returns true if the error has the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid_json(err.to_string())
    }
}

/// Classifies I/O errors raised while reading or writing snapshots.
pub fn classify_io_error(error: std::io::Error, context: &str) -> DbError {
    DbError::internal(format!("{}: {}", context, error))
}

/// Returns true for I/O failures that may succeed when retried.
pub fn is_transient_io_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}
