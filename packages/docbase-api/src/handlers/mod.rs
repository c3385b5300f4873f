//! HTTP request handlers.

pub mod class_handlers;
pub mod request_utils;
pub mod response;
pub mod schema_handlers;

pub use class_handlers::{create_object, delete_object, find_objects, get_object, update_object};
pub use schema_handlers::{create_schema, delete_schema, get_schema, list_schemas, update_schema};
