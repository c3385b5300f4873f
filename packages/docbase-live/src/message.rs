//! LiveQuery wire protocol: JSON messages tagged by `op`.

use docbase_core::{Document, Query};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Error code for messages that fail validation.
pub const INVALID_MESSAGE: i32 = 1;
/// Error code for requests naming an unknown client or subscription.
pub const UNKNOWN_CLIENT_OR_SUBSCRIPTION: i32 = 2;
/// Error code for unknown operations that pass validation.
pub const UNKNOWN_OPERATION: i32 = 3;
/// Error code for connect requests with invalid keys.
pub const INVALID_KEYS: i32 = 4;

const OPERATIONS: &[&str] = &["connect", "subscribe", "unsubscribe", "update"];

/// Client to server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect(ConnectRequest),
    Subscribe(SubscribeRequest),
    Update(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub application_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javascript_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_key: Option<String>,
    #[serde(default, rename = "restAPIKey", skip_serializing_if = "Option::is_none")]
    pub rest_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
}

impl ConnectRequest {
    /// Value supplied for a named key, e.g. `clientKey`.
    pub fn key(&self, name: &str) -> Option<&str> {
        match name {
            "javascriptKey" => self.javascript_key.as_deref(),
            "masterKey" => self.master_key.as_deref(),
            "clientKey" => self.client_key.as_deref(),
            "windowsKey" => self.windows_key.as_deref(),
            "restAPIKey" => self.rest_api_key.as_deref(),
            _ => None,
        }
    }
}

/// Query a client subscribes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub class_name: String,
    #[serde(rename = "where")]
    pub where_clause: Query,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub request_id: u64,
    pub query: QuerySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub request_id: u64,
}

/// Validates and decodes a raw client message.
///
/// # Returns
/// The message, or the text of the error pushed back with code
/// [`INVALID_MESSAGE`].
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {}", e))?;
    let op = match value.get("op") {
        Some(Value::String(op)) => op.as_str(),
        Some(_) => return Err("Invalid type: op must be a string".to_string()),
        None => return Err("Missing required property: op".to_string()),
    };
    if !OPERATIONS.contains(&op) {
        return Err(format!("No enum match for: \"{}\"", op));
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Acknowledgement of a connect, subscribe or unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub client_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

/// Object change delivered to one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub client_id: Uuid,
    pub request_id: u64,
    pub object: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub code: i32,
    pub reconnect: bool,
}

/// Server to client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected(Ack),
    Subscribed(Ack),
    Unsubscribed(Ack),
    Create(EventPayload),
    Enter(EventPayload),
    Update(EventPayload),
    Leave(EventPayload),
    Delete(EventPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(code: i32, error: impl Into<String>, reconnect: bool) -> Self {
        ServerMessage::Error(ErrorPayload {
            error: error.into(),
            code,
            reconnect,
        })
    }
}

/// Kind of change event pushed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Enter,
    Update,
    Leave,
    Delete,
}

impl EventKind {
    /// Derives the event from whether each version of the object is visible
    /// to the subscription.
    ///
    /// # Arguments
    /// * `original_visible` - The previous version matched and was readable
    /// * `current_visible` - The new version matches and is readable
    /// * `had_original` - The object existed before this save
    pub fn classify(original_visible: bool, current_visible: bool, had_original: bool) -> Option<Self> {
        match (original_visible, current_visible) {
            (true, true) => Some(EventKind::Update),
            (true, false) => Some(EventKind::Leave),
            (false, true) if had_original => Some(EventKind::Enter),
            (false, true) => Some(EventKind::Create),
            (false, false) => None,
        }
    }

    pub fn into_message(self, payload: EventPayload) -> ServerMessage {
        match self {
            EventKind::Create => ServerMessage::Create(payload),
            EventKind::Enter => ServerMessage::Enter(payload),
            EventKind::Update => ServerMessage::Update(payload),
            EventKind::Leave => ServerMessage::Leave(payload),
            EventKind::Delete => ServerMessage::Delete(payload),
        }
    }
}
