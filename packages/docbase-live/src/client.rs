//! A connected LiveQuery client and its outbound queue.

use std::collections::HashMap;

use docbase_core::Document;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::message::{Ack, EventKind, EventPayload, ServerMessage};

/// Outbound messages of one WebSocket connection.
pub type ClientSink = mpsc::UnboundedSender<ServerMessage>;

/// Fields every projected object keeps.
const DEFAULT_FIELDS: &[&str] = &["className", "objectId", "updatedAt", "createdAt", "ACL"];

/// What a client subscribed to under one request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub class_name: String,
    pub hash: String,
    pub fields: Option<Vec<String>>,
    pub session_token: Option<String>,
}

/// A client that completed `connect`.
#[derive(Debug)]
pub struct Client {
    pub id: Uuid,
    sink: ClientSink,
    pub has_master_key: bool,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
    subscription_infos: HashMap<u64, SubscriptionInfo>,
}

impl Client {
    pub fn new(
        id: Uuid,
        sink: ClientSink,
        has_master_key: bool,
        session_token: Option<String>,
        installation_id: Option<String>,
    ) -> Self {
        Self {
            id,
            sink,
            has_master_key,
            session_token,
            installation_id,
            subscription_infos: HashMap::new(),
        }
    }

    pub fn sink(&self) -> &ClientSink {
        &self.sink
    }

    pub fn add_subscription_info(&mut self, request_id: u64, info: SubscriptionInfo) {
        self.subscription_infos.insert(request_id, info);
    }

    pub fn get_subscription_info(&self, request_id: u64) -> Option<&SubscriptionInfo> {
        self.subscription_infos.get(&request_id)
    }

    pub fn delete_subscription_info(&mut self, request_id: u64) -> Option<SubscriptionInfo> {
        self.subscription_infos.remove(&request_id)
    }

    /// Removes and returns every subscription of the client.
    pub fn drain_subscription_infos(&mut self) -> Vec<(u64, SubscriptionInfo)> {
        self.subscription_infos.drain().collect()
    }

    pub fn push_connect(&self) {
        send(
            &self.sink,
            ServerMessage::Connected(Ack {
                client_id: self.id,
                request_id: None,
            }),
        );
    }

    pub fn push_subscribe(&self, request_id: u64) {
        send(
            &self.sink,
            ServerMessage::Subscribed(Ack {
                client_id: self.id,
                request_id: Some(request_id),
            }),
        );
    }

    pub fn push_unsubscribe(&self, request_id: u64) {
        send(
            &self.sink,
            ServerMessage::Unsubscribed(Ack {
                client_id: self.id,
                request_id: Some(request_id),
            }),
        );
    }
}

/// Pushes a change event, trimmed to the requested fields.
pub fn push_event(
    sink: &ClientSink,
    kind: EventKind,
    client_id: Uuid,
    request_id: u64,
    object: &Document,
    original: Option<&Document>,
    fields: Option<&[String]>,
) {
    let payload = EventPayload {
        client_id,
        request_id,
        object: project_fields(object, fields),
        original: original.map(|o| project_fields(o, fields)),
    };
    send(sink, kind.into_message(payload));
}

pub fn push_error(sink: &ClientSink, code: i32, error: impl Into<String>, reconnect: bool) {
    send(sink, ServerMessage::error(code, error, reconnect));
}

fn send(sink: &ClientSink, message: ServerMessage) {
    if sink.send(message).is_err() {
        debug!("Dropping message for a closed connection");
    }
}

/// Keeps the identity fields plus the requested ones. `None` keeps everything.
pub fn project_fields(object: &Document, fields: Option<&[String]>) -> Document {
    let Some(fields) = fields else {
        return object.clone();
    };
    object
        .iter()
        .filter(|(key, _)| {
            DEFAULT_FIELDS.contains(&key.as_str()) || fields.iter().any(|f| f == *key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
