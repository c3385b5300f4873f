//! Change notification between the write path and live queries.
//!
//! Writes publish JSON messages on two channels per application,
//! `<appId>afterSave` and `<appId>afterDelete`. The in-process transport
//! fans each message out to every subscriber through a tokio broadcast
//! channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::Document;

pub const AFTER_SAVE: &str = "afterSave";
pub const AFTER_DELETE: &str = "afterDelete";

pub fn after_save_channel(app_id: &str) -> String {
    format!("{}{}", app_id, AFTER_SAVE)
}

pub fn after_delete_channel(app_id: &str) -> String {
    format!("{}{}", app_id, AFTER_DELETE)
}

/// Payload of a change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    pub current_parse_object: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_parse_object: Option<Document>,
}

impl ChangeMessage {
    /// Class of the changed object.
    pub fn class_name(&self) -> Option<&str> {
        self.current_parse_object
            .get("className")
            .and_then(Value::as_str)
    }
}

/// Message transport.
pub trait PubSub: Send + Sync {
    /// Publishes a message and returns the number of receivers it reached.
    fn publish(&self, channel: &str, message: String) -> usize;

    /// Subscribes to a channel. Messages published before the call are not delivered.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

/// Single-process transport over tokio broadcast channels.
pub struct InProcessPubSub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InProcessPubSub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl PubSub for InProcessPubSub {
    fn publish(&self, channel: &str, message: String) -> usize {
        match self.sender(channel).send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers on {}", channel);
                0
            }
        }
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

/// Publishes change events for the classes live queries watch.
#[derive(Clone)]
pub struct ChangePublisher {
    pubsub: Arc<dyn PubSub>,
    app_id: String,
    class_names: Arc<HashSet<String>>,
}

/// Converts a REST object to the wire form: adds `className` and `__type`.
fn to_wire_object(class_name: &str, object: &Document) -> Document {
    let mut wire = object.clone();
    wire.insert("className".to_string(), Value::String(class_name.to_string()));
    wire.insert("__type".to_string(), Value::String("Object".to_string()));
    wire
}

impl ChangePublisher {
    pub fn new(pubsub: Arc<dyn PubSub>, app_id: impl Into<String>, class_names: &[String]) -> Self {
        Self {
            pubsub,
            app_id: app_id.into(),
            class_names: Arc::new(class_names.iter().cloned().collect()),
        }
    }

    pub fn has_live_query(&self, class_name: &str) -> bool {
        self.class_names.contains(class_name)
    }

    fn send(&self, channel: String, message: ChangeMessage) -> usize {
        match serde_json::to_string(&message) {
            Ok(payload) => self.pubsub.publish(&channel, payload),
            Err(e) => {
                warn!("Failed to serialize change event for {}: {}", channel, e);
                0
            }
        }
    }

    /// Publishes a created or updated object with its previous version, if any.
    pub fn after_save(&self, class_name: &str, current: &Document, original: Option<&Document>) -> usize {
        if !self.has_live_query(class_name) {
            return 0;
        }
        let message = ChangeMessage {
            current_parse_object: to_wire_object(class_name, current),
            original_parse_object: original.map(|o| to_wire_object(class_name, o)),
        };
        self.send(after_save_channel(&self.app_id), message)
    }

    /// Publishes a deleted object.
    pub fn after_delete(&self, class_name: &str, object: &Document) -> usize {
        if !self.has_live_query(class_name) {
            return 0;
        }
        let message = ChangeMessage {
            current_parse_object: to_wire_object(class_name, object),
            original_parse_object: None,
        };
        self.send(after_delete_channel(&self.app_id), message)
    }
}
