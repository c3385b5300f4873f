//! Shared fixtures for LiveQuery integration tests.

use std::time::Duration;

use docbase_core::config::DbConfig;
use docbase_core::context::AppContext;
use docbase_core::database::Access;
use docbase_core::Document;
use docbase_live::message::{Ack, ServerMessage};
use docbase_live::server::ConnectionId;
use docbase_live::{spawn, LiveQueryConfig, LiveQueryHandle, LiveQueryServer};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const APP_ID: &str = "live";

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn pointer(class_name: &str, object_id: &str) -> Value {
    json!({"__type": "Pointer", "className": class_name, "objectId": object_id})
}

/// A database context with a LiveQuery runtime listening to it.
pub struct Fixture {
    pub ctx: AppContext,
    pub handle: LiveQueryHandle,
}

pub async fn fixture(live_config: LiveQueryConfig) -> Fixture {
    let ctx = AppContext::from_config(DbConfig {
        app_id: APP_ID.to_string(),
        live_query_class_names: vec!["Game".to_string()],
        ..Default::default()
    })
    .unwrap();
    ctx.initialize().await.unwrap();
    let server = LiveQueryServer::new(LiveQueryConfig {
        app_id: APP_ID.to_string(),
        ..live_config
    });
    let (handle, _task) = spawn(server, ctx.pubsub.clone(), ctx.auth.clone());
    Fixture { ctx, handle }
}

impl Fixture {
    /// Creates an object and publishes it the way the REST layer does.
    pub async fn create(&self, class_name: &str, object: Value) -> Document {
        let created = self
            .ctx
            .database
            .create(class_name, doc(object.clone()), &Access::Master)
            .await
            .unwrap();
        let object_id = object["objectId"]
            .as_str()
            .map(str::to_string)
            .or_else(|| created.get("objectId").and_then(Value::as_str).map(str::to_string))
            .unwrap();
        let stored = self
            .ctx
            .database
            .get(class_name, &object_id, &Access::Master)
            .await
            .unwrap();
        self.ctx.publisher.after_save(class_name, &stored, None);
        stored
    }

    pub async fn update(&self, class_name: &str, object_id: &str, update: Value) -> Document {
        let db = &self.ctx.database;
        let original = db.get(class_name, object_id, &Access::Master).await.unwrap();
        db.update(
            class_name,
            &doc(json!({"objectId": object_id})),
            doc(update),
            &Access::Master,
            Default::default(),
        )
        .await
        .unwrap();
        let current = db.get(class_name, object_id, &Access::Master).await.unwrap();
        self.ctx.publisher.after_save(class_name, &current, Some(&original));
        current
    }

    pub async fn destroy(&self, class_name: &str, object_id: &str) {
        let db = &self.ctx.database;
        let object = db.get(class_name, object_id, &Access::Master).await.unwrap();
        db.destroy(class_name, &doc(json!({"objectId": object_id})), &Access::Master)
            .await
            .unwrap();
        self.ctx.publisher.after_delete(class_name, &object);
    }

    pub async fn client(&self, connect: Value) -> TestClient {
        let (sink, outbound) = mpsc::unbounded_channel();
        let connection = self.handle.register(sink).await.unwrap();
        let mut client = TestClient {
            handle: self.handle.clone(),
            connection,
            outbound,
            client_id: Uuid::nil(),
        };
        let mut message = json!({"op": "connect", "applicationId": APP_ID});
        if let (Some(target), Value::Object(extra)) = (message.as_object_mut(), connect) {
            target.extend(extra);
        }
        client.send(message);
        match client.next().await {
            ServerMessage::Connected(Ack { client_id, .. }) => client.client_id = client_id,
            other => panic!("expected connected, got {:?}", other),
        }
        client
    }
}

/// One in-process connection to the runtime.
pub struct TestClient {
    handle: LiveQueryHandle,
    connection: ConnectionId,
    outbound: mpsc::UnboundedReceiver<ServerMessage>,
    pub client_id: Uuid,
}

impl TestClient {
    pub fn send(&self, message: Value) {
        self.handle.message(self.connection, message.to_string()).unwrap();
    }

    pub async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a LiveQuery message")
            .expect("connection closed")
    }

    /// True when nothing arrives within a short grace period.
    pub async fn is_idle(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(100), self.outbound.recv())
            .await
            .is_err()
    }

    pub async fn subscribe(&mut self, request_id: u64, query: Value) {
        self.send(json!({"op": "subscribe", "requestId": request_id, "query": query}));
        match self.next().await {
            ServerMessage::Subscribed(ack) => assert_eq!(ack.request_id, Some(request_id)),
            other => panic!("expected subscribed, got {:?}", other),
        }
    }

    /// Next message as JSON, for asserting on `op` and payload together.
    pub async fn next_json(&mut self) -> Value {
        serde_json::to_value(self.next().await).unwrap()
    }

    pub fn disconnect(self) {
        self.handle.disconnect(self.connection).unwrap();
    }
}
