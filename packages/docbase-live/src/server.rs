//! Subscription registry and change fan-out.
//!
//! [`LiveQueryServer`] owns every connection, client and subscription and
//! is driven by a single task (see [`crate::runtime`]). Protocol messages
//! are handled synchronously. Change events are split in two: matching
//! against subscription queries happens on the registry and yields an
//! [`EventPlan`], whose per-viewer ACL checks then run concurrently off
//! the registry before any event is pushed.

use std::collections::HashMap;
use std::sync::Arc;

use docbase_core::acl::object_acl;
use docbase_core::pubsub::ChangeMessage;
use docbase_core::query::{matches_query, query_hash};
use docbase_core::Document;
use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{push_error, push_event, Client, ClientSink, SubscriptionInfo};
use crate::config::{LiveQueryConfig, MASTER_KEY};
use crate::message::{
    parse_client_message, ClientMessage, ConnectRequest, EventKind, SubscribeRequest,
    UnsubscribeRequest, INVALID_KEYS, INVALID_MESSAGE, UNKNOWN_CLIENT_OR_SUBSCRIPTION,
};
use crate::session_token_cache::SessionTokenCache;
use crate::subscription::Subscription;
use crate::visibility::{can_read, RoleMemo, Viewer};

/// Identifies one WebSocket connection, connected or not.
pub type ConnectionId = u64;

/// Lifecycle events reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveQueryEvent {
    Connect,
    Subscribe,
    Unsubscribe,
    WsDisconnect,
    WsDisconnectError,
}

impl LiveQueryEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LiveQueryEvent::Connect => "connect",
            LiveQueryEvent::Subscribe => "subscribe",
            LiveQueryEvent::Unsubscribe => "unsubscribe",
            LiveQueryEvent::WsDisconnect => "ws_disconnect",
            LiveQueryEvent::WsDisconnectError => "ws_disconnect_error",
        }
    }
}

/// Registry sizes at the time of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub clients: usize,
    pub subscriptions: usize,
}

/// Hook for external metrics.
pub trait LiveQueryObserver: Send + Sync {
    fn on_event(&self, event: LiveQueryEvent, client_id: Option<Uuid>, stats: ServerStats);
}

/// Logs lifecycle events.
pub struct TracingObserver;

impl LiveQueryObserver for TracingObserver {
    fn on_event(&self, event: LiveQueryEvent, client_id: Option<Uuid>, stats: ServerStats) {
        info!(
            event = event.as_str(),
            client_id = ?client_id,
            clients = stats.clients,
            subscriptions = stats.subscriptions,
            "LiveQuery event"
        );
    }
}

struct Connection {
    sink: ClientSink,
    client_id: Option<Uuid>,
}

/// Registry of connections, clients and subscriptions.
pub struct LiveQueryServer {
    config: LiveQueryConfig,
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    clients: HashMap<Uuid, Client>,
    /// className -> query hash -> subscription
    subscriptions: HashMap<String, HashMap<String, Subscription>>,
    observer: Arc<dyn LiveQueryObserver>,
}

impl LiveQueryServer {
    pub fn new(config: LiveQueryConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
            next_connection_id: 1,
            clients: HashMap::new(),
            subscriptions: HashMap::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LiveQueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &LiveQueryConfig {
        &self.config
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            clients: self.clients.len(),
            subscriptions: self.subscriptions.values().map(HashMap::len).sum(),
        }
    }

    pub fn client(&self, client_id: &Uuid) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Subscriptions registered for a class, keyed by query hash.
    pub fn class_subscriptions(&self, class_name: &str) -> Option<&HashMap<String, Subscription>> {
        self.subscriptions.get(class_name)
    }

    fn notify(&self, event: LiveQueryEvent, client_id: Option<Uuid>) {
        self.observer.on_event(event, client_id, self.stats());
    }

    /// Registers a new WebSocket connection. It becomes a client on `connect`.
    pub fn register_socket(&mut self, sink: ClientSink) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(id, Connection { sink, client_id: None });
        id
    }

    /// Handles one raw text frame. Invalid messages are answered with an
    /// error and otherwise ignored.
    pub fn handle_message(&mut self, connection: ConnectionId, raw: &str) {
        let Some(sink) = self.connections.get(&connection).map(|c| c.sink.clone()) else {
            warn!("Message for unknown connection {}", connection);
            return;
        };
        let message = match parse_client_message(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Rejecting invalid LiveQuery message: {}", e);
                push_error(&sink, INVALID_MESSAGE, e, true);
                return;
            }
        };
        match message {
            ClientMessage::Connect(request) => self.handle_connect(connection, &sink, request),
            ClientMessage::Subscribe(request) => self.handle_subscribe(connection, &sink, request),
            ClientMessage::Update(request) => self.handle_update_subscription(connection, &sink, request),
            ClientMessage::Unsubscribe(request) => self.handle_unsubscribe(connection, &sink, request),
        }
    }

    /// At least one configured key pair must match; no configured pairs accepts all.
    fn validate_keys(&self, request: &ConnectRequest) -> bool {
        self.config.key_pairs.is_empty()
            || self
                .config
                .key_pairs
                .iter()
                .any(|(name, secret)| request.key(name) == Some(secret.as_str()))
    }

    fn has_master_key(&self, request: &ConnectRequest) -> bool {
        match self.config.key_pairs.get(MASTER_KEY) {
            Some(secret) => request.master_key.as_deref() == Some(secret.as_str()),
            None => false,
        }
    }

    fn handle_connect(&mut self, connection: ConnectionId, sink: &ClientSink, request: ConnectRequest) {
        if !self.validate_keys(&request) {
            push_error(sink, INVALID_KEYS, "Key in request is not valid", true);
            return;
        }
        // A second connect on the same socket replaces the previous client.
        if let Some(previous) = self.connections.get(&connection).and_then(|c| c.client_id) {
            self.remove_client(previous);
        }

        let client_id = Uuid::new_v4();
        let client = Client::new(
            client_id,
            sink.clone(),
            self.has_master_key(&request),
            request.session_token,
            request.installation_id,
        );
        client.push_connect();
        self.clients.insert(client_id, client);
        if let Some(entry) = self.connections.get_mut(&connection) {
            entry.client_id = Some(client_id);
        }
        info!("Create new client: {}", client_id);
        self.notify(LiveQueryEvent::Connect, Some(client_id));
    }

    fn connected_client(&self, connection: ConnectionId) -> Option<Uuid> {
        self.connections
            .get(&connection)
            .and_then(|c| c.client_id)
            .filter(|id| self.clients.contains_key(id))
    }

    fn handle_subscribe(&mut self, connection: ConnectionId, sink: &ClientSink, request: SubscribeRequest) {
        let Some(client_id) = self.connected_client(connection) else {
            push_error(
                sink,
                UNKNOWN_CLIENT_OR_SUBSCRIPTION,
                "Can not find this client, make sure you connect to server before subscribing",
                true,
            );
            return;
        };
        // Reusing a request id replaces the earlier subscription.
        self.remove_subscription(client_id, request.request_id);

        let SubscribeRequest {
            request_id,
            query,
            session_token,
        } = request;
        let hash = query_hash(&query.class_name, &query.where_clause);
        self.subscriptions
            .entry(query.class_name.clone())
            .or_default()
            .entry(hash.clone())
            .or_insert_with(|| Subscription::new(query.class_name.clone(), query.where_clause, hash.clone()))
            .add_client_subscription(client_id, request_id);

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_subscription_info(
                request_id,
                SubscriptionInfo {
                    class_name: query.class_name.clone(),
                    hash,
                    fields: query.fields,
                    session_token,
                },
            );
            client.push_subscribe(request_id);
        }
        debug!(
            "Create client {} new subscription: {} on {}",
            client_id, request_id, query.class_name
        );
        self.notify(LiveQueryEvent::Subscribe, Some(client_id));
    }

    /// Replaces the query under an existing request id. Subscribing drops
    /// whatever the request id held before, so this is a plain re-subscribe.
    fn handle_update_subscription(
        &mut self,
        connection: ConnectionId,
        sink: &ClientSink,
        request: SubscribeRequest,
    ) {
        self.handle_subscribe(connection, sink, request);
    }

    fn handle_unsubscribe(
        &mut self,
        connection: ConnectionId,
        sink: &ClientSink,
        request: UnsubscribeRequest,
    ) {
        let Some(client_id) = self.connections.get(&connection).and_then(|c| c.client_id) else {
            push_error(
                sink,
                UNKNOWN_CLIENT_OR_SUBSCRIPTION,
                "Can not find this client, make sure you connect to server before unsubscribing",
                true,
            );
            return;
        };
        if !self.clients.contains_key(&client_id) {
            push_error(
                sink,
                UNKNOWN_CLIENT_OR_SUBSCRIPTION,
                format!(
                    "Cannot find client with clientId {}. Make sure you connect to live query server before unsubscribing.",
                    client_id
                ),
                true,
            );
            return;
        }
        if !self.remove_subscription(client_id, request.request_id) {
            push_error(
                sink,
                UNKNOWN_CLIENT_OR_SUBSCRIPTION,
                format!(
                    "Cannot find subscription with clientId {} subscriptionId {}. Make sure you subscribe to live query server before unsubscribing.",
                    client_id, request.request_id
                ),
                true,
            );
            return;
        }
        if let Some(client) = self.clients.get(&client_id) {
            client.push_unsubscribe(request.request_id);
        }
        debug!("Delete client {} subscription {}", client_id, request.request_id);
        self.notify(LiveQueryEvent::Unsubscribe, Some(client_id));
    }

    /// Drops one client subscription and prunes empty subscriptions and
    /// class buckets. Returns false when the client had no such request id.
    fn remove_subscription(&mut self, client_id: Uuid, request_id: u64) -> bool {
        let Some(info) = self
            .clients
            .get_mut(&client_id)
            .and_then(|client| client.delete_subscription_info(request_id))
        else {
            return false;
        };
        self.detach(client_id, request_id, &info);
        true
    }

    fn detach(&mut self, client_id: Uuid, request_id: u64, info: &SubscriptionInfo) {
        let Some(bucket) = self.subscriptions.get_mut(&info.class_name) else {
            return;
        };
        if let Some(subscription) = bucket.get_mut(&info.hash) {
            subscription.delete_client_subscription(client_id, request_id);
            if !subscription.has_subscribing_client() {
                bucket.remove(&info.hash);
            }
        }
        if bucket.is_empty() {
            self.subscriptions.remove(&info.class_name);
        }
    }

    fn remove_client(&mut self, client_id: Uuid) -> bool {
        let Some(mut client) = self.clients.remove(&client_id) else {
            return false;
        };
        for (request_id, info) in client.drain_subscription_infos() {
            self.detach(client_id, request_id, &info);
        }
        true
    }

    /// Tears down a closed connection and every subscription of its client.
    pub fn handle_disconnect(&mut self, connection: ConnectionId) {
        let client_id = self.connections.remove(&connection).and_then(|c| c.client_id);
        match client_id {
            Some(client_id) if self.remove_client(client_id) => {
                info!("Client disconnect: {}", client_id);
                self.notify(LiveQueryEvent::WsDisconnect, Some(client_id));
            }
            _ => {
                warn!("Can not find client on disconnect of connection {}", connection);
                self.notify(LiveQueryEvent::WsDisconnectError, client_id);
            }
        }
    }

    /// Collects the viewers of a saved object whose subscription query
    /// matches either version of it.
    pub fn plan_after_save(&self, message: ChangeMessage) -> Option<EventPlan> {
        let class_name = message.class_name()?.to_string();
        let Some(class_subscriptions) = self.subscriptions.get(&class_name) else {
            debug!("Can not find subscriptions under class {}", class_name);
            return None;
        };
        let current = message.current_parse_object;
        let original = message.original_parse_object;

        let mut deliveries = Vec::new();
        for subscription in class_subscriptions.values() {
            let original_matched = original
                .as_ref()
                .is_some_and(|o| matches_query(o, &subscription.query));
            let current_matched = matches_query(&current, &subscription.query);
            if !original_matched && !current_matched {
                continue;
            }
            self.collect_deliveries(subscription, original_matched, current_matched, &mut deliveries);
        }
        Some(EventPlan {
            kind: PlanKind::Save,
            current,
            original,
            deliveries,
        })
    }

    /// Collects the viewers of a deleted object whose subscription query matches it.
    pub fn plan_after_delete(&self, message: ChangeMessage) -> Option<EventPlan> {
        let class_name = message.class_name()?.to_string();
        let Some(class_subscriptions) = self.subscriptions.get(&class_name) else {
            debug!("Can not find subscriptions under class {}", class_name);
            return None;
        };
        let current = message.current_parse_object;

        let mut deliveries = Vec::new();
        for subscription in class_subscriptions.values() {
            if matches_query(&current, &subscription.query) {
                self.collect_deliveries(subscription, false, true, &mut deliveries);
            }
        }
        Some(EventPlan {
            kind: PlanKind::Delete,
            current,
            original: None,
            deliveries,
        })
    }

    fn collect_deliveries(
        &self,
        subscription: &Subscription,
        original_matched: bool,
        current_matched: bool,
        deliveries: &mut Vec<Delivery>,
    ) {
        for (client_id, request_ids) in subscription.client_request_ids() {
            let Some(client) = self.clients.get(client_id) else {
                continue;
            };
            for &request_id in request_ids {
                let info = client.get_subscription_info(request_id);
                let session_token = info
                    .and_then(|i| i.session_token.clone())
                    .or_else(|| client.session_token.clone());
                deliveries.push(Delivery {
                    client_id: *client_id,
                    request_id,
                    sink: client.sink().clone(),
                    viewer: Viewer {
                        has_master_key: client.has_master_key,
                        session_token,
                    },
                    fields: info.and_then(|i| i.fields.clone()),
                    original_matched,
                    current_matched,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanKind {
    Save,
    Delete,
}

/// One `(client, requestId)` that may receive an event.
struct Delivery {
    client_id: Uuid,
    request_id: u64,
    sink: ClientSink,
    viewer: Viewer,
    fields: Option<Vec<String>>,
    original_matched: bool,
    current_matched: bool,
}

/// Matched viewers of one change, awaiting ACL checks.
pub struct EventPlan {
    kind: PlanKind,
    current: Document,
    original: Option<Document>,
    deliveries: Vec<Delivery>,
}

impl EventPlan {
    /// Number of `(client, requestId)` pairs whose query matched.
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Checks each viewer against the ACLs of both object versions and
    /// pushes the resulting events.
    ///
    /// # Returns
    /// The number of events pushed.
    pub async fn execute(self, sessions: &SessionTokenCache) -> usize {
        let roles = RoleMemo::default();
        let current_acl = object_acl(&self.current);
        let original_acl = self.original.as_ref().and_then(object_acl);
        let had_original = self.original.is_some();

        let checks = self.deliveries.iter().map(|delivery| {
            let roles = &roles;
            let current_acl = current_acl.as_ref();
            let original_acl = original_acl.as_ref();
            async move {
                let original_visible = async {
                    delivery.original_matched
                        && can_read(original_acl, &delivery.viewer, sessions, roles).await
                };
                let current_visible = async {
                    delivery.current_matched
                        && can_read(current_acl, &delivery.viewer, sessions, roles).await
                };
                tokio::join!(original_visible, current_visible)
            }
        });
        let outcomes = join_all(checks).await;

        let mut pushed = 0;
        for (delivery, (original_visible, current_visible)) in self.deliveries.iter().zip(outcomes) {
            let kind = match self.kind {
                PlanKind::Delete if current_visible => Some(EventKind::Delete),
                PlanKind::Delete => None,
                PlanKind::Save => EventKind::classify(original_visible, current_visible, had_original),
            };
            let Some(kind) = kind else {
                continue;
            };
            push_event(
                &delivery.sink,
                kind,
                delivery.client_id,
                delivery.request_id,
                &self.current,
                self.original.as_ref(),
                delivery.fields.as_deref(),
            );
            pushed += 1;
        }
        pushed
    }
}
