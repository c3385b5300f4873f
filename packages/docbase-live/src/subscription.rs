//! One shared subscription per `(className, where)` pair.

use std::collections::HashMap;

use docbase_core::Query;
use tracing::warn;
use uuid::Uuid;

/// A query watched by one or more `(client, requestId)` pairs.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub class_name: String,
    pub query: Query,
    pub hash: String,
    client_request_ids: HashMap<Uuid, Vec<u64>>,
}

impl Subscription {
    pub fn new(class_name: impl Into<String>, query: Query, hash: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            query,
            hash: hash.into(),
            client_request_ids: HashMap::new(),
        }
    }

    pub fn add_client_subscription(&mut self, client_id: Uuid, request_id: u64) {
        let request_ids = self.client_request_ids.entry(client_id).or_default();
        if !request_ids.contains(&request_id) {
            request_ids.push(request_id);
        }
    }

    /// Removes one `(client, requestId)` pair; the client entry goes with its last request.
    pub fn delete_client_subscription(&mut self, client_id: Uuid, request_id: u64) {
        let Some(request_ids) = self.client_request_ids.get_mut(&client_id) else {
            warn!("Can not find client {} to delete", client_id);
            return;
        };
        let Some(index) = request_ids.iter().position(|id| *id == request_id) else {
            warn!(
                "Can not find subscription with client {} requestId {} to delete",
                client_id, request_id
            );
            return;
        };
        request_ids.remove(index);
        if request_ids.is_empty() {
            self.client_request_ids.remove(&client_id);
        }
    }

    pub fn has_subscribing_client(&self) -> bool {
        !self.client_request_ids.is_empty()
    }

    pub fn client_request_ids(&self) -> impl Iterator<Item = (&Uuid, &[u64])> {
        self.client_request_ids
            .iter()
            .map(|(client_id, ids)| (client_id, ids.as_slice()))
    }

    pub fn request_ids_for(&self, client_id: &Uuid) -> &[u64] {
        self.client_request_ids
            .get(client_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
