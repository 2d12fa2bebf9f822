//! Live subscriber hub: per-organization push channels.
//!
//! Subscribers are plain unbounded channels so delivery never blocks event
//! processing; a closed channel is treated as a disconnect and pruned on
//! the next broadcast touching its organization.

use std::collections::HashMap;

use serde_json::Value;
use themis_store::organization_key;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

struct Client {
    id: Uuid,
    tx: mpsc::UnboundedSender<Value>,
}

/// Receiving side handed to a connected client.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber identity, used to disconnect
    pub id: Uuid,
    /// Organization key this subscription is scoped to
    pub organization: String,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    /// Wait for the next pushed payload; `None` once disconnected.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for catch-up inspection.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out hub keyed by organization. A subscriber never sees another
/// organization's payloads.
#[derive(Default)]
pub struct LiveHub {
    clients: RwLock<HashMap<String, Vec<Client>>>,
}

impl LiveHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an organization.
    pub async fn subscribe(&self, organization: Option<&str>) -> Subscription {
        let key = organization_key(organization);
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut clients = self.clients.write().await;
        clients.entry(key.clone()).or_default().push(Client { id, tx });
        debug!(subscriber = %id, organization = %key, "live subscriber connected");

        Subscription {
            id,
            organization: key,
            receiver,
        }
    }

    /// Drop a subscriber on disconnect.
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut clients = self.clients.write().await;
        for list in clients.values_mut() {
            list.retain(|client| client.id != id);
        }
        clients.retain(|_, list| !list.is_empty());
    }

    /// Deliver a payload to every subscriber of an organization.
    ///
    /// Returns the number of subscribers reached; dead channels are pruned.
    pub async fn broadcast(&self, organization: Option<&str>, payload: &Value) -> usize {
        let key = organization_key(organization);
        let mut clients = self.clients.write().await;
        let Some(list) = clients.get_mut(&key) else {
            return 0;
        };

        let before = list.len();
        list.retain(|client| client.tx.send(payload.clone()).is_ok());
        let delivered = list.len();
        if delivered < before {
            debug!(
                dropped = before - delivered,
                organization = %key,
                "pruned disconnected subscribers"
            );
        }
        if list.is_empty() {
            clients.remove(&key);
        }
        delivered
    }

    /// Deliver a payload to a single subscriber (catch-up on connect).
    pub async fn send_to(&self, id: Uuid, payload: &Value) -> bool {
        let clients = self.clients.read().await;
        for list in clients.values() {
            if let Some(client) = list.iter().find(|client| client.id == id) {
                return client.tx.send(payload.clone()).is_ok();
            }
        }
        false
    }

    /// Number of connected subscribers for an organization.
    pub async fn subscriber_count(&self, organization: Option<&str>) -> usize {
        let key = organization_key(organization);
        self.clients
            .read()
            .await
            .get(&key)
            .map_or(0, Vec::len)
    }
}
