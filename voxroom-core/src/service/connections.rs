//! Live connection index
//!
//! Every accepted client, keyed by its server-assigned ID, regardless of room.

use dashmap::DashMap;
use std::sync::Arc;
use voxroom_sfu::ClientId;

use super::session::Client;
use super::signaling::SignalingMessage;
use crate::metrics;

#[derive(Default)]
pub struct ConnectionRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<Client>) {
        self.clients.insert(client.id().clone(), client);
        self.update_gauge();
    }

    /// Remove `client_id`; a no-op if it is not registered
    pub fn remove(&self, client_id: &ClientId) -> Option<Arc<Client>> {
        let removed = self.clients.remove(client_id).map(|(_, client)| client);
        self.update_gauge();
        removed
    }

    #[must_use]
    pub fn get(&self, client_id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }

    /// Queue `message` for `client_id`. Returns false if the client is gone
    /// or its queue rejected the message.
    pub fn send_to(&self, client_id: &ClientId, message: SignalingMessage) -> bool {
        self.get(client_id).is_some_and(|client| client.send(message))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn update_gauge(&self) {
        metrics::ACTIVE_CONNECTIONS.set(i64::try_from(self.clients.len()).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::session::tests::client;
    use crate::service::signaling::MessageKind;

    #[test]
    fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let (alice, sink) = client("alice", "lobby");
        registry.insert(Arc::clone(&alice));

        assert_eq!(registry.len(), 1);
        assert!(registry.send_to(alice.id(), SignalingMessage::participants(vec![])));
        assert_eq!(sink.kinds(), vec![MessageKind::Participants]);

        assert!(registry.remove(alice.id()).is_some());
        assert!(registry.remove(alice.id()).is_none());
        assert!(!registry.send_to(alice.id(), SignalingMessage::participants(vec![])));
        assert!(registry.is_empty());
    }
}
