//! Room registry
//!
//! Rooms are created on first join and looked up by ID. A room holds the live
//! clients in it; durable rooms (created explicitly or known to the room
//! store) outlive their last client, ephemeral ones are evicted when empty.
//!
//! Joining and evicting both happen while holding the room's map shard, so a
//! client can never be added to a room that is concurrently being dropped.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use voxroom_sfu::ClientId;

use super::session::Client;
use crate::metrics;
use crate::models::{RoomId, RoomRecord, UserId};
use crate::repository::RoomStore;

pub struct Room {
    id: RoomId,
    durable: AtomicBool,
    record: RwLock<Option<RoomRecord>>,
    clients: Mutex<BTreeMap<ClientId, Arc<Client>>>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn ephemeral(id: RoomId) -> Self {
        Self {
            id,
            durable: AtomicBool::new(false),
            record: RwLock::new(None),
            clients: Mutex::new(BTreeMap::new()),
            created_at: Utc::now(),
        }
    }

    fn durable(record: RoomRecord) -> Self {
        let room = Self::ephemeral(record.id.clone());
        room.promote(record);
        room
    }

    fn promote(&self, record: RoomRecord) {
        *self.record.write() = Some(record);
        self.durable.store(true, Ordering::Release);
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    /// Display name; the ID for ephemeral rooms
    #[must_use]
    pub fn name(&self) -> String {
        self.record
            .read()
            .as_ref()
            .map_or_else(|| self.id.to_string(), |r| r.name.clone())
    }

    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.record.read().as_ref().map(|r| r.owner_id.clone())
    }

    /// Point-in-time copy of the clients in the room
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn participants(&self) -> Vec<ClientId> {
        self.clients.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name(),
            durable: self.is_durable(),
            participants: self.len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub durable: bool,
    pub participants: usize,
    pub created_at: DateTime<Utc>,
}

pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    store: Option<Arc<dyn RoomStore>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(store: Option<Arc<dyn RoomStore>>) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn RoomStore>> {
        self.store.as_ref()
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| Arc::clone(room.value()))
    }

    /// Existing room, or a new ephemeral one. Racing callers all get the same room.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<Room> {
        let room = Arc::clone(
            self.rooms
                .entry(room_id.clone())
                .or_insert_with(|| Arc::new(Room::ephemeral(room_id.clone())))
                .value(),
        );
        self.update_gauge();
        room
    }

    /// Register `record` as a durable room, promoting a live ephemeral room
    /// with the same ID
    pub fn register_durable(&self, record: RoomRecord) -> Arc<Room> {
        let room = match self.rooms.entry(record.id.clone()) {
            dashmap::Entry::Occupied(entry) => {
                let room = Arc::clone(entry.get());
                room.promote(record);
                room
            }
            dashmap::Entry::Vacant(entry) => {
                Arc::clone(entry.insert(Arc::new(Room::durable(record))).value())
            }
        };
        self.update_gauge();
        room
    }

    /// Add `client` to its room, creating the room if needed. Returns the
    /// participant list including the new client.
    pub async fn join(&self, client: Arc<Client>) -> Vec<ClientId> {
        let room_id = client.room_id().clone();

        if !self.rooms.contains_key(&room_id) {
            self.load_durable(&room_id).await;
        }

        let (participants, durable) = {
            let entry = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| Arc::new(Room::ephemeral(room_id.clone())));
            let room = entry.value();
            let mut clients = room.clients.lock();
            clients.insert(client.id().clone(), Arc::clone(&client));
            (clients.keys().cloned().collect::<Vec<_>>(), room.is_durable())
        };
        self.update_gauge();

        info!(
            room_id = %room_id,
            client_id = %client.id(),
            user_id = %client.user_id(),
            participants = participants.len(),
            "Client joined room"
        );

        if durable {
            self.record_membership(&room_id, client.user_id()).await;
        }

        participants
    }

    async fn load_durable(&self, room_id: &RoomId) {
        let Some(store) = &self.store else {
            return;
        };
        match store.get_room(room_id).await {
            Ok(Some(record)) => {
                debug!(room_id = %room_id, "Loaded durable room from store");
                self.register_durable(record);
            }
            Ok(None) => {}
            Err(e) => warn!(room_id = %room_id, error = %e, "Room store lookup failed"),
        }
    }

    async fn record_membership(&self, room_id: &RoomId, user_id: &UserId) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.add_member(room_id, user_id).await {
            warn!(room_id = %room_id, user_id = %user_id, error = %e, "Failed to record room membership");
        }
    }

    /// Remove `client` from its room. Removing an absent client is a no-op.
    /// Returns whether the client was present.
    pub fn remove(&self, client: &Client) -> bool {
        let room_id = client.room_id();
        let mut removed = false;
        let mut remaining = 0;

        let evicted = self.rooms.remove_if(room_id, |_, room| {
            let mut clients = room.clients.lock();
            removed = clients.remove(client.id()).is_some();
            remaining = clients.len();
            remaining == 0 && !room.is_durable()
        });
        self.update_gauge();

        if removed {
            info!(room_id = %room_id, client_id = %client.id(), remaining, "Client left room");
        }
        if evicted.is_some() {
            info!(room_id = %room_id, "Empty room evicted");
        }
        removed
    }

    /// Point-in-time copy of a room's clients
    #[must_use]
    pub fn snapshot(&self, room_id: &RoomId) -> Option<Vec<Arc<Client>>> {
        self.get(room_id).map(|room| room.clients())
    }

    #[must_use]
    pub fn participants(&self, room_id: &RoomId) -> Option<Vec<ClientId>> {
        self.get(room_id).map(|room| room.participants())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.rooms.iter().map(|room| room.len()).sum()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<_> = self.rooms.iter().map(|room| room.summary()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    fn update_gauge(&self) {
        metrics::ACTIVE_ROOMS.set(i64::try_from(self.rooms.len()).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRoomStore;
    use crate::service::session::tests::client;

    #[tokio::test]
    async fn test_join_creates_room_and_lists_participants() {
        let registry = RoomRegistry::new(None);
        let (alice, _) = client("alice", "lobby");
        let (bob, _) = client("bob", "lobby");

        assert_eq!(registry.join(alice).await, vec![ClientId::from("alice")]);
        assert_eq!(
            registry.join(bob).await,
            vec![ClientId::from("alice"), ClientId::from("bob")]
        );
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.client_count(), 2);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = RoomRegistry::new(None);
        let a = registry.get_or_create(&RoomId::from("lobby"));
        let b = registry.get_or_create(&RoomId::from("lobby"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_yields_one_room() {
        let registry = Arc::new(RoomRegistry::new(None));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create(&RoomId::from("race")) })
            })
            .collect();

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_evicts_empty_room() {
        let registry = RoomRegistry::new(None);
        let (alice, _) = client("alice", "lobby");
        let (bob, _) = client("bob", "lobby");
        registry.join(Arc::clone(&alice)).await;
        registry.join(Arc::clone(&bob)).await;

        assert!(registry.remove(&alice));
        assert!(!registry.remove(&alice));
        assert_eq!(registry.participants(&RoomId::from("lobby")).unwrap(), vec![ClientId::from("bob")]);

        assert!(registry.remove(&bob));
        assert!(registry.get(&RoomId::from("lobby")).is_none());
        assert!(!registry.remove(&bob));
    }

    #[tokio::test]
    async fn test_durable_room_survives_last_client() {
        let registry = RoomRegistry::new(None);
        registry.register_durable(RoomRecord::new(
            RoomId::from("standup"),
            "Daily standup".to_string(),
            UserId::from("owner"),
        ));
        let (alice, _) = client("alice", "standup");
        registry.join(Arc::clone(&alice)).await;
        registry.remove(&alice);

        let room = registry.get(&RoomId::from("standup")).unwrap();
        assert!(room.is_durable());
        assert!(room.is_empty());
        assert_eq!(room.name(), "Daily standup");
    }

    #[tokio::test]
    async fn test_register_durable_promotes_live_room() {
        let registry = RoomRegistry::new(None);
        let (alice, _) = client("alice", "lobby");
        registry.join(Arc::clone(&alice)).await;

        let room = registry.register_durable(RoomRecord::new(
            RoomId::from("lobby"),
            "Lobby".to_string(),
            UserId::from("owner"),
        ));
        assert!(room.is_durable());
        assert_eq!(room.len(), 1);
        assert_eq!(room.owner(), Some(UserId::from("owner")));
    }

    #[tokio::test]
    async fn test_join_loads_stored_room_and_records_membership() {
        let store = Arc::new(MemoryRoomStore::new());
        store
            .create_room(&RoomRecord::new(
                RoomId::from("book-club"),
                "Book club".to_string(),
                UserId::from("owner"),
            ))
            .await
            .unwrap();
        let registry = RoomRegistry::new(Some(store.clone() as Arc<dyn RoomStore>));

        let (alice, _) = client("alice", "book-club");
        registry.join(Arc::clone(&alice)).await;

        let room = registry.get(&RoomId::from("book-club")).unwrap();
        assert!(room.is_durable());
        assert!(store.is_member(&RoomId::from("book-club"), alice.user_id()));

        registry.remove(&alice);
        assert!(registry.get(&RoomId::from("book-club")).is_some());
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = RoomRegistry::new(None);
        let (alice, _) = client("alice", "lobby");
        let (bob, _) = client("bob", "lobby");
        registry.join(Arc::clone(&alice)).await;
        registry.join(Arc::clone(&bob)).await;

        let snapshot = registry.snapshot(&RoomId::from("lobby")).unwrap();
        registry.remove(&bob);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot(&RoomId::from("lobby")).unwrap().len(), 1);
    }
}
