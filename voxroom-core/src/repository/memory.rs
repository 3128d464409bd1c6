use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use super::RoomStore;
use crate::{
    models::{RoomId, RoomRecord, UserId},
    Error, Result,
};

/// In-memory room store with the same semantics as the Postgres one
#[derive(Default)]
pub struct MemoryRoomStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    rooms: BTreeMap<RoomId, RoomRecord>,
    members: BTreeSet<(RoomId, UserId)>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.inner
            .lock()
            .members
            .contains(&(room_id.clone(), user_id.clone()))
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: &RoomRecord) -> Result<RoomRecord> {
        let mut inner = self.inner.lock();
        if inner.rooms.contains_key(&room.id) {
            return Err(Error::AlreadyExists("room already exists".to_string()));
        }
        inner.rooms.insert(room.id.clone(), room.clone());
        Ok(room.clone())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        Ok(self.inner.lock().rooms.get(room_id).cloned())
    }

    async fn rooms_owned_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>> {
        Ok(self
            .inner
            .lock()
            .rooms
            .values()
            .filter(|room| &room.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn rooms_joined_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .members
            .iter()
            .filter(|(_, member)| member == user_id)
            .filter_map(|(room_id, _)| inner.rooms.get(room_id).cloned())
            .collect())
    }

    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.rooms.contains_key(room_id) {
            return Err(Error::NotFound("Referenced room not found".to_string()));
        }
        inner.members.insert((room_id.clone(), user_id.clone()));
        Ok(())
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .members
            .remove(&(room_id.clone(), user_id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_room_is_rejected() {
        let store = MemoryRoomStore::new();
        let room = RoomRecord::new(RoomId::from("lobby"), "Lobby".to_string(), UserId::from("u1"));
        store.create_room(&room).await.unwrap();

        let err = store.create_room(&room).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_membership_round_trip() {
        let store = MemoryRoomStore::new();
        let owner = UserId::from("owner");
        let guest = UserId::from("guest");
        let room = RoomRecord::new(RoomId::from("lobby"), "Lobby".to_string(), owner.clone());
        store.create_room(&room).await.unwrap();

        store.add_member(&room.id, &guest).await.unwrap();
        store.add_member(&room.id, &guest).await.unwrap();
        assert_eq!(store.rooms_joined_by(&guest).await.unwrap().len(), 1);
        assert_eq!(store.rooms_owned_by(&owner).await.unwrap().len(), 1);
        assert!(store.rooms_owned_by(&guest).await.unwrap().is_empty());

        assert!(store.remove_member(&room.id, &guest).await.unwrap());
        assert!(!store.remove_member(&room.id, &guest).await.unwrap());
        assert!(store.rooms_joined_by(&guest).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_member_of_unknown_room() {
        let store = MemoryRoomStore::new();
        let err = store
            .add_member(&RoomId::from("nowhere"), &UserId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
