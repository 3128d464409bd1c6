use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{RoomId, RoomRecord, UserId},
    Result,
};

/// Durable room persistence
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Insert a new room. Fails with `AlreadyExists` if the ID is taken.
    async fn create_room(&self, room: &RoomRecord) -> Result<RoomRecord>;

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>>;

    async fn rooms_owned_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>>;

    async fn rooms_joined_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>>;

    /// Record `user_id` as a member; adding an existing member is a no-op
    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// Returns whether a membership was removed
    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;
}

/// Postgres-backed room store
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_room(row: &PgRow) -> Result<RoomRecord> {
        Ok(RoomRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn create_room(&self, room: &RoomRecord) -> Result<RoomRecord> {
        let row = sqlx::query(
            "INSERT INTO rooms (id, name, owner_id, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, owner_id, created_at",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(&room.owner_id)
        .bind(room.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_room(&row)
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, created_at
             FROM rooms
             WHERE id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }

    async fn rooms_owned_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, owner_id, created_at
             FROM rooms
             WHERE owner_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_room).collect()
    }

    async fn rooms_joined_by(&self, user_id: &UserId) -> Result<Vec<RoomRecord>> {
        let rows = sqlx::query(
            "SELECT r.id, r.name, r.owner_id, r.created_at
             FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id = $1
             ORDER BY m.joined_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_room).collect()
    }

    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO room_members (room_id, user_id)
             VALUES ($1, $2)
             ON CONFLICT (room_id, user_id) DO NOTHING",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
