use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};

/// Longest accepted room display name, in characters (`rooms.name` is VARCHAR(255))
pub const MAX_ROOM_NAME_LEN: usize = 255;

/// Persisted room, as stored by a room store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl RoomRecord {
    /// Trim a requested display name; blank names yield `None`
    pub fn parse_name(raw: &str) -> Result<Option<String>, String> {
        let name = raw.trim();
        if name.is_empty() {
            return Ok(None);
        }
        if name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(format!(
                "room name must be at most {MAX_ROOM_NAME_LEN} characters"
            ));
        }
        Ok(Some(name.to_string()))
    }

    #[must_use]
    pub fn new(id: RoomId, name: String, owner_id: UserId) -> Self {
        Self {
            id,
            name,
            owner_id,
            created_at: Utc::now(),
        }
    }
}

/// Body of a room creation request; both fields optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Rooms a user owns and rooms they are a member of
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRooms {
    pub owned: Vec<RoomRecord>,
    pub joined: Vec<RoomRecord>,
}
