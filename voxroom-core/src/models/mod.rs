pub mod id;
pub mod room;

pub use id::{generate_id, RoomId, UserId, MAX_ROOM_ID_LEN};
pub use room::{CreateRoomRequest, RoomRecord, UserRooms, MAX_ROOM_NAME_LEN};
