pub mod memory;
pub mod room;

pub use memory::MemoryRoomStore;
pub use room::{PgRoomStore, RoomStore};
