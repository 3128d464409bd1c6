// Voxroom API Library
//
// Provides the HTTP surface for voxroom: WebSocket signaling, room
// management, health and metrics

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
