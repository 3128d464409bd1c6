// Module: http
// WebSocket signaling plus a small JSON API around it

pub mod error;
pub mod health;
pub mod middleware;
pub mod room;
pub mod websocket;

use axum::{
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxroom_core::bootstrap::Services;
use voxroom_core::config::SignalingConfig;
use voxroom_core::repository::RoomStore;
use voxroom_core::service::{
    ConnectionManager, ConnectionRegistry, IdentityResolver, RoomRegistry, SignalingService,
};
use voxroom_sfu::RelayEngine;

pub use error::{AppError, AppResult};
pub use middleware::AuthUser;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub signaling: Arc<SignalingService>,
    pub connection_manager: Arc<ConnectionManager>,
    pub registry: Arc<RoomRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub relay: Arc<RelayEngine>,
    pub identity: Arc<dyn IdentityResolver>,
    pub store: Option<Arc<dyn RoomStore>>,
    pub signaling_config: SignalingConfig,
}

impl From<&Services> for AppState {
    fn from(services: &Services) -> Self {
        Self {
            signaling: Arc::clone(&services.signaling),
            connection_manager: Arc::clone(&services.connection_manager),
            registry: Arc::clone(&services.registry),
            connections: Arc::clone(&services.connections),
            relay: Arc::clone(&services.relay),
            identity: Arc::clone(&services.identity),
            store: services.store.clone(),
            signaling_config: services.config.signaling.clone(),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(services: &Services) -> Router {
    let state = AppState::from(services);

    Router::new()
        // Health, stats and metrics (no authentication required)
        .merge(health::create_health_router())
        // Signaling
        .route("/ws", get(websocket::websocket_handler))
        // Room management
        .route("/api/rooms", get(room::list_rooms).post(room::create_room))
        .route("/api/rooms/{room_id}/membership", delete(room::leave_room))
        .route("/api/rooms/{room_id}/participants", get(room::get_participants))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
