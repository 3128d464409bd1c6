//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;
use voxroom_sfu::{PeerConnector, RelayEngine, WebRtcConnector};

use crate::{
    repository::{PgRoomStore, RoomStore},
    service::{
        ConnectionManager, ConnectionRegistry, IdentityResolver, JwtIdentityResolver,
        RoomRegistry, SignalingService,
    },
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    /// Live rooms and their clients
    pub registry: Arc<RoomRegistry>,
    /// Every live client by ID
    pub connections: Arc<ConnectionRegistry>,
    /// SFU relay shared by all rooms
    pub relay: Arc<RelayEngine>,
    pub signaling: Arc<SignalingService>,
    pub connection_manager: Arc<ConnectionManager>,
    /// Token verification for inbound connections
    pub identity: Arc<dyn IdentityResolver>,
    /// Durable room persistence (absent without a database)
    pub store: Option<Arc<dyn RoomStore>>,
    /// Cancelled on graceful shutdown
    pub shutdown: CancellationToken,
}

impl Services {
    /// Wire services around an explicit peer connector and room store
    pub fn new(
        config: Config,
        store: Option<Arc<dyn RoomStore>>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, anyhow::Error> {
        let identity: Arc<dyn IdentityResolver> = Arc::new(JwtIdentityResolver::new(&config.jwt)?);
        let registry = Arc::new(RoomRegistry::new(store.clone()));
        let connections = Arc::new(ConnectionRegistry::new());
        let relay = RelayEngine::new(config.webrtc.clone());
        let signaling = Arc::new(SignalingService::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Arc::clone(&relay),
            connector,
        ));
        let shutdown = CancellationToken::new();
        let connection_manager = Arc::new(ConnectionManager::new(
            Arc::clone(&signaling),
            shutdown.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            connections,
            relay,
            signaling,
            connection_manager,
            identity,
            store,
            shutdown,
        })
    }
}

/// Initialize all core services
pub async fn init_services(config: Config, pool: Option<PgPool>) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let connector = WebRtcConnector::new(&config.webrtc)?;
    info!(
        ice_servers = config.webrtc.ice_servers.len(),
        udp_port_min = config.webrtc.udp_port_min,
        udp_port_max = config.webrtc.udp_port_max,
        "WebRTC engine initialized"
    );

    let store = pool.map(|pool| Arc::new(PgRoomStore::new(pool)) as Arc<dyn RoomStore>);
    if store.is_some() {
        info!("Room store: postgres");
    } else {
        info!("Room store: disabled, durable rooms last until restart");
    }

    let services = Services::new(config, store, Arc::new(connector))?;
    info!("Services initialized");
    Ok(services)
}
