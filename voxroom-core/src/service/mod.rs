pub mod auth;
pub mod connection;
pub mod connections;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod transport;

pub use auth::{IdentityResolver, JwtIdentityResolver};
pub use connection::ConnectionManager;
pub use connections::ConnectionRegistry;
pub use registry::{Room, RoomRegistry, RoomSummary};
pub use session::Client;
pub use signaling::{MessageKind, SignalingMessage, SignalingService};
pub use transport::{RecvError, SignalSink, SignalTransport};
