//! Signaling transport seam
//!
//! The lifecycle manager reads from a [`SignalTransport`] and writes through a
//! [`SignalSink`]; the HTTP layer adapts a WebSocket to both.

use async_trait::async_trait;
use std::fmt;

use super::signaling::SignalingMessage;

/// Why an inbound frame could not be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// The frame arrived but is not a valid signaling message
    Malformed(String),
    /// The connection failed
    Transport(String),
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed message: {detail}"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Inbound half of a signaling connection
#[async_trait]
pub trait SignalTransport: Send {
    /// Next inbound message. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<SignalingMessage, RecvError>>;
}

/// Outbound half of a signaling connection
///
/// Sends never block; a writer task owned by the transport drains the queue.
pub trait SignalSink: Send + Sync {
    /// Queue a message. Returns false if it was dropped (queue full or closed).
    fn send(&self, message: SignalingMessage) -> bool;

    /// Stop accepting messages; the writer flushes what is queued, then closes
    fn close(&self);
}
