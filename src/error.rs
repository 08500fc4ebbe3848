// Client-side error taxonomy for session establishment

use crate::protocol::ErrorReason;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Everything that can go wrong while establishing a session.
///
/// Every failure is observable by the caller; there are no silent retries.
/// After any of these, the client is disconnected and may start a fresh
/// attempt.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The relay rejected the request; reason carried verbatim off the wire.
    #[error("relay rejected request: {0}")]
    Rejected(ErrorReason),

    /// Control-plane connection could not be established in time.
    #[error("could not reach relay within {0:?}")]
    ConnectTimeout(Duration),

    /// Dial failed outright (refused, DNS, TLS).
    #[error("failed to reach relay: {0}")]
    Connect(#[from] tungstenite::Error),

    /// No reply from the relay within the bounded wait.
    #[error("no reply from relay within {0:?}")]
    ServerTimeout(Duration),

    /// `disconnect()` was called while this operation was pending.
    #[error("cancelled by disconnect")]
    Cancelled,

    /// A session attempt is already in flight on this client.
    #[error("another session attempt is already in flight")]
    AttemptInFlight,

    /// The other party's connection closed mid-handshake.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// The control-plane connection dropped mid-handshake.
    #[error("control connection closed")]
    ControlClosed,

    /// The local negotiation object reported a failure.
    #[error("negotiation failed: {0}")]
    Negotiation(#[source] anyhow::Error),
}
