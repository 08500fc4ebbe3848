//! Match signaling core for p2volley: a relay server that pairs two players
//! by session code, and the handshake client that drives offer/answer/
//! candidate exchange over it until a direct data channel opens.

pub mod config;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod relay;

pub use config::{ClientConfig, Config, RelayConfig};
pub use error::HandshakeError;
pub use handshake::{MatchClient, Negotiator, NegotiatorEvent, SessionEvent};
pub use protocol::{ErrorReason, Role, SessionCode};
