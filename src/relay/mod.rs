// Relay server: in-memory session broker for match signaling
// Brokers create/join and relays opaque handshake payloads between the two
// participants of a session

pub mod registry;
pub mod server;

pub use registry::{ConnId, PeerHandle, Session, SessionRegistry};
pub use server::{router, RelayState};
