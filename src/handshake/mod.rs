// Peer handshake client for p2volley
// Drives session creation/joining against the match server and a local
// peer-connection negotiation to the point where a data channel opens

pub mod attempt;
pub mod client;
pub mod negotiator;

pub use client::{MatchClient, SessionEvent};
pub use negotiator::{Negotiator, NegotiatorEvent, PeerConnectionState};
