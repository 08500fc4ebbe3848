// Match signaling wire protocol
// JSON text frames exchanged over the control-plane WebSocket

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated session codes (uppercase alphanumeric).
pub const SESSION_CODE_LEN: usize = 6;

/// Short opaque identifier for a live session.
///
/// Generated server-side at creation time; the only piece of shared state a
/// joiner needs to know out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(pub String);

impl SessionCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionCode {
    fn from(s: &str) -> Self {
        SessionCode(s.to_string())
    }
}

/// Which side of a session a connection is.
///
/// Fixed for the lifetime of a session attempt: the initiator created the
/// session and will produce the offer and the data channel; the joiner
/// answers. Also used as the routing tag in relayed signal frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Initiator,
    Joiner,
}

impl Role {
    /// The other party in the session.
    pub fn opposite(self) -> Role {
        match self {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Joiner => f.write_str("joiner"),
        }
    }
}

/// Why the server rejected a request.
///
/// Carried verbatim in `error` frames and surfaced unchanged to the caller on
/// the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorReason {
    /// No live session with that code.
    SessionNotFound,
    /// Session already has a joiner.
    SessionFull,
    /// A connection tried to join its own session.
    SelfJoin,
    /// Relay target missing or its connection is gone.
    TargetUnavailable,
    /// Unparseable frame or missing required fields.
    MalformedRequest,
    /// Server-side failure (e.g. code generation exhausted).
    Internal,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorReason::SessionNotFound => "session not found",
            ErrorReason::SessionFull => "session is full",
            ErrorReason::SelfJoin => "cannot join own session",
            ErrorReason::TargetUnavailable => "target not connected",
            ErrorReason::MalformedRequest => "malformed request",
            ErrorReason::Internal => "internal server error",
        };
        f.write_str(msg)
    }
}

/// Frames a participant sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Request a new session.
    Create,

    /// Attempt to join an existing session.
    Join { code: SessionCode },

    /// Relay a payload to the other party. The `signal` value is opaque to
    /// the server.
    Signal {
        code: SessionCode,
        from: Role,
        to: Role,
        signal: serde_json::Value,
    },
}

/// Frames the relay sends to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Session established, code assigned.
    Created { code: SessionCode },

    /// Join accepted.
    Joined { code: SessionCode },

    /// (To the initiator) a joiner has paired.
    PeerJoined,

    /// Delivered payload, verbatim from the other party.
    Signal {
        from: Role,
        to: Role,
        signal: serde_json::Value,
    },

    /// The other party's connection closed.
    PeerDisconnected,

    /// Operation failed.
    Error { message: ErrorReason },
}

/// Whether an SDP payload is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description, in the shape the platform negotiation object
/// produces (`{"type": "offer"|"answer", "sdp": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// An ICE candidate, in the platform wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// Client-side view of a relayed signal payload.
///
/// The server never parses this; only the handshake client does, and anything
/// that matches neither shape is treated as a protocol anomaly and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalPayload {
    Sdp(SdpPayload),
    Candidate(CandidatePayload),
}

impl SignalPayload {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("signal payload serializes")
    }
}
