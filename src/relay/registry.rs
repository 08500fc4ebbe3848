// Session table: the relay's authoritative matchmaking state
// All mutations funnel through &mut self on one registry instance

use crate::protocol::{ErrorReason, Role, ServerFrame, SessionCode, SESSION_CODE_LEN};
use axum::extract::ws::Message;
use rand::Rng;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 16;

/// Identifier for one control-plane connection. Connection identity is the
/// connection itself; this is just its table key.
pub type ConnId = u64;

/// Handle through which the registry reaches a connected participant.
///
/// The outbox feeds the connection's writer; sending never blocks on the
/// peer's socket.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub conn: ConnId,
    pub outbox: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    /// Queue a frame for delivery. Returns false if the connection's writer
    /// is already gone.
    pub fn send(&self, frame: &ServerFrame) -> bool {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize frame: {}", e);
                return false;
            }
        };
        self.outbox.send(Message::Text(json)).is_ok()
    }
}

/// One live matchmaking pairing.
///
/// `joiner` is absent until a join succeeds; at most one joiner ever.
#[derive(Debug)]
pub struct Session {
    pub code: SessionCode,
    pub initiator: PeerHandle,
    pub joiner: Option<PeerHandle>,
    /// Diagnostics only; sessions have no expiry.
    pub created_at: Instant,
}

impl Session {
    fn involves(&self, conn: ConnId) -> bool {
        self.initiator.conn == conn || self.joiner.as_ref().is_some_and(|j| j.conn == conn)
    }

    fn participant(&self, role: Role) -> Option<&PeerHandle> {
        match role {
            Role::Initiator => Some(&self.initiator),
            Role::Joiner => self.joiner.as_ref(),
        }
    }
}

/// In-memory session table. Owned by the server's run loop and shared with
/// per-connection tasks behind a single mutex; nothing else may touch it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionCode, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open a new session with `initiator` as its first participant and reply
    /// with `created`.
    pub fn create(&mut self, initiator: PeerHandle) -> Result<SessionCode, ErrorReason> {
        let code = self.generate_code()?;
        let session = Session {
            code: code.clone(),
            initiator: initiator.clone(),
            joiner: None,
            created_at: Instant::now(),
        };
        self.sessions.insert(code.clone(), session);
        initiator.send(&ServerFrame::Created { code: code.clone() });
        info!("✅ Session created: {} ({} live)", code, self.sessions.len());
        Ok(code)
    }

    /// Pair `joiner` into the session with `code`.
    ///
    /// The single transition point after which the session is eligible for
    /// relay. A rejected join leaves the session untouched.
    pub fn join(&mut self, code: &SessionCode, joiner: PeerHandle) -> Result<(), ErrorReason> {
        let session = self
            .sessions
            .get_mut(code)
            .ok_or(ErrorReason::SessionNotFound)?;
        if session.joiner.is_some() {
            return Err(ErrorReason::SessionFull);
        }
        if session.initiator.conn == joiner.conn {
            return Err(ErrorReason::SelfJoin);
        }

        joiner.send(&ServerFrame::Joined { code: code.clone() });
        session.initiator.send(&ServerFrame::PeerJoined);
        session.joiner = Some(joiner);
        info!("🤝 Session paired: {}", code);
        Ok(())
    }

    /// Forward an opaque payload to the `to` side of the session, verbatim.
    ///
    /// Fire-and-forget: no buffering, no queueing. Signaling is only
    /// meaningful to a live, attentive peer.
    pub fn relay(
        &mut self,
        code: &SessionCode,
        from: Role,
        to: Role,
        signal: serde_json::Value,
    ) -> Result<(), ErrorReason> {
        let session = self.sessions.get(code).ok_or(ErrorReason::SessionNotFound)?;
        let target = session
            .participant(to)
            .ok_or(ErrorReason::TargetUnavailable)?;
        if !target.send(&ServerFrame::Signal { from, to, signal }) {
            return Err(ErrorReason::TargetUnavailable);
        }
        Ok(())
    }

    /// Tear down every session referencing `conn` and tell the surviving
    /// participant.
    ///
    /// Close-, error- and heartbeat-triggered cleanup all converge here. A
    /// session is never left half-populated: both sides restart matchmaking.
    pub fn disconnect(&mut self, conn: ConnId) -> usize {
        let dead: Vec<SessionCode> = self
            .sessions
            .values()
            .filter(|s| s.involves(conn))
            .map(|s| s.code.clone())
            .collect();

        for code in &dead {
            if let Some(session) = self.sessions.remove(code) {
                let other = if session.initiator.conn == conn {
                    session.joiner.as_ref()
                } else {
                    Some(&session.initiator)
                };
                if let Some(peer) = other {
                    peer.send(&ServerFrame::PeerDisconnected);
                }
                info!(
                    "🧹 Session removed: {} (lived {:?})",
                    session.code,
                    session.created_at.elapsed()
                );
            }
        }
        dead.len()
    }

    /// Fresh unique code, collision-checked against the live set. Bounded
    /// retry; fails closed if the table is pathologically full.
    fn generate_code(&self) -> Result<SessionCode, ErrorReason> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code: String = (0..SESSION_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..CODE_ALPHABET.len());
                    CODE_ALPHABET[idx] as char
                })
                .collect();
            let code = SessionCode(code);
            if !self.sessions.contains_key(&code) {
                return Ok(code);
            }
        }
        warn!("Session code space exhausted after {} attempts", MAX_CODE_ATTEMPTS);
        Err(ErrorReason::Internal)
    }
}
