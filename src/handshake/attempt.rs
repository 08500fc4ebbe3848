// One session attempt: role, code, negotiation progress
// Role is set at construction and never reassigned; inbound messages can
// only read it

use super::client::SessionEvent;
use super::negotiator::{Negotiator, NegotiatorEvent, PeerConnectionState};
use crate::error::HandshakeError;
use crate::protocol::{
    CandidatePayload, ClientFrame, Role, SdpKind, SessionCode, SignalPayload,
};
use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// State for a single `create_session`/`join_session` attempt.
///
/// Constructed fresh per attempt; nothing here outlives it. The `role` field
/// is private and has no mutator, which is what actually enforces the
/// write-once role requirement — no inbound message handler can reassign it.
pub struct SessionAttempt<N: Negotiator> {
    role: Role,
    code: Option<SessionCode>,
    negotiator: N,
    events: mpsc::UnboundedSender<SessionEvent<N::Channel>>,
    // Latches: one offer per attempt, one answer per attempt
    offered: bool,
    answered: bool,
    answer_applied: bool,
    terminal: bool,
}

impl<N: Negotiator> SessionAttempt<N> {
    pub fn new(
        role: Role,
        code: Option<SessionCode>,
        negotiator: N,
        events: mpsc::UnboundedSender<SessionEvent<N::Channel>>,
    ) -> Self {
        Self {
            role,
            code,
            negotiator,
            events,
            offered: false,
            answered: false,
            answer_applied: false,
            terminal: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Record the server-assigned code. Set at most once; the initiator
    /// learns it from the `created` reply.
    pub fn set_code(&mut self, code: SessionCode) {
        if self.code.is_some() {
            warn!("Ignoring second code assignment for this attempt");
            return;
        }
        self.code = Some(code);
    }

    /// The initiator's peer has paired: create the channel, produce the one
    /// offer of this attempt, and relay it.
    pub async fn on_peer_joined(&mut self) -> Result<Option<ClientFrame>, HandshakeError> {
        if self.role != Role::Initiator {
            warn!("Protocol anomaly: peerJoined received as {}", self.role);
            return Ok(None);
        }
        if self.offered {
            warn!("Protocol anomaly: duplicate peerJoined, offer already sent");
            return Ok(None);
        }

        self.negotiator
            .create_local_channel()
            .await
            .map_err(HandshakeError::Negotiation)?;
        let offer = self
            .negotiator
            .create_offer()
            .await
            .map_err(HandshakeError::Negotiation)?;
        self.offered = true;
        info!("📤 Offer created, relaying to joiner");
        Ok(self.signal_frame(SignalPayload::Sdp(offer)))
    }

    /// Dispatch a relayed payload by kind and current role. Inconsistent or
    /// duplicate messages are dropped, never fatal.
    pub async fn on_signal(
        &mut self,
        from: Role,
        signal: serde_json::Value,
    ) -> Result<Option<ClientFrame>, HandshakeError> {
        if from == self.role {
            warn!("Protocol anomaly: signal tagged from our own role");
            return Ok(None);
        }

        let payload: SignalPayload = match serde_json::from_value(signal) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Protocol anomaly: undecipherable signal payload: {}", e);
                return Ok(None);
            }
        };

        match payload {
            SignalPayload::Sdp(sdp) => match (sdp.kind, self.role) {
                (SdpKind::Offer, Role::Joiner) => {
                    if self.answered {
                        warn!("Protocol anomaly: duplicate offer, answer already sent");
                        return Ok(None);
                    }
                    self.negotiator
                        .set_remote_description(sdp)
                        .await
                        .map_err(HandshakeError::Negotiation)?;
                    let answer = self
                        .negotiator
                        .create_answer()
                        .await
                        .map_err(HandshakeError::Negotiation)?;
                    self.answered = true;
                    info!("📤 Answer created, relaying to initiator");
                    Ok(self.signal_frame(SignalPayload::Sdp(answer)))
                }
                (SdpKind::Answer, Role::Initiator) => {
                    if !self.offered || self.answer_applied {
                        warn!("Protocol anomaly: unexpected answer, dropping");
                        return Ok(None);
                    }
                    self.negotiator
                        .set_remote_description(sdp)
                        .await
                        .map_err(HandshakeError::Negotiation)?;
                    self.answer_applied = true;
                    debug!("Remote answer applied");
                    Ok(None)
                }
                (kind, role) => {
                    warn!("Protocol anomaly: {:?} received as {}, dropping", kind, role);
                    Ok(None)
                }
            },
            SignalPayload::Candidate(candidate) => {
                // Candidates apply regardless of role; failures are logged,
                // not fatal (duplicates and late arrivals are routine)
                if let Err(e) = self.negotiator.add_remote_candidate(candidate).await {
                    warn!("Failed to add remote candidate: {}", e);
                }
                Ok(None)
            }
        }
    }

    /// A locally gathered candidate: relay it to the other side immediately.
    pub fn on_local_candidate(&mut self, candidate: CandidatePayload) -> Option<ClientFrame> {
        self.signal_frame(SignalPayload::Candidate(candidate))
    }

    /// Negotiation-object events other than candidates.
    pub fn on_negotiator_state(&mut self, state: PeerConnectionState) {
        debug!("Peer connection state: {:?}", state);
        if state == PeerConnectionState::Failed {
            self.fail(HandshakeError::Negotiation(anyhow!(
                "peer connection failed"
            )));
        }
    }

    /// Success terminal: hand the open channel to the caller, exactly once.
    pub fn deliver_channel(&mut self, channel: N::Channel) {
        if self.terminal {
            debug!("Channel ready after terminal state, ignoring");
            return;
        }
        self.terminal = true;
        info!("🔗 Data channel open, handing off");
        let _ = self.events.send(SessionEvent::ChannelReady(channel));
    }

    /// Silence the attempt without an event: the failure is already being
    /// reported through a pending entry-call reply, or the caller itself
    /// asked for teardown.
    pub fn abandon(&mut self) {
        self.terminal = true;
    }

    /// Whether a terminal outcome (success, failure or abandonment) has been
    /// reached.
    pub fn is_settled(&self) -> bool {
        self.terminal
    }

    /// Failure terminal: surface the reason to the caller, exactly once.
    pub fn fail(&mut self, err: HandshakeError) {
        if self.terminal {
            debug!("Suppressing post-terminal failure: {}", err);
            return;
        }
        self.terminal = true;
        warn!("Session attempt failed: {}", err);
        let _ = self.events.send(SessionEvent::Failed(err));
    }

    pub async fn close(&mut self) {
        self.negotiator.close().await;
    }

    fn signal_frame(&self, payload: SignalPayload) -> Option<ClientFrame> {
        let Some(code) = self.code.clone() else {
            warn!("Dropping outbound signal: no session code yet");
            return None;
        };
        Some(ClientFrame::Signal {
            code,
            from: self.role,
            to: self.role.opposite(),
            signal: payload.to_value(),
        })
    }
}
