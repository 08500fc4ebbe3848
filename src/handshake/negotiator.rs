// The peer-connection negotiation seam
// The platform (browser runtime, or a native WebRTC engine) implements this;
// the handshake client only drives it to the point where a data channel opens

use crate::protocol::{CandidatePayload, SdpPayload};
use anyhow::Result;
use std::future::Future;
use tokio::sync::mpsc;

/// Connection-level state reported by the negotiation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events the negotiation object pushes at the handshake client.
#[derive(Debug)]
pub enum NegotiatorEvent<C> {
    /// A locally gathered ICE candidate; relayed to the other party
    /// immediately, never batched.
    LocalCandidate(CandidatePayload),

    /// The data channel (locally created or remotely announced) reached the
    /// open state. This is the handoff moment.
    ChannelReady(C),

    /// Underlying connection state moved; informational except for `Failed`.
    StateChanged(PeerConnectionState),
}

/// One participant's local peer-connection negotiation object.
///
/// A fresh instance is consumed per session attempt. Implementations surface
/// their asynchronous callbacks through the event channel handed out by
/// [`take_events`](Negotiator::take_events); the handshake client calls the
/// methods, never the other way around.
pub trait Negotiator: Send + 'static {
    /// The data channel handle handed to the caller on success.
    type Channel: Send + 'static;

    /// Hand over the event stream. Called exactly once, before any other
    /// method.
    fn take_events(&mut self) -> mpsc::UnboundedReceiver<NegotiatorEvent<Self::Channel>>;

    /// Create the local data channel. Initiator side only, before offering;
    /// the joiner waits for the remote channel instead.
    fn create_local_channel(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Produce the local offer and apply it as the local description.
    fn create_offer(&mut self) -> impl Future<Output = Result<SdpPayload>> + Send;

    /// Produce the local answer to a previously applied remote offer.
    fn create_answer(&mut self) -> impl Future<Output = Result<SdpPayload>> + Send;

    /// Apply the remote offer or answer.
    fn set_remote_description(&mut self, desc: SdpPayload)
        -> impl Future<Output = Result<()>> + Send;

    /// Feed a relayed remote ICE candidate into the negotiation.
    fn add_remote_candidate(
        &mut self,
        candidate: CandidatePayload,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Tear down the negotiation and any channel it produced. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
