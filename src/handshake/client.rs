// Handshake client: drives session establishment against the match server
// Public entry points send commands to a spawned driver task that owns the
// control-plane WebSocket; results come back over oneshot replies and the
// session event stream

use super::attempt::SessionAttempt;
use super::negotiator::{Negotiator, NegotiatorEvent};
use crate::config::ClientConfig;
use crate::error::HandshakeError;
use crate::protocol::{ClientFrame, Role, ServerFrame, SessionCode};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Terminal outcomes surfaced to the caller (the game layer), at most one
/// per session attempt.
#[derive(Debug)]
pub enum SessionEvent<C> {
    /// The direct data channel is open; signaling is done and the relay is
    /// out of the path from here on.
    ChannelReady(C),

    /// The attempt failed after its entry call had already returned. The
    /// client does not retry; that is the caller's decision.
    Failed(HandshakeError),
}

enum Command<N: Negotiator> {
    Create {
        negotiator: N,
        reply: oneshot::Sender<Result<SessionCode, HandshakeError>>,
    },
    Join {
        code: SessionCode,
        negotiator: N,
        reply: oneshot::Sender<Result<(), HandshakeError>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

enum Pending {
    Create(oneshot::Sender<Result<SessionCode, HandshakeError>>),
    Join(oneshot::Sender<Result<(), HandshakeError>>),
}

impl Pending {
    fn resolve_err(self, err: HandshakeError) {
        match self {
            Pending::Create(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Join(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Client for establishing one peer-to-peer match session at a time.
///
/// Holds at most one control-plane connection; `create_session` and
/// `join_session` dial it lazily and a caller arriving while a dial is in
/// flight awaits that dial rather than opening a second socket. A fresh
/// negotiator is consumed per attempt, and starting an attempt while another
/// is active fails fast with [`HandshakeError::AttemptInFlight`].
pub struct MatchClient<N: Negotiator> {
    config: ClientConfig,
    events_tx: mpsc::UnboundedSender<SessionEvent<N::Channel>>,
    link: Mutex<Option<mpsc::UnboundedSender<Command<N>>>>,
}

impl<N: Negotiator> MatchClient<N> {
    /// Build a client and the event stream its attempts report through.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent<N::Channel>>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                events_tx,
                link: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Open a new session as the initiator and return its code for the other
    /// player to join with.
    pub async fn create_session(&self, negotiator: N) -> Result<SessionCode, HandshakeError> {
        let cmd_tx = self.ensure_link().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Create {
                negotiator,
                reply: reply_tx,
            })
            .map_err(|_| HandshakeError::ControlClosed)?;

        let wait = self.config.create_timeout();
        match tokio::time::timeout(wait, reply_rx).await {
            Err(_) => Err(HandshakeError::ServerTimeout(wait)),
            Ok(Err(_)) => Err(HandshakeError::Cancelled),
            Ok(Ok(result)) => result,
        }
    }

    /// Join an existing session as the joiner.
    pub async fn join_session(
        &self,
        negotiator: N,
        code: SessionCode,
    ) -> Result<(), HandshakeError> {
        let cmd_tx = self.ensure_link().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Join {
                code,
                negotiator,
                reply: reply_tx,
            })
            .map_err(|_| HandshakeError::ControlClosed)?;

        let wait = self.config.join_timeout();
        match tokio::time::timeout(wait, reply_rx).await {
            Err(_) => Err(HandshakeError::ServerTimeout(wait)),
            Ok(Err(_)) => Err(HandshakeError::Cancelled),
            Ok(Ok(result)) => result,
        }
    }

    /// Tear everything down: negotiation, data channel, control link.
    ///
    /// Idempotent and safe from any state; every pending await inside the
    /// client resolves with [`HandshakeError::Cancelled`]. The client is
    /// immediately reusable for a fresh attempt.
    pub async fn disconnect(&self) {
        let link = self.link.lock().await.take();
        if let Some(cmd_tx) = link {
            let (done_tx, done_rx) = oneshot::channel();
            if cmd_tx.send(Command::Disconnect { done: done_tx }).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Hand out the command channel of the live driver, dialing the server
    /// first if needed. Bounded by the connect timeout, which also covers
    /// waiting out a dial another caller has in flight.
    async fn ensure_link(
        &self,
    ) -> Result<mpsc::UnboundedSender<Command<N>>, HandshakeError> {
        let wait = self.config.connect_timeout();
        tokio::time::timeout(wait, self.ensure_link_inner())
            .await
            .map_err(|_| HandshakeError::ConnectTimeout(wait))?
    }

    async fn ensure_link_inner(
        &self,
    ) -> Result<mpsc::UnboundedSender<Command<N>>, HandshakeError> {
        let mut slot = self.link.lock().await;

        if let Some(cmd_tx) = slot.as_ref() {
            if !cmd_tx.is_closed() {
                return Ok(cmd_tx.clone());
            }
            // Driver is gone (link dropped or torn down); redial below
            *slot = None;
        }

        let (ws, _) = connect_async(self.config.server_url.as_str()).await?;
        info!("🔌 Control link established to {}", self.config.server_url);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            ws,
            cmd_rx,
            events: self.events_tx.clone(),
            attempt: None,
        };
        tokio::spawn(driver.run());

        *slot = Some(cmd_tx.clone());
        Ok(cmd_tx)
    }
}

struct ActiveAttempt<N: Negotiator> {
    attempt: SessionAttempt<N>,
    neg_events: mpsc::UnboundedReceiver<NegotiatorEvent<N::Channel>>,
    pending: Option<Pending>,
}

/// Owns the WebSocket and the current attempt; a single-threaded state
/// machine over its three input sources (server frames, caller commands,
/// negotiator events).
struct Driver<N: Negotiator> {
    ws: WsStream,
    cmd_rx: mpsc::UnboundedReceiver<Command<N>>,
    events: mpsc::UnboundedSender<SessionEvent<N::Channel>>,
    attempt: Option<ActiveAttempt<N>>,
}

impl<N: Negotiator> Driver<N> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Create { negotiator, reply }) => {
                        self.start(
                            Role::Initiator,
                            None,
                            ClientFrame::Create,
                            negotiator,
                            Pending::Create(reply),
                        )
                        .await;
                    }
                    Some(Command::Join { code, negotiator, reply }) => {
                        self.start(
                            Role::Joiner,
                            Some(code.clone()),
                            ClientFrame::Join { code },
                            negotiator,
                            Pending::Join(reply),
                        )
                        .await;
                    }
                    Some(Command::Disconnect { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // Client handle dropped entirely
                        self.shutdown().await;
                        return;
                    }
                },
                msg = self.ws.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => self.on_text(&text).await,
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = self.ws.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.on_control_closed().await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Control link error: {}", e);
                        self.on_control_closed().await;
                        return;
                    }
                },
                ev = Self::next_negotiator_event(&mut self.attempt) => match ev {
                    NegotiatorEvent::LocalCandidate(candidate) => {
                        // Eager relay, never batched
                        let frame = self
                            .attempt
                            .as_mut()
                            .and_then(|a| a.attempt.on_local_candidate(candidate));
                        if let Some(frame) = frame {
                            self.transmit(frame).await;
                        }
                    }
                    NegotiatorEvent::ChannelReady(channel) => {
                        if let Some(a) = self.attempt.as_mut() {
                            a.attempt.deliver_channel(channel);
                        }
                    }
                    NegotiatorEvent::StateChanged(state) => {
                        if let Some(a) = self.attempt.as_mut() {
                            a.attempt.on_negotiator_state(state);
                        }
                    }
                },
            }
        }
    }

    /// Begin a session attempt. Role is fixed here, before the first frame
    /// that could trigger role-dependent behavior goes out.
    async fn start(
        &mut self,
        role: Role,
        code: Option<SessionCode>,
        frame: ClientFrame,
        mut negotiator: N,
        pending: Pending,
    ) {
        if self.attempt.is_some() {
            negotiator.close().await;
            pending.resolve_err(HandshakeError::AttemptInFlight);
            return;
        }

        let neg_events = negotiator.take_events();
        let attempt = SessionAttempt::new(role, code, negotiator, self.events.clone());
        self.attempt = Some(ActiveAttempt {
            attempt,
            neg_events,
            pending: Some(pending),
        });

        info!("🎬 Starting session attempt as {}", role);
        self.transmit(frame).await;
    }

    async fn on_text(&mut self, text: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Undecipherable server frame: {}", e);
                return;
            }
        };
        self.on_frame(frame).await;
    }

    async fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Created { code } => {
                let Some(a) = self.attempt.as_mut() else {
                    warn!("created frame with no active attempt");
                    return;
                };
                match a.pending.take() {
                    Some(Pending::Create(reply)) => {
                        a.attempt.set_code(code.clone());
                        info!("✅ Session created: {}", code);
                        let _ = reply.send(Ok(code));
                    }
                    other => {
                        warn!("Unexpected created frame");
                        a.pending = other;
                    }
                }
            }
            ServerFrame::Joined { code } => {
                let Some(a) = self.attempt.as_mut() else {
                    warn!("joined frame with no active attempt");
                    return;
                };
                match a.pending.take() {
                    Some(Pending::Join(reply)) => {
                        info!("✅ Joined session: {}", code);
                        let _ = reply.send(Ok(()));
                    }
                    other => {
                        warn!("Unexpected joined frame");
                        a.pending = other;
                    }
                }
            }
            ServerFrame::PeerJoined => {
                let action = match self.attempt.as_mut() {
                    Some(a) => a.attempt.on_peer_joined().await,
                    None => {
                        warn!("peerJoined with no active attempt");
                        return;
                    }
                };
                self.apply(action).await;
            }
            ServerFrame::Signal { from, signal, .. } => {
                let action = match self.attempt.as_mut() {
                    Some(a) => a.attempt.on_signal(from, signal).await,
                    None => {
                        warn!("signal with no active attempt");
                        return;
                    }
                };
                self.apply(action).await;
            }
            ServerFrame::PeerDisconnected => {
                self.fail_attempt(HandshakeError::PeerDisconnected).await;
            }
            ServerFrame::Error { message } => {
                self.fail_attempt(HandshakeError::Rejected(message)).await;
            }
        }
    }

    async fn apply(&mut self, action: Result<Option<ClientFrame>, HandshakeError>) {
        match action {
            Ok(Some(frame)) => {
                self.transmit(frame).await;
            }
            Ok(None) => {}
            Err(e) => self.fail_attempt(e).await,
        }
    }

    async fn transmit(&mut self, frame: ClientFrame) -> bool {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize frame: {}", e);
                return false;
            }
        };
        if let Err(e) = self.ws.send(WsMessage::Text(json)).await {
            warn!("Control link send failed: {}", e);
            self.fail_attempt(HandshakeError::ControlClosed).await;
            return false;
        }
        true
    }

    /// Route a failure to whichever reporting path is armed — a pending entry
    /// call gets the error as its return value, otherwise the attempt emits
    /// its one `Failed` event — then tear the attempt down so the client is
    /// immediately reusable.
    async fn fail_attempt(&mut self, err: HandshakeError) {
        match self.attempt.take() {
            Some(mut a) if !a.attempt.is_settled() => {
                if let Some(pending) = a.pending.take() {
                    a.attempt.abandon();
                    a.attempt.close().await;
                    pending.resolve_err(err);
                } else {
                    a.attempt.fail(err);
                    a.attempt.close().await;
                }
            }
            Some(a) => {
                // A settled attempt rides out late errors; the channel, if
                // one was delivered, belongs to the caller now
                debug!("Ignoring failure after terminal state: {}", err);
                self.attempt = Some(a);
            }
            None => debug!("Failure with no active attempt: {}", err),
        }
    }

    async fn on_control_closed(&mut self) {
        info!("Control link closed");
        self.fail_attempt(HandshakeError::ControlClosed).await;
    }

    async fn shutdown(&mut self) {
        if let Some(mut a) = self.attempt.take() {
            if let Some(pending) = a.pending.take() {
                a.attempt.abandon();
                pending.resolve_err(HandshakeError::Cancelled);
            } else {
                a.attempt.abandon();
            }
            a.attempt.close().await;
        }
        let _ = self.ws.close(None).await;
        info!("👋 Control link torn down");
    }

    async fn next_negotiator_event(
        attempt: &mut Option<ActiveAttempt<N>>,
    ) -> NegotiatorEvent<N::Channel> {
        match attempt {
            Some(a) => match a.neg_events.recv().await {
                Some(ev) => ev,
                // Negotiator dropped its sender; nothing more will come
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }
}
