// End-to-end tests for the handshake client against an in-process match
// server, with a scripted negotiator standing in for the platform's
// peer-connection object

use futures::{SinkExt, StreamExt};
use p2volley::config::ClientConfig;
use p2volley::handshake::{
    MatchClient, Negotiator, NegotiatorEvent, PeerConnectionState, SessionEvent,
};
use p2volley::protocol::{
    CandidatePayload, ClientFrame, ErrorReason, SdpKind, SdpPayload, ServerFrame, SessionCode,
};
use p2volley::relay::{router, RelayState};
use p2volley::HandshakeError;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

const EVENT_WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Scripted negotiator
//
// Deterministic stand-in for the platform negotiation object. The channel is
// reported ready once the remote side's candidate has arrived, so a passing
// handshake proves the whole offer/answer/candidate sequence ran.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CallLog {
    channel_created: bool,
    offers: usize,
    answers: usize,
    remote_descriptions: Vec<SdpPayload>,
    remote_candidates: Vec<CandidatePayload>,
    closed: bool,
}

struct MockNegotiator {
    label: &'static str,
    log: Arc<Mutex<CallLog>>,
    channel_announced: bool,
    events_tx: mpsc::UnboundedSender<NegotiatorEvent<String>>,
    events_rx: Option<mpsc::UnboundedReceiver<NegotiatorEvent<String>>>,
}

impl MockNegotiator {
    fn new(label: &'static str) -> (Self, Arc<Mutex<CallLog>>) {
        let log = Arc::new(Mutex::new(CallLog::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                label,
                log: log.clone(),
                channel_announced: false,
                events_tx,
                events_rx: Some(events_rx),
            },
            log,
        )
    }

    fn local_candidate(&self) -> CandidatePayload {
        CandidatePayload {
            candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.1 5000 typ host", self.label),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

impl Negotiator for MockNegotiator {
    type Channel = String;

    fn take_events(&mut self) -> mpsc::UnboundedReceiver<NegotiatorEvent<String>> {
        self.events_rx.take().expect("events taken once")
    }

    async fn create_local_channel(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().channel_created = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> anyhow::Result<SdpPayload> {
        self.log.lock().unwrap().offers += 1;
        Ok(SdpPayload {
            kind: SdpKind::Offer,
            sdp: format!("v=0 offer-from-{}", self.label),
        })
    }

    async fn create_answer(&mut self) -> anyhow::Result<SdpPayload> {
        self.log.lock().unwrap().answers += 1;
        // Answering kicks off local candidate gathering
        let _ = self
            .events_tx
            .send(NegotiatorEvent::LocalCandidate(self.local_candidate()));
        Ok(SdpPayload {
            kind: SdpKind::Answer,
            sdp: format!("v=0 answer-from-{}", self.label),
        })
    }

    async fn set_remote_description(&mut self, desc: SdpPayload) -> anyhow::Result<()> {
        let is_answer = desc.kind == SdpKind::Answer;
        self.log.lock().unwrap().remote_descriptions.push(desc);
        if is_answer {
            // Offering side starts gathering once the answer lands
            let _ = self
                .events_tx
                .send(NegotiatorEvent::LocalCandidate(self.local_candidate()));
        }
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: CandidatePayload) -> anyhow::Result<()> {
        self.log.lock().unwrap().remote_candidates.push(candidate);
        if !self.channel_announced {
            self.channel_announced = true;
            let _ = self
                .events_tx
                .send(NegotiatorEvent::StateChanged(PeerConnectionState::Connected));
            let _ = self
                .events_tx
                .send(NegotiatorEvent::ChannelReady(format!("channel-{}", self.label)));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new(Duration::from_secs(30));
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

/// A server that accepts the WebSocket but never answers anything.
async fn spawn_mute_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    addr
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_url: format!("ws://{}/", addr),
        connect_timeout_secs: 5,
        create_timeout_secs: 5,
        join_timeout_secs: 5,
    }
}

async fn expect_channel(
    events: &mut mpsc::UnboundedReceiver<SessionEvent<String>>,
) -> String {
    match timeout(EVENT_WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream closed")
    {
        SessionEvent::ChannelReady(channel) => channel,
        SessionEvent::Failed(e) => panic!("handshake failed: {}", e),
    }
}

async fn expect_failure(
    events: &mut mpsc::UnboundedReceiver<SessionEvent<String>>,
) -> HandshakeError {
    match timeout(EVENT_WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream closed")
    {
        SessionEvent::Failed(e) => e,
        SessionEvent::ChannelReady(_) => panic!("unexpected success"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_handshake_opens_channel_on_both_sides() {
    let addr = spawn_server().await;
    let (alice, mut alice_events) = MatchClient::new(client_config(addr));
    let (bob, mut bob_events) = MatchClient::new(client_config(addr));
    let (neg_a, log_a) = MockNegotiator::new("initiator");
    let (neg_b, log_b) = MockNegotiator::new("joiner");

    let code = alice.create_session(neg_a).await.unwrap();
    assert_eq!(code.as_str().len(), 6);

    bob.join_session(neg_b, code).await.unwrap();

    assert_eq!(expect_channel(&mut alice_events).await, "channel-initiator");
    assert_eq!(expect_channel(&mut bob_events).await, "channel-joiner");

    // Initiator offered exactly once and created the channel; joiner
    // answered exactly once and created nothing
    {
        let a = log_a.lock().unwrap();
        assert_eq!(a.offers, 1);
        assert_eq!(a.answers, 0);
        assert!(a.channel_created);
        assert_eq!(a.remote_descriptions.len(), 1);
        assert_eq!(a.remote_descriptions[0].kind, SdpKind::Answer);
        assert_eq!(a.remote_descriptions[0].sdp, "v=0 answer-from-joiner");
        assert_eq!(a.remote_candidates.len(), 1);
        assert!(a.remote_candidates[0].candidate.contains("joiner"));
    }
    {
        let b = log_b.lock().unwrap();
        assert_eq!(b.offers, 0);
        assert_eq!(b.answers, 1);
        assert!(!b.channel_created);
        assert_eq!(b.remote_descriptions.len(), 1);
        assert_eq!(b.remote_descriptions[0].kind, SdpKind::Offer);
        assert_eq!(b.remote_descriptions[0].sdp, "v=0 offer-from-initiator");
        assert_eq!(b.remote_candidates.len(), 1);
        assert!(b.remote_candidates[0].candidate.contains("initiator"));
    }

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn test_join_unknown_code_surfaces_server_reason() {
    let addr = spawn_server().await;
    let (bob, _bob_events) = MatchClient::new(client_config(addr));
    let (neg_b, log_b) = MockNegotiator::new("joiner");

    let err = bob
        .join_session(neg_b, SessionCode::from("ZZZZZZ"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Rejected(ErrorReason::SessionNotFound)
    ));
    // The failed attempt's negotiation was torn down with it
    assert!(log_b.lock().unwrap().closed);

    // A rejected attempt leaves the client reusable right away
    let (neg_two, _log_two) = MockNegotiator::new("initiator");
    let code = bob.create_session(neg_two).await.unwrap();
    assert_eq!(code.as_str().len(), 6);
    bob.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_join() {
    let addr = spawn_mute_server().await;
    let (bob, _bob_events) = MatchClient::<MockNegotiator>::new(client_config(addr));
    let bob = Arc::new(bob);
    let (neg_b, log_b) = MockNegotiator::new("joiner");

    let joiner = bob.clone();
    let join = tokio::spawn(async move {
        joiner
            .join_session(neg_b, SessionCode::from("AB12CD"))
            .await
    });

    // Let the join request reach its wait, then pull the plug
    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.disconnect().await;

    let result = join.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::Cancelled)));
    assert!(log_b.lock().unwrap().closed);
}

#[tokio::test]
async fn test_client_reusable_after_disconnect() {
    let addr = spawn_server().await;
    let (client, _events) = MatchClient::new(client_config(addr));

    let (neg_one, _log_one) = MockNegotiator::new("initiator");
    let first_code = client.create_session(neg_one).await.unwrap();

    // Teardown, then a fresh attempt on the same client object
    client.disconnect().await;
    let (neg_two, _log_two) = MockNegotiator::new("initiator");
    let second_code = client.create_session(neg_two).await.unwrap();
    assert_eq!(second_code.as_str().len(), 6);

    // The first session died with its control connection; give the server a
    // beat to finish processing the close
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (mut raw, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    raw.send(Message::Text(
        serde_json::to_string(&ClientFrame::Join { code: first_code }).unwrap(),
    ))
    .await
    .unwrap();
    loop {
        match raw.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let frame: ServerFrame = serde_json::from_str(&text).unwrap();
                assert_eq!(
                    frame,
                    ServerFrame::Error {
                        message: ErrorReason::SessionNotFound
                    }
                );
                break;
            }
            _ => continue,
        }
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_second_attempt_while_one_is_active_fails_fast() {
    let addr = spawn_mute_server().await;
    let (client, _events) = MatchClient::new(client_config(addr));
    let client = Arc::new(client);

    let (neg_one, _log_one) = MockNegotiator::new("initiator");
    let first = client.clone();
    let pending = tokio::spawn(async move { first.create_session(neg_one).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (neg_two, log_two) = MockNegotiator::new("second");
    let err = client.create_session(neg_two).await.unwrap_err();
    assert!(matches!(err, HandshakeError::AttemptInFlight));
    // The rejected attempt's negotiator was torn down, not leaked
    assert!(log_two.lock().unwrap().closed);

    client.disconnect().await;
    assert!(matches!(
        pending.await.unwrap(),
        Err(HandshakeError::Cancelled)
    ));
}

#[tokio::test]
async fn test_mute_server_times_out_the_entry_call() {
    let addr = spawn_mute_server().await;
    let mut cfg = client_config(addr);
    cfg.create_timeout_secs = 1;
    let (client, _events) = MatchClient::new(cfg);
    let (neg, _log) = MockNegotiator::new("initiator");

    let err = client.create_session(neg).await.unwrap_err();
    assert!(matches!(err, HandshakeError::ServerTimeout(_)));
    client.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_server_fails_the_dial() {
    // Grab a port that nothing is listening on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (client, _events) = MatchClient::new(client_config(addr));
    let (neg, _log) = MockNegotiator::new("initiator");

    let err = client.create_session(neg).await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Connect(_) | HandshakeError::ConnectTimeout(_)
    ));
}

#[tokio::test]
async fn test_peer_vanishing_mid_handshake_surfaces_one_error() {
    let addr = spawn_server().await;
    let (alice, mut alice_events) = MatchClient::new(client_config(addr));
    let (neg_a, _log_a) = MockNegotiator::new("initiator");

    let code = alice.create_session(neg_a).await.unwrap();

    // A bare WebSocket participant joins, then drops before answering
    let (mut raw, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    raw.send(Message::Text(
        serde_json::to_string(&ClientFrame::Join { code }).unwrap(),
    ))
    .await
    .unwrap();
    // Wait for the join to be accepted so the pairing actually happened
    loop {
        match raw.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                if let Ok(ServerFrame::Joined { .. }) = serde_json::from_str(&text) {
                    break;
                }
            }
            _ => continue,
        }
    }
    raw.close(None).await.unwrap();

    // Depending on when the close lands relative to the offer relay, this is
    // either the peer-disconnected notice or the failed relay; exactly one of
    // them surfaces
    let err = expect_failure(&mut alice_events).await;
    assert!(matches!(
        err,
        HandshakeError::PeerDisconnected
            | HandshakeError::Rejected(ErrorReason::TargetUnavailable)
    ));

    // Exactly once: nothing further arrives on the event stream
    assert!(
        timeout(Duration::from_millis(300), alice_events.recv())
            .await
            .is_err()
    );

    alice.disconnect().await;
}
