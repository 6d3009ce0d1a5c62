//! Signalling protocol engine
//!
//! The coordinator-side state machine. One engine serves every connected
//! peer; whatever pumps a peer's inbound frames (an in-process link task or
//! a WebSocket connection handler) calls [`SignalingEngine::dispatch`] for
//! each frame and [`SignalingEngine::connection_closed`] when the channel
//! drops. Frames from one peer are dispatched sequentially, which is what
//! preserves per-connection candidate order end to end.

use crate::config::SignalingConfig;
use crate::error::{Result, SignalError};
use crate::link::ClientLink;
use crate::protocol::{
    AnswerParams, CandidateParams, ClientFrame, ClientRequest, ConnectionId, DeclineParams,
    IncomingAnswer, IncomingCandidate, IncomingOffer, OfferAck, OfferParams, PeerId, PeerList,
    RegisterAck, RegisterParams, ServerFrame, ServerNotice, SessionErrorKind, SessionErrorParams,
};
use crate::registry::PeerRegistry;
use crate::session::{Session, SessionState, SessionTable};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Per-connection context owned by whatever pumps a peer's inbound frames
#[derive(Debug)]
pub struct PeerConn {
    /// Registered identity; `None` until `peer.register` succeeds
    pub peer_id: Option<PeerId>,

    /// Outbound queue toward this peer
    pub tx: mpsc::Sender<ServerFrame>,
}

impl PeerConn {
    /// Wrap an outbound queue into a fresh, unregistered connection context
    pub fn new(tx: mpsc::Sender<ServerFrame>) -> Self {
        Self { peer_id: None, tx }
    }
}

/// The coordinator: peer registry + session table + request dispatch
///
/// Cloning is cheap and every clone works against the same shared state,
/// which is how connection handlers and timer tasks hold on to the engine.
#[derive(Clone)]
pub struct SignalingEngine {
    registry: Arc<PeerRegistry>,
    sessions: Arc<SessionTable>,
    config: SignalingConfig,
}

impl SignalingEngine {
    /// Create an engine with the given configuration
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn new(config: SignalingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(PeerRegistry::new()),
            sessions: Arc::new(SessionTable::new()),
            config,
        })
    }

    /// The active peer set
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The in-flight session table
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Engine configuration
    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Open an in-process link for an embedded client facade
    ///
    /// Spawns the per-peer pump task; dropping the returned link's sender
    /// behaves exactly like a transport disconnection.
    pub fn open_local_link(&self) -> ClientLink {
        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (server_tx, server_rx) = mpsc::channel::<ServerFrame>(self.config.channel_capacity);

        let engine = self.clone();
        tokio::spawn(async move {
            let mut conn = PeerConn::new(server_tx);
            while let Some(frame) = client_rx.recv().await {
                engine.dispatch(&mut conn, frame).await;
            }
            engine.connection_closed(&mut conn).await;
        });

        ClientLink {
            tx: client_tx,
            rx: server_rx,
        }
    }

    /// Apply one client frame to coordinator state
    ///
    /// Replies and relayed notices flow through the connection contexts'
    /// outbound queues; this method itself never fails.
    pub async fn dispatch(&self, conn: &mut PeerConn, frame: ClientFrame) {
        match frame.request {
            ClientRequest::Register(params) => self.handle_register(conn, frame.id, params).await,
            ClientRequest::Unregister => self.handle_unregister(conn).await,
            ClientRequest::ListPeers => self.handle_list_peers(conn, frame.id).await,
            ClientRequest::Offer(params) => self.handle_offer(conn, frame.id, params).await,
            ClientRequest::Answer(params) => self.handle_answer(conn, params).await,
            ClientRequest::Candidate(params) => self.handle_candidate(conn, params).await,
            ClientRequest::Decline(params) => self.handle_decline(conn, params).await,
        }
    }

    /// Tear down after the peer's channel dropped without an unregister
    pub async fn connection_closed(&self, conn: &mut PeerConn) {
        if let Some(peer_id) = conn.peer_id.take() {
            debug!("channel closed for registered peer {}", peer_id);
            self.drop_peer(&peer_id).await;
        }
    }

    async fn handle_register(
        &self,
        conn: &mut PeerConn,
        request_id: Option<u64>,
        params: RegisterParams,
    ) {
        if conn.peer_id.is_some() {
            self.reply_err(conn, request_id, &SignalError::AlreadyConnected)
                .await;
            return;
        }

        match self
            .registry
            .register(params.requested_id.as_deref(), conn.tx.clone())
        {
            Ok(peer_id) => {
                conn.peer_id = Some(peer_id.clone());
                self.reply_ok(conn, request_id, &RegisterAck { peer_id }).await;
            }
            Err(err) => self.reply_err(conn, request_id, &err).await,
        }
    }

    async fn handle_unregister(&self, conn: &mut PeerConn) {
        if let Some(peer_id) = conn.peer_id.take() {
            self.drop_peer(&peer_id).await;
        }
    }

    async fn handle_list_peers(&self, conn: &PeerConn, request_id: Option<u64>) {
        if conn.peer_id.is_none() {
            self.reply_err(conn, request_id, &SignalError::NotConnected)
                .await;
            return;
        }

        let peers = self.registry.list_active();
        self.reply_ok(conn, request_id, &PeerList { peers }).await;
    }

    async fn handle_offer(&self, conn: &PeerConn, request_id: Option<u64>, params: OfferParams) {
        let Some(from) = conn.peer_id.clone() else {
            self.reply_err(conn, request_id, &SignalError::NotConnected)
                .await;
            return;
        };

        let Some(target) = self.registry.get(&params.to) else {
            self.reply_err(conn, request_id, &SignalError::UnknownPeer(params.to))
                .await;
            return;
        };

        let connection_id = params.connection_id.clone();
        let session = Session::new(
            connection_id.clone(),
            from.clone(),
            params.to.clone(),
            params.kind,
        );
        if let Err(err) = self.sessions.insert(session) {
            self.reply_err(conn, request_id, &err).await;
            return;
        }
        info!(
            "session {} opened: {} -> {} ({:?})",
            connection_id, from, params.to, params.kind
        );

        // Arm the timer and leave Pending before the offer can reach the
        // target, so an immediate answer never races the transition.
        let timer = self.arm_negotiation_timer(connection_id.clone());
        self.sessions.with_session(&connection_id, |session| {
            let _ = session.advance(SessionState::AwaitingAnswer);
            session.timeout = Some(timer);
        });

        let delivered = target
            .tx
            .send(ServerFrame::notice(ServerNotice::Offer(IncomingOffer {
                connection_id: connection_id.clone(),
                from,
                kind: params.kind,
                description: params.description,
            })))
            .await
            .is_ok();

        if !delivered {
            // Target dropped between the registry lookup and the send.
            self.sessions.remove(&connection_id);
            self.reply_err(conn, request_id, &SignalError::TargetDisconnected)
                .await;
            return;
        }

        self.reply_ok(conn, request_id, &OfferAck { connection_id }).await;
    }

    async fn handle_answer(&self, conn: &PeerConn, params: AnswerParams) {
        let Some(from) = conn.peer_id.clone() else {
            warn!("answer from unregistered connection ignored");
            return;
        };

        enum Outcome {
            Deliver { initiator: PeerId, timer: Option<AbortHandle> },
            Invalid(SessionErrorKind),
        }

        let outcome = self
            .sessions
            .with_session(&params.connection_id, |session| {
                if session.target != from || session.state != SessionState::AwaitingAnswer {
                    return Outcome::Invalid(SessionErrorKind::InvalidState);
                }
                let _ = session.advance(SessionState::Established);
                Outcome::Deliver {
                    initiator: session.initiator.clone(),
                    timer: session.timeout.take(),
                }
            })
            .unwrap_or(Outcome::Invalid(SessionErrorKind::UnknownConnection));

        match outcome {
            Outcome::Deliver { initiator, timer } => {
                if let Some(timer) = timer {
                    timer.abort();
                }
                info!("session {} established", params.connection_id);
                self.notify_peer(
                    &initiator,
                    ServerNotice::Answer(IncomingAnswer {
                        connection_id: params.connection_id,
                        description: params.description,
                    }),
                )
                .await;
            }
            Outcome::Invalid(kind) => {
                self.session_error(conn, &params.connection_id, kind).await;
            }
        }
    }

    async fn handle_candidate(&self, conn: &PeerConn, params: CandidateParams) {
        let Some(from) = conn.peer_id.clone() else {
            warn!("candidate from unregistered connection ignored");
            return;
        };

        let other = self
            .sessions
            .with_session(&params.connection_id, |session| {
                session.other_participant(&from).map(str::to_string)
            })
            .flatten();

        match other {
            Some(other) => {
                self.notify_peer(
                    &other,
                    ServerNotice::Candidate(IncomingCandidate {
                        connection_id: params.connection_id,
                        candidate: params.candidate,
                    }),
                )
                .await;
            }
            None => {
                self.session_error(
                    conn,
                    &params.connection_id,
                    SessionErrorKind::UnknownConnection,
                )
                .await;
            }
        }
    }

    async fn handle_decline(&self, conn: &PeerConn, params: DeclineParams) {
        let Some(from) = conn.peer_id.clone() else {
            warn!("decline from unregistered connection ignored");
            return;
        };

        let valid = self
            .sessions
            .with_session(&params.connection_id, |session| {
                if session.target != from || session.state != SessionState::AwaitingAnswer {
                    return false;
                }
                let _ = session.advance(SessionState::Rejected);
                true
            })
            .unwrap_or(false);

        if !valid {
            self.session_error(
                conn,
                &params.connection_id,
                SessionErrorKind::UnknownConnection,
            )
            .await;
            return;
        }

        let Some(session) = self.sessions.remove(&params.connection_id) else {
            return;
        };
        info!(
            "session {} rejected by target {}",
            params.connection_id, from
        );
        self.notify_peer(
            &session.initiator,
            ServerNotice::SessionError(SessionErrorParams {
                connection_id: params.connection_id,
                kind: SessionErrorKind::Rejected,
            }),
        )
        .await;
    }

    /// Remove the peer and tear down every session it participates in
    async fn drop_peer(&self, peer_id: &str) {
        self.registry.unregister(peer_id);
        for connection_id in self.sessions.sessions_of(peer_id) {
            self.teardown_session(&connection_id, peer_id).await;
        }
    }

    async fn teardown_session(&self, connection_id: &str, leaver: &str) {
        let Some(mut session) = self.sessions.remove(connection_id) else {
            return;
        };

        let to = if session.state == SessionState::Established {
            SessionState::Closed
        } else {
            SessionState::Aborted
        };
        let _ = session.advance(to);
        info!(
            "session {} torn down ({:?}): {} disconnected",
            connection_id, to, leaver
        );

        if let Some(other) = session.other_participant(leaver) {
            self.notify_peer(
                other,
                ServerNotice::SessionError(SessionErrorParams {
                    connection_id: connection_id.to_string(),
                    kind: SessionErrorKind::TargetDisconnected,
                }),
            )
            .await;
        }
    }

    /// Arm the per-session negotiation timer
    fn arm_negotiation_timer(&self, connection_id: ConnectionId) -> AbortHandle {
        let engine = self.clone();
        let deadline = self.config.negotiation_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            engine.negotiation_timed_out(&connection_id).await;
        })
        .abort_handle()
    }

    async fn negotiation_timed_out(&self, connection_id: &str) {
        // The answer may have raced the timer; only fire while still waiting.
        let timed_out = self
            .sessions
            .with_session(connection_id, |session| {
                if session.state == SessionState::AwaitingAnswer {
                    let _ = session.advance(SessionState::TimedOut);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if !timed_out {
            return;
        }

        let Some(session) = self.sessions.remove(connection_id) else {
            return;
        };
        warn!("session {} timed out awaiting answer", connection_id);
        for participant in [&session.initiator, &session.target] {
            self.notify_peer(
                participant,
                ServerNotice::SessionError(SessionErrorParams {
                    connection_id: connection_id.to_string(),
                    kind: SessionErrorKind::Timeout,
                }),
            )
            .await;
        }
    }

    /// Push a notice to a registered peer; a missing or closed peer is fine,
    /// its own teardown will handle the fallout
    async fn notify_peer(&self, peer_id: &str, notice: ServerNotice) {
        if let Some(handle) = self.registry.get(peer_id) {
            if handle.tx.send(ServerFrame::notice(notice)).await.is_err() {
                debug!("dropping notice for closed peer {}", peer_id);
            }
        } else {
            debug!("dropping notice for unknown peer {}", peer_id);
        }
    }

    async fn session_error(&self, conn: &PeerConn, connection_id: &str, kind: SessionErrorKind) {
        let frame = ServerFrame::notice(ServerNotice::SessionError(SessionErrorParams {
            connection_id: connection_id.to_string(),
            kind,
        }));
        if conn.tx.send(frame).await.is_err() {
            debug!("dropping session error for closed connection");
        }
    }

    async fn reply_ok<T: serde::Serialize>(
        &self,
        conn: &PeerConn,
        request_id: Option<u64>,
        result: &T,
    ) {
        let Some(id) = request_id else { return };
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to serialize reply: {}", err);
                return;
            }
        };
        if conn.tx.send(ServerFrame::ok(id, value)).await.is_err() {
            debug!("dropping reply for closed connection");
        }
    }

    async fn reply_err(&self, conn: &PeerConn, request_id: Option<u64>, err: &SignalError) {
        let Some(id) = request_id else { return };
        let frame = ServerFrame::err(Some(id), err.wire_code(), err.to_string());
        if conn.tx.send(frame).await.is_err() {
            debug!("dropping error reply for closed connection");
        }
    }
}

impl std::fmt::Debug for SignalingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingEngine")
            .field("peers", &self.registry.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{error_codes, SessionDescription, SessionKind};

    fn offer_params(connection_id: &str, to: &str) -> OfferParams {
        OfferParams {
            connection_id: connection_id.to_string(),
            to: to.to_string(),
            kind: SessionKind::Call,
            description: SessionDescription::offer("v=0"),
        }
    }

    async fn registered_conn(
        engine: &SignalingEngine,
        requested: &str,
    ) -> (PeerConn, mpsc::Receiver<ServerFrame>) {
        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = PeerConn::new(tx);
        engine
            .dispatch(
                &mut conn,
                ClientFrame::request(
                    1,
                    ClientRequest::Register(RegisterParams {
                        requested_id: Some(requested.to_string()),
                    }),
                ),
            )
            .await;
        // Consume the registration ack.
        let ack = rx.recv().await.unwrap();
        assert!(matches!(ack, ServerFrame::Reply(r) if r.error.is_none()));
        (conn, rx)
    }

    #[tokio::test]
    async fn test_offer_to_unknown_peer_is_refused() {
        let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
        let (mut conn, mut rx) = registered_conn(&engine, "alice").await;

        engine
            .dispatch(
                &mut conn,
                ClientFrame::request(2, ClientRequest::Offer(offer_params("c-1", "ghost"))),
            )
            .await;

        match rx.recv().await.unwrap() {
            ServerFrame::Reply(reply) => {
                assert_eq!(reply.error.unwrap().code, error_codes::PEER_NOT_FOUND);
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(engine.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_offer_creates_awaiting_session_and_delivers() {
        let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
        let (mut alice, mut alice_rx) = registered_conn(&engine, "alice").await;
        let (_bob, mut bob_rx) = registered_conn(&engine, "bob").await;

        engine
            .dispatch(
                &mut alice,
                ClientFrame::request(2, ClientRequest::Offer(offer_params("c-1", "bob"))),
            )
            .await;

        // Bob sees the offer.
        match bob_rx.recv().await.unwrap() {
            ServerFrame::Notice(n) => {
                assert!(matches!(n.notice, ServerNotice::Offer(o) if o.from == "alice"));
            }
            other => panic!("expected offer notice, got {:?}", other),
        }
        // Alice gets the ack after delivery.
        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            ServerFrame::Reply(r) if r.error.is_none()
        ));

        let state = engine
            .sessions()
            .with_session("c-1", |s| s.state)
            .unwrap();
        assert_eq!(state, SessionState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn test_disconnect_cascades_to_sessions() {
        let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
        let (mut alice, mut alice_rx) = registered_conn(&engine, "alice").await;
        let (mut bob, mut bob_rx) = registered_conn(&engine, "bob").await;

        engine
            .dispatch(
                &mut alice,
                ClientFrame::request(2, ClientRequest::Offer(offer_params("c-1", "bob"))),
            )
            .await;
        let _ = bob_rx.recv().await; // offer
        let _ = alice_rx.recv().await; // ack

        engine
            .dispatch(&mut bob, ClientFrame::notification(ClientRequest::Unregister))
            .await;

        match alice_rx.recv().await.unwrap() {
            ServerFrame::Notice(n) => match n.notice {
                ServerNotice::SessionError(p) => {
                    assert_eq!(p.connection_id, "c-1");
                    assert_eq!(p.kind, SessionErrorKind::TargetDisconnected);
                }
                other => panic!("expected session error, got {:?}", other),
            },
            other => panic!("expected notice, got {:?}", other),
        }
        assert!(!engine.sessions().contains("c-1"));
        assert!(!engine.registry().is_active("bob"));
    }
}
