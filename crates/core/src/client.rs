//! Client facade: the per-peer signalling API
//!
//! Wraps one [`ClientLink`] and exposes the operations an application peer
//! drives: `connect`, `disconnect`, `call`, `exchange_data`, `answer`,
//! `send_candidate`, `decline`, `get_active_peers`. Suspending operations
//! park on one-shot channels keyed by request id or connection id; inbound
//! offers and candidates surface on the event stream handed out at
//! construction.

use crate::config::SignalingConfig;
use crate::error::{Result, SignalError};
use crate::link::ClientLink;
use crate::protocol::{
    new_connection_id, AnswerParams, CandidateParams, ClientFrame, ClientRequest, ConnectionId,
    DeclineParams, IceCandidate, OfferParams, PeerId, PeerList, RegisterAck, RegisterParams,
    ReplyFrame, ServerFrame, ServerNotice, SessionDescription, SessionErrorKind, SessionKind,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Inbound traffic surfaced to the application
#[derive(Debug)]
pub enum SignalingEvent {
    /// Another peer opened a negotiation toward this peer
    IncomingOffer {
        /// Session the offer opened
        connection_id: ConnectionId,
        /// Initiating peer
        from: PeerId,
        /// Call or raw data exchange
        kind: SessionKind,
        /// Offer payload
        description: SessionDescription,
    },

    /// The other participant of a session sent a connectivity candidate
    IncomingCandidate {
        /// Session the candidate belongs to
        connection_id: ConnectionId,
        /// Candidate payload
        candidate: IceCandidate,
    },

    /// A session this peer participates in ended without a local await
    SessionEnded {
        /// Affected session
        connection_id: ConnectionId,
        /// Terminal reason
        reason: SessionErrorKind,
    },
}

/// Which side of a session this facade is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionRole {
    Initiator,
    Target,
}

/// Facade-local view of one session, used for synchronous precondition
/// checks without a round trip
#[derive(Debug)]
struct SessionView {
    role: SessionRole,
    answered: bool,
}

#[derive(Debug)]
struct Shared {
    /// `Some(peer_id)` while connected
    identity: Mutex<Option<PeerId>>,

    /// Correlated request waiters, keyed by request id
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value>>>>,

    /// Suspended `call`/`exchange_data` waiters, keyed by connection id
    calls: Mutex<HashMap<ConnectionId, oneshot::Sender<Result<SessionDescription>>>>,

    /// Local session views, kept until the session ends
    views: Mutex<HashMap<ConnectionId, SessionView>>,

    next_request_id: AtomicU64,
    tx: mpsc::UnboundedSender<ClientFrame>,
    events: mpsc::Sender<SignalingEvent>,
}

impl Shared {
    /// Release every pending await and session view with the given errors;
    /// resolving an already-resolved waiter is a no-op
    fn release_all(&self, err: fn() -> SignalError) {
        for (_, waiter) in self.pending.lock().drain() {
            let _ = waiter.send(Err(err()));
        }
        for (_, waiter) in self.calls.lock().drain() {
            let _ = waiter.send(Err(err()));
        }
        self.views.lock().clear();
    }
}

/// Per-peer handle to the signalling layer
#[derive(Debug)]
pub struct SignalingClient {
    shared: Arc<Shared>,
    config: SignalingConfig,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Build a facade on top of a link and hand back the event stream
    pub fn new(link: ClientLink, config: SignalingConfig) -> (Self, mpsc::Receiver<SignalingEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let shared = Arc::new(Shared {
            identity: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
            tx: link.tx,
            events: events_tx,
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), link.rx));
        (
            Self {
                shared,
                config,
                reader,
            },
            events_rx,
        )
    }

    /// Register with the coordinator and suspend until it acknowledges
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` when invoked on a connected facade, `PeerIdTaken`
    /// when the requested id collides, `CoordinatorUnreachable` when no ack
    /// arrives within the connect timeout.
    pub async fn connect(&self, requested_id: Option<&str>) -> Result<PeerId> {
        if self.connected() {
            return Err(SignalError::AlreadyConnected);
        }

        let value = self
            .request(ClientRequest::Register(RegisterParams {
                requested_id: requested_id.map(str::to_string),
            }))
            .await?;
        let ack: RegisterAck = serde_json::from_value(value)
            .map_err(|e| SignalError::Protocol(format!("malformed register ack: {}", e)))?;

        *self.shared.identity.lock() = Some(ack.peer_id.clone());
        debug!("connected as {}", ack.peer_id);
        Ok(ack.peer_id)
    }

    /// Leave the coordinator; never fails
    ///
    /// Sends an unregister notification if currently connected, then
    /// releases every pending await with `Disconnected` and drops all
    /// local session views.
    pub fn disconnect(&self) {
        let was_connected = self.shared.identity.lock().take().is_some();
        if was_connected {
            let _ = self
                .shared
                .tx
                .send(ClientFrame::notification(ClientRequest::Unregister));
        }
        self.shared.release_all(|| SignalError::Disconnected);
    }

    /// Whether this facade currently holds a registration
    pub fn connected(&self) -> bool {
        self.shared.identity.lock().is_some()
    }

    /// Identity assigned at `connect`, while connected
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.shared.identity.lock().clone()
    }

    /// Sorted snapshot of the active peer set
    pub async fn get_active_peers(&self) -> Result<Vec<PeerId>> {
        self.ensure_connected()?;
        let value = self.request(ClientRequest::ListPeers).await?;
        let list: PeerList = serde_json::from_value(value)
            .map_err(|e| SignalError::Protocol(format!("malformed peer list: {}", e)))?;
        Ok(list.peers)
    }

    /// Open an audio/video call toward `peer` and suspend until the answer
    ///
    /// `consumer` receives the freshly allocated connection id exactly
    /// once, before the offer leaves this facade.
    pub async fn call(
        &self,
        peer: &str,
        description: SessionDescription,
        consumer: impl FnOnce(ConnectionId),
    ) -> Result<SessionDescription> {
        self.open_session(peer, description, SessionKind::Call, consumer)
            .await
    }

    /// Open a raw data exchange toward `peer`; contract identical to
    /// [`call`](Self::call), only the session kind differs
    pub async fn exchange_data(
        &self,
        peer: &str,
        description: SessionDescription,
        consumer: impl FnOnce(ConnectionId),
    ) -> Result<SessionDescription> {
        self.open_session(peer, description, SessionKind::ExchangeData, consumer)
            .await
    }

    /// Answer an offer previously surfaced as an `IncomingOffer` event
    ///
    /// One-way; precondition failures are detected locally.
    pub fn answer(&self, connection_id: &str, description: SessionDescription) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut views = self.shared.views.lock();
            let view = views
                .get_mut(connection_id)
                .ok_or_else(|| SignalError::UnknownConnection(connection_id.to_string()))?;
            if view.role != SessionRole::Target {
                return Err(SignalError::InvalidState(format!(
                    "{}: not the target of this session",
                    connection_id
                )));
            }
            if view.answered {
                return Err(SignalError::InvalidState(format!(
                    "{}: already answered",
                    connection_id
                )));
            }
            view.answered = true;
        }

        self.send(ClientFrame::notification(ClientRequest::Answer(
            AnswerParams {
                connection_id: connection_id.to_string(),
                description,
            },
        )))
    }

    /// Refuse an offer previously surfaced as an `IncomingOffer` event
    ///
    /// The initiator's suspended call resolves with `TargetDisconnected`;
    /// the protocol reserves a richer rejection signal but does not define
    /// one yet.
    pub fn decline(&self, connection_id: &str) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut views = self.shared.views.lock();
            let declinable = match views.get(connection_id) {
                None => {
                    return Err(SignalError::UnknownConnection(connection_id.to_string()))
                }
                Some(view) => view.role == SessionRole::Target && !view.answered,
            };
            if !declinable {
                return Err(SignalError::InvalidState(format!(
                    "{}: cannot decline",
                    connection_id
                )));
            }
            views.remove(connection_id);
        }

        self.send(ClientFrame::notification(ClientRequest::Decline(
            DeclineParams {
                connection_id: connection_id.to_string(),
            },
        )))
    }

    /// Relay one connectivity candidate to the other participant
    ///
    /// One-way, unacknowledged; relative order of candidates on the same
    /// connection is preserved at the receiver.
    pub fn send_candidate(&self, connection_id: &str, candidate: IceCandidate) -> Result<()> {
        self.ensure_connected()?;
        if !self.shared.views.lock().contains_key(connection_id) {
            return Err(SignalError::UnknownConnection(connection_id.to_string()));
        }

        self.send(ClientFrame::notification(ClientRequest::Candidate(
            CandidateParams {
                connection_id: connection_id.to_string(),
                candidate,
            },
        )))
    }

    async fn open_session(
        &self,
        peer: &str,
        description: SessionDescription,
        kind: SessionKind,
        consumer: impl FnOnce(ConnectionId),
    ) -> Result<SessionDescription> {
        self.ensure_connected()?;

        let connection_id = new_connection_id();

        // Park the waiter and record the view before anything can resolve
        // them, then hand the id to the caller ahead of the offer itself.
        let (done_tx, done_rx) = oneshot::channel();
        self.shared
            .calls
            .lock()
            .insert(connection_id.clone(), done_tx);
        self.shared.views.lock().insert(
            connection_id.clone(),
            SessionView {
                role: SessionRole::Initiator,
                answered: false,
            },
        );
        consumer(connection_id.clone());

        let offered = self
            .request(ClientRequest::Offer(OfferParams {
                connection_id: connection_id.clone(),
                to: peer.to_string(),
                kind,
                description,
            }))
            .await;
        if let Err(err) = offered {
            self.shared.calls.lock().remove(&connection_id);
            self.shared.views.lock().remove(&connection_id);
            return Err(err);
        }

        match done_rx.await {
            Ok(result) => result,
            // Reader task gone: the channel to the coordinator is dead.
            Err(_) => Err(SignalError::CoordinatorUnreachable),
        }
    }

    /// Send a correlated request and await its reply
    async fn request(&self, request: ClientRequest) -> Result<serde_json::Value> {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, reply_tx);

        if self.shared.tx.send(ClientFrame::request(id, request)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(SignalError::CoordinatorUnreachable);
        }

        match tokio::time::timeout(self.config.connect_timeout(), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SignalError::CoordinatorUnreachable),
            Err(_elapsed) => {
                self.shared.pending.lock().remove(&id);
                Err(SignalError::CoordinatorUnreachable)
            }
        }
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        self.shared
            .tx
            .send(frame)
            .map_err(|_| SignalError::ChannelClosed)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected() {
            Ok(())
        } else {
            Err(SignalError::NotConnected)
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            ServerFrame::Reply(reply) => handle_reply(&shared, reply),
            ServerFrame::Notice(frame) => handle_notice(&shared, frame.notice).await,
        }
    }
    // Coordinator gone: fail everything still suspended.
    debug!("signalling channel closed by coordinator");
    *shared.identity.lock() = None;
    shared.release_all(|| SignalError::CoordinatorUnreachable);
}

fn handle_reply(shared: &Shared, reply: ReplyFrame) {
    let Some(id) = reply.id else {
        warn!("dropping reply without request id");
        return;
    };
    let Some(waiter) = shared.pending.lock().remove(&id) else {
        // Timed out or released; late replies are not a fault.
        debug!("dropping reply for request {} with no waiter", id);
        return;
    };
    let result = match (reply.result, reply.error) {
        (Some(value), None) => Ok(value),
        (_, Some(err)) => Err(SignalError::from_wire(err.code, err.message)),
        (None, None) => Err(SignalError::Protocol(
            "reply carries neither result nor error".to_string(),
        )),
    };
    let _ = waiter.send(result);
}

async fn handle_notice(shared: &Arc<Shared>, notice: ServerNotice) {
    match notice {
        ServerNotice::Offer(offer) => {
            shared.views.lock().insert(
                offer.connection_id.clone(),
                SessionView {
                    role: SessionRole::Target,
                    answered: false,
                },
            );
            let event = SignalingEvent::IncomingOffer {
                connection_id: offer.connection_id,
                from: offer.from,
                kind: offer.kind,
                description: offer.description,
            };
            if shared.events.send(event).await.is_err() {
                warn!("event stream dropped; incoming offer lost");
            }
        }
        ServerNotice::Answer(answer) => {
            if let Some(view) = shared.views.lock().get_mut(&answer.connection_id) {
                view.answered = true;
            }
            if let Some(waiter) = shared.calls.lock().remove(&answer.connection_id) {
                let _ = waiter.send(Ok(answer.description));
            } else {
                debug!(
                    "dropping answer for {} with no suspended call",
                    answer.connection_id
                );
            }
        }
        ServerNotice::Candidate(candidate) => {
            let event = SignalingEvent::IncomingCandidate {
                connection_id: candidate.connection_id,
                candidate: candidate.candidate,
            };
            if shared.events.send(event).await.is_err() {
                warn!("event stream dropped; candidate lost");
            }
        }
        ServerNotice::SessionError(params) => {
            let had_view = shared.views.lock().remove(&params.connection_id).is_some();
            let waiter = shared.calls.lock().remove(&params.connection_id);
            if let Some(waiter) = waiter {
                let err = match params.kind {
                    SessionErrorKind::Timeout => SignalError::Timeout,
                    // An explicit rejection resolves like a disconnection
                    // until the protocol defines a richer signal.
                    SessionErrorKind::TargetDisconnected | SessionErrorKind::Rejected => {
                        SignalError::TargetDisconnected
                    }
                    SessionErrorKind::UnknownConnection => {
                        SignalError::UnknownConnection(params.connection_id.clone())
                    }
                    SessionErrorKind::InvalidState => {
                        SignalError::InvalidState(params.connection_id.clone())
                    }
                };
                let _ = waiter.send(Err(err));
            } else if had_view {
                let event = SignalingEvent::SessionEnded {
                    connection_id: params.connection_id,
                    reason: params.kind,
                };
                if shared.events.send(event).await.is_err() {
                    debug!("event stream dropped; session end unnoticed");
                }
            }
        }
    }
}
