//! Integration tests for the signalling protocol over in-process links
//!
//! Each test stands up one coordinator engine and drives real client
//! facades against it, covering registration, the call/answer round trip,
//! candidate relay ordering, and the disconnect/timeout/decline teardown
//! paths.

use std::sync::{Arc, Mutex};

use switchboard_core::{
    IceCandidate, SdpKind, SessionDescription, SessionErrorKind, SessionKind, SessionState,
    SignalError, SignalingClient, SignalingConfig, SignalingEngine, SignalingEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio_test::assert_ok;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn spawn_client(engine: &SignalingEngine) -> (SignalingClient, mpsc::Receiver<SignalingEvent>) {
    SignalingClient::new(engine.open_local_link(), engine.config().clone())
}

fn candidate(s: &str) -> IceCandidate {
    IceCandidate {
        candidate: s.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

#[tokio::test]
async fn test_connect_assigns_generated_and_requested_ids() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _alice_events) = spawn_client(&engine);
    let (bob, _bob_events) = spawn_client(&engine);

    assert_eq!(alice.connect(None).await.unwrap(), "p-1");
    assert_eq!(bob.connect(Some("B")).await.unwrap(), "B");

    assert!(alice.connected());
    assert_eq!(alice.local_peer_id().as_deref(), Some("p-1"));
    assert_eq!(engine.registry().list_active(), vec!["B", "p-1"]);
}

#[tokio::test]
async fn test_connect_twice_fails() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _events) = spawn_client(&engine);

    assert_ok!(alice.connect(None).await);
    let err = alice.connect(None).await.unwrap_err();
    assert!(matches!(err, SignalError::AlreadyConnected));
}

#[tokio::test]
async fn test_requested_id_collision() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, _b) = spawn_client(&engine);

    alice.connect(Some("dup")).await.unwrap();
    let err = bob.connect(Some("dup")).await.unwrap_err();
    assert!(matches!(err, SignalError::PeerIdTaken(_)));
    assert!(!bob.connected());

    // The loser can retry with a different id.
    assert_ok!(bob.connect(Some("dup-2")).await);
}

#[tokio::test]
async fn test_operations_require_connection() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _events) = spawn_client(&engine);

    let err = alice.get_active_peers().await.unwrap_err();
    assert!(matches!(err, SignalError::NotConnected));

    let err = alice
        .call("B", SessionDescription::offer("v=0"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::NotConnected));

    let err = alice.send_candidate("c-0", candidate("cand")).unwrap_err();
    assert!(matches!(err, SignalError::NotConnected));
}

#[tokio::test]
async fn test_get_active_peers_snapshot_is_sorted() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, _b) = spawn_client(&engine);
    let (carol, _c) = spawn_client(&engine);

    alice.connect(Some("zeta")).await.unwrap();
    bob.connect(Some("alpha")).await.unwrap();
    carol.connect(Some("mid")).await.unwrap();

    let peers = alice.get_active_peers().await.unwrap();
    assert_eq!(peers, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn test_call_answer_round_trip() {
    init_logging();
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _alice_events) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    assert_eq!(alice.connect(None).await.unwrap(), "p-1");
    bob.connect(Some("B")).await.unwrap();

    // Bob answers the first offer he sees.
    let bob_task = tokio::spawn(async move {
        let connection_id = match bob_events.recv().await.unwrap() {
            SignalingEvent::IncomingOffer {
                connection_id,
                from,
                kind,
                description,
            } => {
                assert_eq!(from, "p-1");
                assert_eq!(kind, SessionKind::Call);
                assert_eq!(description.kind, SdpKind::Offer);
                assert_eq!(description.sdp, "offer-sdp");
                connection_id
            }
            other => panic!("expected incoming offer, got {:?}", other),
        };
        bob.answer(&connection_id, SessionDescription::answer("answer-sdp"))
            .unwrap();
        (bob, connection_id)
    });

    let consumer_seen = Arc::new(Mutex::new(None::<String>));
    let seen = Arc::clone(&consumer_seen);
    let answer = alice
        .call("B", SessionDescription::offer("offer-sdp"), move |id| {
            *seen.lock().unwrap() = Some(id);
        })
        .await
        .unwrap();

    assert_eq!(answer.kind, SdpKind::Answer);
    assert_eq!(answer.sdp, "answer-sdp");

    let (_bob, connection_id) = bob_task.await.unwrap();
    // The consumer saw the same id the target received, before the result.
    assert_eq!(
        consumer_seen.lock().unwrap().as_deref(),
        Some(connection_id.as_str())
    );

    let state = engine
        .sessions()
        .with_session(&connection_id, |s| s.state)
        .unwrap();
    assert_eq!(state, SessionState::Established);
}

#[tokio::test]
async fn test_exchange_data_is_distinguishable() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    let bob_task = tokio::spawn(async move {
        match bob_events.recv().await.unwrap() {
            SignalingEvent::IncomingOffer {
                connection_id,
                kind,
                ..
            } => {
                assert_eq!(kind, SessionKind::ExchangeData);
                bob.answer(&connection_id, SessionDescription::answer("dc-answer"))
                    .unwrap();
            }
            other => panic!("expected incoming offer, got {:?}", other),
        }
        bob
    });

    let answer = alice
        .exchange_data("B", SessionDescription::offer("dc-offer"), |_| {})
        .await
        .unwrap();
    assert_eq!(answer.sdp, "dc-answer");
    bob_task.await.unwrap();
}

#[tokio::test]
async fn test_call_to_unknown_peer() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _events) = spawn_client(&engine);
    alice.connect(None).await.unwrap();

    let mut consumer_ran = false;
    let err = alice
        .call("nobody", SessionDescription::offer("v=0"), |_| {
            consumer_ran = true;
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SignalError::UnknownPeer(_)));
    // The id was still handed out before the refusal came back.
    assert!(consumer_ran);
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_answer_preconditions() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);
    let (carol, _c) = spawn_client(&engine);

    let alice = Arc::new(alice);
    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();
    carol.connect(Some("C")).await.unwrap();

    let (id_tx, id_rx) = oneshot::channel();
    let caller = Arc::clone(&alice);
    let call_task = tokio::spawn(async move {
        caller
            .call("B", SessionDescription::offer("v=0"), move |id| {
                let _ = id_tx.send(id);
            })
            .await
    });
    let connection_id = id_rx.await.unwrap();

    // A peer that never saw the offer knows nothing about the session.
    let err = carol
        .answer(&connection_id, SessionDescription::answer("x"))
        .unwrap_err();
    assert!(matches!(err, SignalError::UnknownConnection(_)));

    // The initiator cannot answer its own offer.
    let err = alice
        .answer(&connection_id, SessionDescription::answer("x"))
        .unwrap_err();
    assert!(matches!(err, SignalError::InvalidState(_)));

    // The target answers once; a second answer is a state error.
    match bob_events.recv().await.unwrap() {
        SignalingEvent::IncomingOffer { connection_id, .. } => {
            bob.answer(&connection_id, SessionDescription::answer("a"))
                .unwrap();
            let err = bob
                .answer(&connection_id, SessionDescription::answer("b"))
                .unwrap_err();
            assert!(matches!(err, SignalError::InvalidState(_)));
        }
        other => panic!("expected incoming offer, got {:?}", other),
    }

    assert_eq!(call_task.await.unwrap().unwrap().sdp, "a");
}

#[tokio::test]
async fn test_target_disconnect_aborts_pending_call() {
    init_logging();
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    // Bob sees the offer and walks away instead of answering.
    let bob_task = tokio::spawn(async move {
        match bob_events.recv().await.unwrap() {
            SignalingEvent::IncomingOffer { .. } => bob.disconnect(),
            other => panic!("expected incoming offer, got {:?}", other),
        }
        bob
    });

    let err = alice
        .call("B", SessionDescription::offer("v=0"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::TargetDisconnected));

    bob_task.await.unwrap();
    assert!(engine.sessions().is_empty());
    assert!(!engine.registry().is_active("B"));
}

#[tokio::test]
async fn test_candidates_preserve_order() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    let (id_tx, id_rx) = oneshot::channel();
    let alice = Arc::new(alice);
    let caller = Arc::clone(&alice);
    let call_task = tokio::spawn(async move {
        caller
            .call("B", SessionDescription::offer("v=0"), move |id| {
                let _ = id_tx.send(id);
            })
            .await
    });
    let connection_id = id_rx.await.unwrap();

    // Candidates go out while the offer is still unanswered.
    alice.send_candidate(&connection_id, candidate("c1")).unwrap();
    alice.send_candidate(&connection_id, candidate("c2")).unwrap();

    match bob_events.recv().await.unwrap() {
        SignalingEvent::IncomingOffer { connection_id, .. } => {
            for expected in ["c1", "c2"] {
                match bob_events.recv().await.unwrap() {
                    SignalingEvent::IncomingCandidate { candidate, .. } => {
                        assert_eq!(candidate.candidate, expected);
                    }
                    other => panic!("expected candidate, got {:?}", other),
                }
            }
            bob.answer(&connection_id, SessionDescription::answer("a"))
                .unwrap();
        }
        other => panic!("expected incoming offer, got {:?}", other),
    }

    assert_ok!(call_task.await.unwrap());
}

#[tokio::test]
async fn test_candidate_after_session_closed() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, mut alice_events) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    let bob_task = tokio::spawn(async move {
        match bob_events.recv().await.unwrap() {
            SignalingEvent::IncomingOffer { connection_id, .. } => {
                bob.answer(&connection_id, SessionDescription::answer("a"))
                    .unwrap();
            }
            other => panic!("expected incoming offer, got {:?}", other),
        }
        bob
    });

    let mut seen_id = None;
    let seen = &mut seen_id;
    alice
        .call("B", SessionDescription::offer("v=0"), |id| {
            *seen = Some(id);
        })
        .await
        .unwrap();
    let connection_id = seen_id.unwrap();

    // Established; now the target drops and the session closes.
    let bob = bob_task.await.unwrap();
    bob.disconnect();

    match alice_events.recv().await.unwrap() {
        SignalingEvent::SessionEnded {
            connection_id: ended,
            reason,
        } => {
            assert_eq!(ended, connection_id);
            assert_eq!(reason, SessionErrorKind::TargetDisconnected);
        }
        other => panic!("expected session end, got {:?}", other),
    }

    let err = alice
        .send_candidate(&connection_id, candidate("late"))
        .unwrap_err();
    assert!(matches!(err, SignalError::UnknownConnection(_)));
    assert!(engine.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_timeout() {
    let config = SignalingConfig {
        negotiation_timeout_secs: 1,
        ..Default::default()
    };
    let engine = SignalingEngine::new(config).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    // Bob receives the offer but never answers.
    let err = alice
        .call("B", SessionDescription::offer("v=0"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::Timeout));

    // The target is told the session is gone.
    let _offer = bob_events.recv().await.unwrap();
    match bob_events.recv().await.unwrap() {
        SignalingEvent::SessionEnded { reason, .. } => {
            assert_eq!(reason, SessionErrorKind::Timeout);
        }
        other => panic!("expected session end, got {:?}", other),
    }
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_decline_resolves_initiator() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, mut bob_events) = spawn_client(&engine);

    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    let bob_task = tokio::spawn(async move {
        match bob_events.recv().await.unwrap() {
            SignalingEvent::IncomingOffer { connection_id, .. } => {
                bob.decline(&connection_id).unwrap();
                // Declining tears down the local view as well.
                let err = bob
                    .send_candidate(&connection_id, candidate("c"))
                    .unwrap_err();
                assert!(matches!(err, SignalError::UnknownConnection(_)));
            }
            other => panic!("expected incoming offer, got {:?}", other),
        }
        bob
    });

    let err = alice
        .call("B", SessionDescription::offer("v=0"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::TargetDisconnected));

    bob_task.await.unwrap();
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_disconnect_releases_pending_call() {
    let engine = SignalingEngine::new(SignalingConfig::default()).unwrap();
    let (alice, _a) = spawn_client(&engine);
    let (bob, _bob_events) = spawn_client(&engine);

    let alice = Arc::new(alice);
    alice.connect(None).await.unwrap();
    bob.connect(Some("B")).await.unwrap();

    let (id_tx, id_rx) = oneshot::channel();
    let caller = Arc::clone(&alice);
    let call_task = tokio::spawn(async move {
        caller
            .call("B", SessionDescription::offer("v=0"), move |id| {
                let _ = id_tx.send(id);
            })
            .await
    });
    // Wait until the call is in flight, then hang up locally.
    let _connection_id = id_rx.await.unwrap();
    alice.disconnect();

    let err = call_task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SignalError::Disconnected | SignalError::TargetDisconnected
    ));
    assert!(!alice.connected());

    // The unregister notification drains asynchronously.
    while engine.registry().is_active("p-1") {
        tokio::task::yield_now().await;
    }

    // The coordinator stays available to everyone else.
    assert!(engine.registry().is_active("B"));
    assert_eq!(bob.get_active_peers().await.unwrap(), vec!["B"]);
}
