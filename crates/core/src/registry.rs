//! Connected-peer registry
//!
//! Tracks which peer identities currently hold a connection to the
//! coordinator, together with the outbound frame queue used to reach each
//! one. Entries are sharded by peer id, so registration traffic for
//! unrelated peers never serializes.

use crate::error::{Result, SignalError};
use crate::protocol::{PeerId, ServerFrame};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Handle to one registered peer
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Peer identity
    pub peer_id: PeerId,

    /// Outbound queue toward this peer's facade
    pub tx: mpsc::Sender<ServerFrame>,

    /// When the peer registered
    pub registered_at: Instant,
}

/// The active peer set
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerHandle>,
    next_generated: AtomicU64,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the active set
    ///
    /// When `requested` is absent a fresh `p-<n>` id is generated, skipping
    /// ids currently taken. Insertion goes through the map's entry API, so
    /// two concurrent registrations of the same id cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::PeerIdTaken`] if the requested id is held by
    /// a connected peer.
    pub fn register(
        &self,
        requested: Option<&str>,
        tx: mpsc::Sender<ServerFrame>,
    ) -> Result<PeerId> {
        if let Some(id) = requested {
            return match self.peers.entry(id.to_string()) {
                Entry::Occupied(_) => Err(SignalError::PeerIdTaken(id.to_string())),
                Entry::Vacant(slot) => {
                    slot.insert(PeerHandle {
                        peer_id: id.to_string(),
                        tx,
                        registered_at: Instant::now(),
                    });
                    info!("peer registered: {}", id);
                    Ok(id.to_string())
                }
            };
        }

        loop {
            let n = self.next_generated.fetch_add(1, Ordering::Relaxed) + 1;
            let id = format!("p-{}", n);
            match self.peers.entry(id.clone()) {
                // A peer requested this exact id earlier; try the next one.
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(PeerHandle {
                        peer_id: id.clone(),
                        tx,
                        registered_at: Instant::now(),
                    });
                    info!("peer registered with generated id: {}", id);
                    return Ok(id);
                }
            }
        }
    }

    /// Remove a peer from the active set; idempotent
    ///
    /// Returns whether the peer was present. Cascading session teardown is
    /// the engine's job, not the registry's.
    pub fn unregister(&self, peer_id: &str) -> bool {
        let removed = self.peers.remove(peer_id).is_some();
        if removed {
            info!("peer unregistered: {}", peer_id);
        } else {
            debug!("unregister for unknown peer ignored: {}", peer_id);
        }
        removed
    }

    /// Whether the peer is currently connected
    pub fn is_active(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Look up a peer's handle
    pub fn get(&self, peer_id: &str) -> Option<PeerHandle> {
        self.peers.get(peer_id).map(|entry| entry.value().clone())
    }

    /// Sorted snapshot of the active peer set
    pub fn list_active(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is connected
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
