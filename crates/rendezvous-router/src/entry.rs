//! Rendezvous entry: one home, at most one current peer
//!
//! The peer slot is the only mutable state. Three operations need to be atomic
//! with respect to `attach`:
//! - home → peer: the chunk is queued to the peer that is current when the
//!   chunk is committed, re-read per chunk
//! - peer → home: the chunk is queued only if the sender is still current
//! - peer close: the slot is cleared only if it still holds that peer
//!
//! Each of them reserves queue space first (which may wait), then re-checks
//! the slot under the lock and commits without awaiting.

use crate::{RelayStats, RendezvousError};
use bytes::Bytes;
use rendezvous_connection::{ConnectionHandle, ConnectionId};
use rendezvous_proto::Identifier;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Pairing state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Home only
    Unpaired,
    /// Home plus the given current peer
    Paired(ConnectionId),
    /// Home connection is gone
    Destroyed,
}

/// Outcome of forwarding a home chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeDelivery {
    /// Queued to this peer
    Delivered(ConnectionId),
    /// No peer attached; the chunk was dropped
    NoTarget,
    /// The current peer's writer is gone; it has been detached
    PeerClosed(ConnectionId),
}

#[derive(Debug, Default)]
struct PeerSlot {
    peer: Option<ConnectionHandle>,
    /// Peers replaced by a later attach that have not disconnected yet
    superseded: Vec<ConnectionId>,
    destroyed: bool,
}

/// Pairing record owned by the [`Registry`](crate::Registry)
#[derive(Debug)]
pub struct Entry {
    id: Identifier,
    home: ConnectionHandle,
    slot: Mutex<PeerSlot>,
    peer_changed: Notify,
    stats: Arc<RelayStats>,
}

impl Entry {
    pub(crate) fn new(id: Identifier, home: ConnectionHandle, stats: Arc<RelayStats>) -> Self {
        Self {
            id,
            home,
            slot: Mutex::new(PeerSlot::default()),
            peer_changed: Notify::new(),
            stats,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn home(&self) -> &ConnectionHandle {
        &self.home
    }

    pub fn state(&self) -> EntryState {
        let slot = self.lock_slot();
        if slot.destroyed {
            return EntryState::Destroyed;
        }
        match slot.peer {
            Some(ref peer) => EntryState::Paired(peer.id()),
            None => EntryState::Unpaired,
        }
    }

    pub fn current_peer(&self) -> Option<ConnectionHandle> {
        self.lock_slot().peer.clone()
    }

    /// Install `peer` as the current peer, returning the one it supersedes
    ///
    /// The superseded peer is not closed here; it is rejected the next time
    /// it sends data.
    pub(crate) fn set_peer(&self, peer: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = {
            let mut slot = self.lock_slot();
            let previous = slot.peer.replace(peer);
            if let Some(ref previous) = previous {
                slot.superseded.push(previous.id());
            }
            previous
        };
        self.peer_changed.notify_waiters();
        previous
    }

    /// Clear the slot if it still holds `peer`
    ///
    /// Called when a peer disconnects. A stale peer closing never detaches
    /// the peer that replaced it.
    pub fn detach(&self, peer: ConnectionId) -> bool {
        let detached = {
            let mut slot = self.lock_slot();
            if Self::holds(&slot, peer) {
                slot.peer = None;
                true
            } else {
                slot.superseded.retain(|stale| *stale != peer);
                false
            }
        };
        if detached {
            debug!("Peer {} detached from server {}", peer, self.id);
            self.peer_changed.notify_waiters();
        }
        detached
    }

    /// Mark the entry destroyed and hand back its current peer, if any
    pub(crate) fn destroy(&self) -> Option<ConnectionHandle> {
        let peer = {
            let mut slot = self.lock_slot();
            slot.destroyed = true;
            slot.superseded.clear();
            slot.peer.take()
        };
        self.peer_changed.notify_waiters();
        peer
    }

    /// Forward a chunk received on the home connection
    ///
    /// Never fails: with no peer attached the chunk is dropped and counted.
    /// If the peer is replaced while this call waits for queue space, the
    /// chunk goes to the replacement instead.
    pub async fn forward_from_home(&self, data: Bytes) -> HomeDelivery {
        loop {
            let changed = self.peer_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let peer = match self.current_peer() {
                Some(peer) => peer,
                None => {
                    self.stats.record_no_target(data.len());
                    debug!(
                        "Data received from server {} without a target ({} bytes dropped)",
                        self.id,
                        data.len()
                    );
                    return HomeDelivery::NoTarget;
                }
            };

            tokio::select! {
                permit = peer.reserve() => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.detach(peer.id());
                            return HomeDelivery::PeerClosed(peer.id());
                        }
                    };

                    let delivered = {
                        let slot = self.lock_slot();
                        if Self::holds(&slot, peer.id()) {
                            permit.send(data.clone());
                            true
                        } else {
                            false
                        }
                    };

                    if delivered {
                        self.stats.record_home_bytes(data.len());
                        return HomeDelivery::Delivered(peer.id());
                    }
                }
                _ = changed.as_mut() => {
                    debug!("Peer of server {} changed while forwarding, retrying", self.id);
                }
            }
        }
    }

    /// Forward a chunk received on a peer connection
    ///
    /// Fails with [`RendezvousError::Stolen`] when a later attach replaced
    /// `peer`, or [`RendezvousError::Detached`] when it was dropped from the
    /// slot without a replacement. None of its bytes are forwarded then.
    pub async fn forward_from_peer(
        &self,
        peer: ConnectionId,
        data: Bytes,
    ) -> Result<(), RendezvousError> {
        self.check_current(peer)?;

        let permit = self
            .home
            .reserve()
            .await
            .map_err(|_| RendezvousError::HomeClosed(self.id))?;

        let forwarded = {
            let slot = self.lock_slot();
            if Self::holds(&slot, peer) {
                permit.send(data.clone());
                true
            } else {
                false
            }
        };

        if !forwarded {
            return self.check_current(peer);
        }

        self.stats.record_peer_bytes(data.len());
        Ok(())
    }

    fn check_current(&self, peer: ConnectionId) -> Result<(), RendezvousError> {
        let slot = self.lock_slot();
        if slot.destroyed {
            return Err(RendezvousError::HomeClosed(self.id));
        }
        if Self::holds(&slot, peer) {
            return Ok(());
        }
        let superseded = slot.superseded.contains(&peer);
        drop(slot);

        if !superseded {
            return Err(RendezvousError::Detached { id: self.id, peer });
        }

        self.stats.record_stolen();
        info!("Peer {} lost server {} to another client", peer, self.id);
        Err(RendezvousError::Stolen { id: self.id, peer })
    }

    fn holds(slot: &PeerSlot, peer: ConnectionId) -> bool {
        slot.peer.as_ref().is_some_and(|current| current.id() == peer)
    }

    fn lock_slot(&self) -> MutexGuard<'_, PeerSlot> {
        // Slot updates cannot leave it half-written, so a poisoned lock is still usable
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
