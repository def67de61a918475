//! Registry of live rendezvous entries
//!
//! Owns every [`Entry`] from home registration until the home disconnects.
//! Constructed once at startup, shared by both listeners as
//! `Arc<Registry>`, and drained at shutdown.

use crate::{AllocatorConfig, Entry, IdAllocator, RelayStats, RendezvousError, StatsSnapshot};
use dashmap::DashMap;
use rendezvous_connection::ConnectionHandle;
use rendezvous_proto::Identifier;
use std::sync::Arc;
use tracing::{debug, info};

/// Identifier → entry map with collision-free registration
pub struct Registry {
    entries: DashMap<Identifier, Arc<Entry>>,
    allocator: IdAllocator,
    stats: Arc<RelayStats>,
}

impl Registry {
    pub fn new(config: AllocatorConfig) -> Result<Self, RendezvousError> {
        Ok(Self::with_allocator(IdAllocator::new(config)?))
    }

    pub fn with_allocator(allocator: IdAllocator) -> Self {
        Self {
            entries: DashMap::new(),
            allocator,
            stats: Arc::new(RelayStats::new()),
        }
    }

    /// Register a home connection and return its identifier
    ///
    /// The caller is responsible for telling the home which identifier it got.
    pub fn register(&self, home: ConnectionHandle) -> Result<Identifier, RendezvousError> {
        self.register_entry(home).map(|entry| entry.id())
    }

    /// Register a home connection and return its new entry
    pub fn register_entry(&self, home: ConnectionHandle) -> Result<Arc<Entry>, RendezvousError> {
        let home_id = home.id();
        let stats = self.stats.clone();
        let entry = self
            .allocator
            .claim(&self.entries, |id| Arc::new(Entry::new(id, home, stats)))?;

        self.stats.record_registered();
        info!("New server {} registered ({})", entry.id(), home_id);
        Ok(entry)
    }

    /// Make `peer` the current peer of server `id`
    ///
    /// Any previous peer is superseded but left open; it is rejected on its
    /// next write. Never creates an entry.
    pub fn attach(&self, id: Identifier, peer: ConnectionHandle) -> Result<Arc<Entry>, RendezvousError> {
        // Holding the map guard orders this attach against a concurrent remove
        let entry = self
            .entries
            .get(&id)
            .ok_or(RendezvousError::NotFound(id))?;

        let peer_id = peer.id();
        let previous = entry.set_peer(peer);
        self.stats.record_attached(previous.is_some());

        match previous {
            Some(previous) => info!(
                "Peer {} attached to server {}, superseding {}",
                peer_id,
                id,
                previous.id()
            ),
            None => info!("Peer {} attached to server {}", peer_id, id),
        }

        Ok(entry.value().clone())
    }

    /// Remove server `id` after its home connection closed
    ///
    /// The returned entry is destroyed: its peer slot has been emptied and
    /// any later peer write fails with `HomeClosed`. The peer that was
    /// current, if any, is available from [`Registry::remove_and_take_peer`].
    pub fn remove(&self, id: Identifier) -> Option<Arc<Entry>> {
        self.remove_and_take_peer(id).map(|(entry, _)| entry)
    }

    /// Remove server `id` and hand back its current peer for cleanup
    pub fn remove_and_take_peer(
        &self,
        id: Identifier,
    ) -> Option<(Arc<Entry>, Option<ConnectionHandle>)> {
        let (_, entry) = self.entries.remove(&id)?;
        let peer = entry.destroy();

        self.stats.record_removed();
        info!("Server {} removed", id);
        Some((entry, peer))
    }

    pub fn get(&self, id: Identifier) -> Option<Arc<Entry>> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.entries.contains_key(&id)
    }

    /// Identifiers of all registered servers (unordered)
    pub fn ids(&self) -> Vec<Identifier> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, for shutdown
    ///
    /// Returns each removed entry with the peer it had, so the caller can
    /// close both sides.
    pub fn drain(&self) -> Vec<(Arc<Entry>, Option<ConnectionHandle>)> {
        let drained: Vec<_> = self
            .ids()
            .into_iter()
            .filter_map(|id| self.remove_and_take_peer(id))
            .collect();
        debug!("Drained {} servers from registry", drained.len());
        drained
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_allocator(IdAllocator::default())
    }
}
