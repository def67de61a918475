//! Relay-wide counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the registry and every entry
#[derive(Debug, Default)]
pub struct RelayStats {
    registered: AtomicU64,
    removed: AtomicU64,
    attached: AtomicU64,
    superseded: AtomicU64,
    stolen: AtomicU64,
    home_bytes: AtomicU64,
    peer_bytes: AtomicU64,
    no_target_chunks: AtomicU64,
    no_target_bytes: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub registered: u64,
    pub removed: u64,
    pub attached: u64,
    /// Attaches that replaced an existing peer
    pub superseded: u64,
    /// Stale peers rejected with 502
    pub stolen: u64,
    /// Bytes forwarded home → peer
    pub home_bytes: u64,
    /// Bytes forwarded peer → home
    pub peer_bytes: u64,
    /// Home chunks dropped because no peer was attached
    pub no_target_chunks: u64,
    pub no_target_bytes: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attached(&self, superseded: bool) {
        self.attached.fetch_add(1, Ordering::Relaxed);
        if superseded {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_stolen(&self) {
        self.stolen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_home_bytes(&self, n: usize) {
        self.home_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_peer_bytes(&self, n: usize) {
        self.peer_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_no_target(&self, n: usize) {
        self.no_target_chunks.fetch_add(1, Ordering::Relaxed);
        self.no_target_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            attached: self.attached.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            home_bytes: self.home_bytes.load(Ordering::Relaxed),
            peer_bytes: self.peer_bytes.load(Ordering::Relaxed),
            no_target_chunks: self.no_target_chunks.load(Ordering::Relaxed),
            no_target_bytes: self.no_target_bytes.load(Ordering::Relaxed),
        }
    }
}
