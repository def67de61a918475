//! Rendezvous logic for the relay
//!
//! Homes register and receive an [`Identifier`]; peers attach to a home by
//! identifier. Each [`Entry`] pairs one home with at most one current peer and
//! forwards bytes between them, rejecting peers whose slot has been taken.

pub mod allocator;
pub mod entry;
pub mod registry;
pub mod stats;

pub use allocator::{AllocatorConfig, IdAllocator};
pub use entry::{Entry, EntryState, HomeDelivery};
pub use registry::Registry;
pub use stats::{RelayStats, StatsSnapshot};

use rendezvous_connection::ConnectionId;
use rendezvous_proto::Identifier;
use thiserror::Error;

/// Rendezvous errors
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// Misconfigured identifier space, or no free identifier found
    #[error("Identifier allocation exhausted: {reason}")]
    AllocationExhausted { reason: String },

    #[error("Server not found: {0}")]
    NotFound(Identifier),

    /// The peer is no longer the entry's current peer
    #[error("Peer {peer} lost server {id} to another client")]
    Stolen { id: Identifier, peer: ConnectionId },

    /// The peer was dropped from the slot without being replaced
    #[error("Peer {peer} is no longer attached to server {id}")]
    Detached { id: Identifier, peer: ConnectionId },

    #[error("Home connection for server {0} is closed")]
    HomeClosed(Identifier),
}
