//! Connection plumbing shared by both relay listeners
//!
//! Each accepted socket is split in two: a writer task that drains an ordered
//! outbound channel into the write half, and a reader owned by the
//! connection's own task. Other tasks only ever see a [`ConnectionHandle`],
//! which can queue bytes or ask the writer to close.

pub mod handle;
pub mod io;
pub mod listener;

pub use handle::{ConnectionError, ConnectionHandle, ConnectionId, Outbound, OutboundPermit};
pub use io::{spawn_writer, ChunkReader, WriterTask};
pub use listener::bind_with_retry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default capacity of a connection's outbound channel (in chunks)
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default read buffer size per connection
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// How long a rejected connection is drained so it can read its response
pub const LINGER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Process-wide connection ID generator for logging and identity checks
#[derive(Clone)]
pub struct ConnectionIdGenerator {
    next_id: Arc<AtomicU64>,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
