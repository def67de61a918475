//! Cloneable write-side handle to a live connection

use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Identity of one accepted socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Commands consumed by a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write these bytes in order
    Data(Bytes),
    /// Flush what is queued, shut down the write half and stop
    Close,
}

/// Non-owning handle used to write to, or close, a connection
///
/// Two handles refer to the same socket iff their IDs are equal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// Create a handle together with the receiving end its writer drains
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue bytes for the writer; waits while the outbound queue is full
    pub async fn send(&self, data: Bytes) -> Result<(), ConnectionError> {
        self.tx
            .send(Outbound::Data(data))
            .await
            .map_err(|_| ConnectionError::Closed(self.id))
    }

    /// Wait for room in the outbound queue without committing to a write
    ///
    /// Lets callers decide whether to write only once space is available,
    /// e.g. to re-check a condition under a lock and then send synchronously.
    pub async fn reserve(&self) -> Result<OutboundPermit<'_>, ConnectionError> {
        self.tx
            .reserve()
            .await
            .map(OutboundPermit)
            .map_err(|_| ConnectionError::Closed(self.id))
    }

    /// Ask the writer to close after draining what is already queued
    ///
    /// Closing an already closed connection is a no-op.
    pub async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
    }

    /// Queue a final message and close
    pub async fn send_and_close(&self, data: Bytes) -> Result<(), ConnectionError> {
        self.send(data).await?;
        self.close().await;
        Ok(())
    }
}

/// A reserved slot in a connection's outbound queue
pub struct OutboundPermit<'a>(mpsc::Permit<'a, Outbound>);

impl OutboundPermit<'_> {
    /// Queue bytes into the reserved slot; never waits
    pub fn send(self, data: Bytes) {
        self.0.send(Outbound::Data(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_then_send() {
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new(3), 1);

        let permit = handle.reserve().await.unwrap();
        permit.send(Bytes::from_static(b"reserved"));

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(Bytes::from_static(b"reserved")))
        );

        // An unused permit frees its slot when dropped
        drop(handle.reserve().await.unwrap());
        handle.send(Bytes::from_static(b"next")).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(Bytes::from_static(b"next")))
        );
    }

    #[tokio::test]
    async fn test_send_and_close_order() {
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new(7), 4);

        handle
            .send_and_close(Bytes::from_static(b"bye"))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(Bytes::from_static(b"bye")))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (handle, rx) = ConnectionHandle::channel(ConnectionId::new(1), 4);
        drop(rx);

        let result = handle.send(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(ConnectionError::Closed(id)) if id == ConnectionId::new(1)));

        // Does not panic or hang
        handle.close().await;
    }
}
