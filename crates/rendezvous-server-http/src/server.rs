//! Peer server implementation

use bytes::{Bytes, BytesMut};
use rendezvous_connection::{
    bind_with_retry, spawn_writer, ChunkReader, ConnectionHandle, ConnectionIdGenerator,
    WriterTask, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_READ_BUFFER, LINGER_TIMEOUT,
};
use rendezvous_proto::{
    Identifier, IdentifierError, RelayResponse, RequestError, RequestHead,
    DEFAULT_MAX_HEADER_BYTES,
};
use rendezvous_router::{Registry, RendezvousError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Peer server errors
#[derive(Debug, Error)]
pub enum PeerServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] RequestError),

    #[error("Rendezvous error: {0}")]
    RendezvousError(#[from] RendezvousError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Peer server configuration
#[derive(Debug, Clone)]
pub struct PeerServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest request head accepted before the upgrade
    pub max_header_bytes: usize,
    pub outbound_capacity: usize,
    pub read_buffer: usize,
}

impl Default for PeerServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Listener for peer ("client") connections
pub struct PeerServer {
    config: PeerServerConfig,
    registry: Arc<Registry>,
    id_gen: ConnectionIdGenerator,
}

impl PeerServer {
    pub fn new(config: PeerServerConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            id_gen: ConnectionIdGenerator::new(),
        }
    }

    pub fn with_id_generator(mut self, id_gen: ConnectionIdGenerator) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub async fn bind(&self) -> Result<TcpListener, PeerServerError> {
        bind_with_retry(self.config.bind_addr).await.map_err(|e| {
            PeerServerError::BindError {
                address: self.config.bind_addr.ip().to_string(),
                port: self.config.bind_addr.port(),
                reason: e.to_string(),
            }
        })
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), PeerServerError> {
        let local_addr = listener.local_addr()?;
        info!("Listening for 'clients' on {}", local_addr);

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("Accepted peer connection from {}", peer_addr);
                    let registry = self.registry.clone();
                    let id_gen = self.id_gen.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_peer_connection(socket, registry, id_gen, config).await
                        {
                            warn!("Peer connection from {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept peer connection: {}", e);
                }
            }
        }
    }

    async fn handle_peer_connection(
        socket: TcpStream,
        registry: Arc<Registry>,
        id_gen: ConnectionIdGenerator,
        config: PeerServerConfig,
    ) -> Result<(), PeerServerError> {
        let _ = socket.set_nodelay(true);
        let conn_id = id_gen.generate();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = ChunkReader::new(read_half, config.read_buffer);

        let (head, leftover) = match read_request_head(&mut reader, config.max_header_bytes).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!("Peer {} closed before completing its request", conn_id);
                return Ok(());
            }
            Err(PeerServerError::MalformedRequest(e)) => {
                debug!("Rejecting malformed request from {}: {}", conn_id, e);
                return reject(write_half, &mut reader, RelayResponse::UpgradeRequired).await;
            }
            Err(e) => return Err(e),
        };

        let id = match route(&head) {
            Ok(id) => id,
            Err(response) => {
                debug!(
                    "Rejecting {} {} from {}: {}",
                    head.method,
                    head.path,
                    conn_id,
                    response.status()
                );
                return reject(write_half, &mut reader, response).await;
            }
        };

        let (peer, rx) = ConnectionHandle::channel(conn_id, config.outbound_capacity);
        let entry = match registry.attach(id, peer.clone()) {
            Ok(entry) => entry,
            Err(RendezvousError::NotFound(_)) => {
                debug!("Peer {} asked for unknown server {}", conn_id, id);
                return reject(write_half, &mut reader, RelayResponse::ServerNotFound).await;
            }
            Err(e) => return Err(e.into()),
        };

        // The writer starts only after this, so home bytes queued meanwhile follow it
        if let Err(e) = write_half
            .write_all(&RelayResponse::Connected.to_bytes())
            .await
        {
            entry.detach(conn_id);
            return Err(e.into());
        }

        let mut writer = spawn_writer(conn_id, write_half, rx);
        let mut pending = (!leftover.is_empty()).then_some(leftover);

        let result: Result<(), PeerServerError> = loop {
            let data = match pending.take() {
                Some(data) => data,
                None => tokio::select! {
                    chunk = reader.next_chunk() => match chunk {
                        Ok(Some(data)) => data,
                        Ok(None) => {
                            debug!("Peer {} of server {} closed its connection", conn_id, id);
                            break Ok(());
                        }
                        Err(e) => break Err(e.into()),
                    },
                    _ = &mut writer => {
                        debug!("Writer for peer {} stopped", conn_id);
                        break Ok(());
                    }
                },
            };

            if let Err(e) = entry.forward_from_peer(conn_id, data).await {
                break Err(e.into());
            }
        };

        entry.detach(conn_id);

        match result {
            Err(PeerServerError::RendezvousError(RendezvousError::Stolen { .. })) => {
                let notified = finish_peer(
                    &peer,
                    &writer,
                    peer.send_and_close(RelayResponse::Stolen.to_bytes()),
                )
                .await;
                if notified {
                    reader.discard_until_eof(LINGER_TIMEOUT).await;
                }
                Ok(())
            }
            Err(PeerServerError::RendezvousError(RendezvousError::Detached { .. })) => {
                debug!("Peer {} was detached from server {} after its writer stopped", conn_id, id);
                finish_peer(&peer, &writer, peer.close()).await;
                Ok(())
            }
            Err(PeerServerError::RendezvousError(RendezvousError::HomeClosed(_))) => {
                debug!("Server {} went away under peer {}", id, conn_id);
                finish_peer(&peer, &writer, peer.close()).await;
                Ok(())
            }
            other => {
                finish_peer(&peer, &writer, peer.close()).await;
                other
            }
        }
    }
}

/// Run the final write/close on a peer, giving up after [`LINGER_TIMEOUT`]
///
/// A client that stopped reading can leave no room in its queue; its writer
/// is then aborted, which drops the socket. Returns whether `finish` completed.
async fn finish_peer<F, T>(peer: &ConnectionHandle, writer: &WriterTask, finish: F) -> bool
where
    F: Future<Output = T>,
{
    if tokio::time::timeout(LINGER_TIMEOUT, finish).await.is_ok() {
        return true;
    }
    debug!("Peer {} is not reading, dropping its connection", peer.id());
    writer.abort();
    false
}

/// Read until a complete request head has arrived
///
/// Returns the head and any bytes received after it, or `None` if the peer
/// closed first.
async fn read_request_head<R>(
    reader: &mut ChunkReader<R>,
    max_header_bytes: usize,
) -> Result<Option<(RequestHead, Bytes)>, PeerServerError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::new();

    loop {
        if let Some((head, consumed)) = RequestHead::parse(&buf)? {
            if consumed > max_header_bytes {
                return Err(RequestError::HeadTooLarge {
                    limit: max_header_bytes,
                }
                .into());
            }
            let _ = buf.split_to(consumed);
            return Ok(Some((head, buf.freeze())));
        }

        if buf.len() > max_header_bytes {
            return Err(RequestError::HeadTooLarge {
                limit: max_header_bytes,
            }
            .into());
        }

        match reader.next_chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => return Ok(None),
        }
    }
}

/// Pick the server a request targets, or the response rejecting it
fn route(head: &RequestHead) -> Result<Identifier, RelayResponse> {
    if !head.is_upgrade() {
        return Err(RelayResponse::UpgradeRequired);
    }

    Identifier::from_path(&head.path).map_err(|e| match e {
        IdentifierError::Malformed(_) => RelayResponse::MissingServerId,
        // Too large to ever have been assigned
        IdentifierError::OutOfRange(_) => RelayResponse::ServerNotFound,
    })
}

/// Answer with a terminal response and close
async fn reject<R>(
    mut write_half: OwnedWriteHalf,
    reader: &mut ChunkReader<R>,
    response: RelayResponse,
) -> Result<(), PeerServerError>
where
    R: AsyncRead + Unpin,
{
    write_half.write_all(&response.to_bytes()).await?;
    let _ = write_half.shutdown().await;
    reader.discard_until_eof(LINGER_TIMEOUT).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_connection::{ConnectionError, ConnectionId, Outbound};
    use tokio::io::AsyncWriteExt;

    fn head(path: &str, upgrade: bool) -> RequestHead {
        let mut headers = vec![("Host".to_string(), "relay".to_string())];
        if upgrade {
            headers.push(("Upgrade".to_string(), "fsync".to_string()));
        }
        RequestHead {
            method: "GET".to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
        }
    }

    #[test]
    fn test_peer_server_config() {
        let config = PeerServerConfig::default();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3001");
        assert_eq!(config.max_header_bytes, DEFAULT_MAX_HEADER_BYTES);
    }

    #[test]
    fn test_route() {
        assert_eq!(route(&head("/12345678", true)), Ok(Identifier::new(12345678)));
        assert_eq!(route(&head("/007", true)), Ok(Identifier::new(7)));
        assert_eq!(
            route(&head("/abc", true)),
            Err(RelayResponse::MissingServerId)
        );
        assert_eq!(route(&head("/", true)), Err(RelayResponse::MissingServerId));
        assert_eq!(
            route(&head("/123?x=1", true)),
            Err(RelayResponse::MissingServerId)
        );
        assert_eq!(
            route(&head("/99999999999999999999999", true)),
            Err(RelayResponse::ServerNotFound)
        );
    }

    #[test]
    fn test_route_requires_upgrade() {
        assert_eq!(
            route(&head("/12345678", false)),
            Err(RelayResponse::UpgradeRequired)
        );
        // Checked before the path
        assert_eq!(route(&head("/abc", false)), Err(RelayResponse::UpgradeRequired));
    }

    #[tokio::test]
    async fn test_read_request_head_across_chunks() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut reader = ChunkReader::new(local, 16);

        let task = tokio::spawn(async move {
            remote.write_all(b"GET /42 HTTP/1.1\r\n").await.unwrap();
            remote.write_all(b"Upgrade: fsync\r\n").await.unwrap();
            remote.write_all(b"\r\nearly").await.unwrap();
            remote
        });

        let (head, leftover) = read_request_head(&mut reader, 1024)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.path, "/42");
        assert!(head.is_upgrade());

        // Leftover may be split across reads; collect the rest
        let mut early = leftover.to_vec();
        let _remote = task.await.unwrap();
        while early.len() < 5 {
            let chunk = reader.next_chunk().await.unwrap().unwrap();
            early.extend_from_slice(&chunk);
        }
        assert_eq!(early, b"early");
    }

    #[tokio::test]
    async fn test_read_request_head_too_large() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let mut reader = ChunkReader::new(local, 64);

        remote.write_all(b"GET /42 HTTP/1.1\r\n").await.unwrap();
        remote.write_all(&[b'a'; 512]).await.unwrap();

        match read_request_head(&mut reader, 128).await {
            Err(PeerServerError::MalformedRequest(RequestError::HeadTooLarge { limit })) => {
                assert_eq!(limit, 128)
            }
            other => panic!("expected oversize head, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_read_request_head_eof() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut reader = ChunkReader::new(local, 64);

        remote.write_all(b"GET /42 HTTP/1.1\r\n").await.unwrap();
        drop(remote);

        assert!(read_request_head(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_head_invalid() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut reader = ChunkReader::new(local, 64);

        remote.write_all(b"garbage\r\n\r\n").await.unwrap();

        assert!(matches!(
            read_request_head(&mut reader, 1024).await,
            Err(PeerServerError::MalformedRequest(
                RequestError::InvalidRequestLine(_)
            ))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_peer_gives_up_on_full_queue() {
        let (peer, _rx) = ConnectionHandle::channel(ConnectionId::new(4), 1);
        peer.send(Bytes::from_static(b"backlog")).await.unwrap();

        // Stands in for a writer stuck on a client that stopped reading
        let writer: WriterTask =
            tokio::spawn(std::future::pending::<Result<u64, ConnectionError>>());

        let finished = finish_peer(
            &peer,
            &writer,
            peer.send_and_close(RelayResponse::Stolen.to_bytes()),
        )
        .await;

        assert!(!finished);
        assert!(writer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_finish_peer_queues_response_and_close() {
        let (peer, mut rx) = ConnectionHandle::channel(ConnectionId::new(5), 4);
        let writer: WriterTask =
            tokio::spawn(std::future::pending::<Result<u64, ConnectionError>>());

        let finished = finish_peer(
            &peer,
            &writer,
            peer.send_and_close(RelayResponse::Stolen.to_bytes()),
        )
        .await;

        assert!(finished);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(RelayResponse::Stolen.to_bytes()))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        writer.abort();
    }
}
