//! Home server implementation

use rendezvous_connection::{
    bind_with_retry, spawn_writer, ChunkReader, ConnectionHandle, ConnectionIdGenerator,
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_READ_BUFFER,
};
use rendezvous_proto::identifier_assignment;
use rendezvous_router::{HomeDelivery, Registry, RendezvousError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Home server errors
#[derive(Debug, Error)]
pub enum HomeServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Registration failed: {0}")]
    RegistrationError(#[from] RendezvousError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Home server configuration
#[derive(Debug, Clone)]
pub struct HomeServerConfig {
    pub bind_addr: SocketAddr,
    /// Chunks queued towards a home before forwarding peers wait
    pub outbound_capacity: usize,
    pub read_buffer: usize,
}

impl Default for HomeServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Listener for home ("server") connections
pub struct HomeServer {
    config: HomeServerConfig,
    registry: Arc<Registry>,
    id_gen: ConnectionIdGenerator,
}

impl HomeServer {
    pub fn new(config: HomeServerConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            id_gen: ConnectionIdGenerator::new(),
        }
    }

    /// Share connection IDs with another listener so log lines stay unambiguous
    pub fn with_id_generator(mut self, id_gen: ConnectionIdGenerator) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub async fn bind(&self) -> Result<TcpListener, HomeServerError> {
        bind_with_retry(self.config.bind_addr).await.map_err(|e| {
            HomeServerError::BindError {
                address: self.config.bind_addr.ip().to_string(),
                port: self.config.bind_addr.port(),
                reason: e.to_string(),
            }
        })
    }

    /// Serve home connections accepted on `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<(), HomeServerError> {
        let local_addr = listener.local_addr()?;
        info!("Listening for 'servers' on {}", local_addr);

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("Accepted home connection from {}", peer_addr);
                    let registry = self.registry.clone();
                    let id_gen = self.id_gen.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_home_connection(socket, registry, id_gen, config).await
                        {
                            warn!("Home connection from {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept home connection: {}", e);
                }
            }
        }
    }

    async fn handle_home_connection(
        socket: TcpStream,
        registry: Arc<Registry>,
        id_gen: ConnectionIdGenerator,
        config: HomeServerConfig,
    ) -> Result<(), HomeServerError> {
        let _ = socket.set_nodelay(true);
        let conn_id = id_gen.generate();
        let (read_half, mut write_half) = socket.into_split();

        let (home, rx) = ConnectionHandle::channel(conn_id, config.outbound_capacity);
        let entry = registry.register_entry(home)?;
        let id = entry.id();

        // Sent before the writer starts, so no forwarded peer bytes can precede it
        if let Err(e) = write_half.write_all(&identifier_assignment(id)).await {
            registry.remove(id);
            return Err(e.into());
        }

        let mut writer = spawn_writer(conn_id, write_half, rx);
        let mut reader = ChunkReader::new(read_half, config.read_buffer);

        loop {
            tokio::select! {
                chunk = reader.next_chunk() => match chunk {
                    Ok(Some(data)) => {
                        if let HomeDelivery::PeerClosed(peer) = entry.forward_from_home(data).await {
                            debug!("Peer {} of server {} went away", peer, id);
                        }
                    }
                    Ok(None) => {
                        debug!("Server {} closed its connection", id);
                        break;
                    }
                    Err(e) => {
                        debug!("Read error on server {}: {}", id, e);
                        break;
                    }
                },
                _ = &mut writer => {
                    debug!("Writer for server {} stopped", id);
                    break;
                }
            }
        }

        if let Some((_, Some(peer))) = registry.remove_and_take_peer(id) {
            debug!("Closing peer {} of departed server {}", peer.id(), id);
            peer.close().await;
        }
        entry.home().close().await;

        Ok(())
    }
}
