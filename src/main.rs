//! Rendezvous relay
//!
//! Homes connect to the server port and are handed an identifier. Clients
//! connect to the client port with an HTTP upgrade to `/<identifier>` and are
//! then piped to that home byte for byte.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rendezvous_connection::ConnectionIdGenerator;
use rendezvous_proto::{DEFAULT_ID_DIGITS, DEFAULT_MAX_HEADER_BYTES};
use rendezvous_router::{AllocatorConfig, Registry};
use rendezvous_server_http::{PeerServer, PeerServerConfig};
use rendezvous_server_tcp::{HomeServer, HomeServerConfig};

/// Upper bound on closing every connection at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Rendezvous relay - pairs home connections with clients by identifier
#[derive(Parser, Debug)]
#[command(name = "rendezvous-relay")]
#[command(about = "Run a rendezvous relay server", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Address homes ("servers") connect to
    #[arg(long, env = "RENDEZVOUS_SERVER_ADDR", default_value = "0.0.0.0:3000")]
    server_addr: SocketAddr,

    /// Address clients connect to with an HTTP upgrade
    #[arg(long, env = "RENDEZVOUS_CLIENT_ADDR", default_value = "0.0.0.0:3001")]
    client_addr: SocketAddr,

    /// Number of decimal digits in assigned identifiers
    #[arg(long, default_value_t = DEFAULT_ID_DIGITS)]
    id_digits: u32,

    /// Random draws per registration before giving up on a free identifier
    #[arg(long, default_value_t = 1024)]
    max_id_attempts: u32,

    /// Largest client request head accepted
    #[arg(long, default_value_t = DEFAULT_MAX_HEADER_BYTES)]
    max_header_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_logging(&args.log_level)?;

    info!("🚀 Starting rendezvous relay");

    let registry = Arc::new(
        Registry::new(AllocatorConfig {
            digits: args.id_digits,
            max_attempts: args.max_id_attempts,
        })
        .context("Invalid identifier settings")?,
    );
    info!(
        "Identifiers: {} digits ({} possible)",
        registry.allocator().digits(),
        registry.allocator().space()
    );

    let id_gen = ConnectionIdGenerator::new();

    let home_server = HomeServer::new(
        HomeServerConfig {
            bind_addr: args.server_addr,
            ..Default::default()
        },
        registry.clone(),
    )
    .with_id_generator(id_gen.clone());

    let peer_server = PeerServer::new(
        PeerServerConfig {
            bind_addr: args.client_addr,
            max_header_bytes: args.max_header_bytes,
            ..Default::default()
        },
        registry.clone(),
    )
    .with_id_generator(id_gen);

    // Bind both up front so a taken port fails startup instead of a background task
    let home_listener = home_server.bind().await?;
    let peer_listener = peer_server.bind().await?;

    let home_handle = tokio::spawn(async move {
        if let Err(e) = home_server.serve(home_listener).await {
            error!("Server listener error: {}", e);
        }
    });

    let peer_handle = tokio::spawn(async move {
        if let Err(e) = peer_server.serve(peer_listener).await {
            error!("Client listener error: {}", e);
        }
    });

    info!("✅ Rendezvous relay is running");
    info!("  - Servers: {}", args.server_addr);
    info!("  - Clients: {}", args.client_addr);
    info!("Press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping servers...");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }

    home_handle.abort();
    peer_handle.abort();

    shutdown_connections(&registry).await;

    let stats = registry.stats();
    info!(
        "Relay stats: {} servers registered, {} clients attached ({} superseded, {} stolen)",
        stats.registered, stats.attached, stats.superseded, stats.stolen
    );
    info!(
        "Relay stats: {} bytes server→client, {} bytes client→server, {} bytes dropped without a target",
        stats.home_bytes, stats.peer_bytes, stats.no_target_bytes
    );
    info!("✅ Rendezvous relay stopped");

    Ok(())
}

/// Remove every registered home and close it along with its client
async fn shutdown_connections(registry: &Registry) {
    let drained = registry.drain();
    let count = drained.len();

    let close_all = async {
        for (entry, peer) in drained {
            if let Some(peer) = peer {
                peer.close().await;
            }
            entry.home().close().await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, close_all).await.is_err() {
        warn!("Timed out closing connections after {:?}", SHUTDOWN_TIMEOUT);
    } else {
        info!("Closed {} server connections", count);
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
