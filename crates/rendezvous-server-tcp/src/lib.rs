//! Home listener
//!
//! Plain TCP listener for long-lived "server" connections. Every accepted
//! socket is registered, told its identifier, and from then on everything it
//! sends is forwarded to its current peer.

mod server;

pub use server::{HomeServer, HomeServerConfig, HomeServerError};
