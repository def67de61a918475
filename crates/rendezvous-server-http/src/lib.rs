//! Peer listener
//!
//! Accepts HTTP/1.1 upgrade requests of the form `GET /<id>` and attaches the
//! connection to the home registered under that identifier. After the
//! `200 Connected` response the socket carries raw bytes in both directions.

mod server;

pub use server::{PeerServer, PeerServerConfig, PeerServerError};
