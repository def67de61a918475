//! Rendezvous Protocol Definitions
//!
//! This crate defines the identifier type and the small HTTP/1.1 framing the
//! relay speaks to home connections (identifier assignment) and to peer
//! connections (upgrade request parsing and status responses).

pub mod identifier;
pub mod request;
pub mod wire;

pub use identifier::{Identifier, IdentifierError};
pub use request::{RequestError, RequestHead};
pub use wire::{encode_request, encode_response, identifier_assignment, RelayResponse};

/// Path the identifier assignment is addressed to on the home connection
pub const REMOTE_IDENTIFIER_PATH: &str = "/fsync.config/remoteUniqueIdentifier";

/// Default number of decimal digits in an identifier
pub const DEFAULT_ID_DIGITS: u32 = 8;

/// Default upper bound for an HTTP request head sent by a peer
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
