//! HTTP/1.1 framing written by the relay
//!
//! Every message is a start line, a single `Content-Length` header and the
//! body, nothing else. Peers and homes in the field match on these bytes
//! exactly, so the layout must not change.

use crate::{Identifier, REMOTE_IDENTIFIER_PATH};
use bytes::Bytes;

/// Terminal and non-terminal responses sent to peer connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayResponse {
    /// Peer attached to its home
    Connected,
    /// No home registered under the requested identifier
    ServerNotFound,
    /// Request target was not `/<digits>`
    MissingServerId,
    /// A later peer took over the home's slot
    Stolen,
    /// Plain HTTP request without `Upgrade`
    UpgradeRequired,
}

impl RelayResponse {
    pub fn status(&self) -> &'static str {
        match self {
            RelayResponse::Connected => "200 OK",
            RelayResponse::ServerNotFound => "404 Not Found",
            RelayResponse::MissingServerId | RelayResponse::UpgradeRequired => "400 Bad Request",
            RelayResponse::Stolen => "502 Bad Gateway",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            RelayResponse::Connected => "Connected",
            RelayResponse::ServerNotFound => "Server not found",
            RelayResponse::MissingServerId => "Must provide ServerID",
            RelayResponse::Stolen => "Another client has stolen your connection!",
            RelayResponse::UpgradeRequired => "Must provide Upgrade: header and /<targetID> as url",
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        encode_response(self.status(), self.body())
    }
}

/// Encode `HTTP/1.1 <status>` with a `Content-Length` framed body
pub fn encode_response(status: &str, body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        body.len(),
        body
    ))
}

/// Encode `<method> <path> HTTP/1.1` with a `Content-Length` framed body
pub fn encode_request(method: &str, path: &str, body: &str) -> Bytes {
    Bytes::from(format!(
        "{} {} HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    ))
}

/// Message telling a freshly registered home which identifier it was given
pub fn identifier_assignment(id: Identifier) -> Bytes {
    encode_request("PUT", REMOTE_IDENTIFIER_PATH, &id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_assignment_bytes() {
        let msg = identifier_assignment(Identifier::new(12345678));
        assert_eq!(
            &msg[..],
            b"PUT /fsync.config/remoteUniqueIdentifier HTTP/1.1\r\nContent-Length: 8\r\n\r\n12345678"
        );
    }

    #[test]
    fn test_response_bytes() {
        assert_eq!(
            &RelayResponse::Connected.to_bytes()[..],
            b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nConnected"
        );
        assert_eq!(
            &RelayResponse::ServerNotFound.to_bytes()[..],
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 16\r\n\r\nServer not found"
        );
        assert_eq!(
            &RelayResponse::MissingServerId.to_bytes()[..],
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 21\r\n\r\nMust provide ServerID"
        );
        assert_eq!(
            &RelayResponse::Stolen.to_bytes()[..],
            b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 42\r\n\r\nAnother client has stolen your connection!"
        );
        assert_eq!(
            &RelayResponse::UpgradeRequired.to_bytes()[..],
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 51\r\n\r\nMust provide Upgrade: header and /<targetID> as url"
        );
    }
}
