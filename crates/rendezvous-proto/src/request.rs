//! Minimal HTTP/1.1 request head parsing for peer connections
//!
//! Only the request line and header names/values are needed to decide whether
//! a peer is asking for an upgrade and which home it targets. Anything after
//! the blank line belongs to the upgraded byte stream.

use thiserror::Error;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Request parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request head is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid request line: {0:?}")]
    InvalidRequestLine(String),

    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("Request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
}

/// Parsed HTTP request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Try to parse a request head from the start of `buf`
    ///
    /// Returns `Ok(None)` while the blank line ending the head has not arrived
    /// yet, or `Ok(Some((head, consumed)))` where `consumed` is the number of
    /// bytes up to and including the terminator.
    pub fn parse(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, RequestError> {
        let end = match find_head_end(buf) {
            Some(end) => end,
            None => return Ok(None),
        };

        let text = std::str::from_utf8(&buf[..end]).map_err(|_| RequestError::InvalidUtf8)?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("HTTP/") {
            return Err(RequestError::InvalidRequestLine(request_line.to_string()));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RequestError::InvalidHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(RequestError::InvalidHeader(line.to_string()));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        let head = RequestHead {
            method: parts[0].to_string(),
            path: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
        };

        Ok(Some((head, end + HEAD_TERMINATOR.len())))
    }

    /// Case-insensitive header lookup (first match)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the peer asked to switch protocols
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade").is_some_and(|v| !v.is_empty())
    }
}

/// Offset of the `\r\n\r\n` terminating the head, if present
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upgrade_request() {
        let raw = b"GET /12345678 HTTP/1.1\r\nHost: relay\r\nConnection: Upgrade\r\nUpgrade: fsync\r\n\r\nhello";
        let (head, consumed) = RequestHead::parse(raw).unwrap().unwrap();

        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/12345678");
        assert_eq!(head.version, "HTTP/1.1");
        assert!(head.is_upgrade());
        assert_eq!(head.header("HOST"), Some("relay"));
        assert_eq!(&raw[consumed..], b"hello");
    }

    #[test]
    fn test_parse_plain_request() {
        let raw = b"GET / HTTP/1.1\r\nHost: relay\r\n\r\n";
        let (head, consumed) = RequestHead::parse(raw).unwrap().unwrap();

        assert!(!head.is_upgrade());
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn test_parse_incomplete() {
        let raw = b"GET /1 HTTP/1.1\r\nUpgrade: x\r\n";
        assert_eq!(RequestHead::parse(raw).unwrap(), None);
    }

    #[test]
    fn test_parse_invalid_request_line() {
        let raw = b"garbage\r\n\r\n";
        assert!(matches!(
            RequestHead::parse(raw),
            Err(RequestError::InvalidRequestLine(_))
        ));
    }

    #[test]
    fn test_parse_invalid_header() {
        let raw = b"GET /1 HTTP/1.1\r\nno colon here\r\n\r\n";
        assert!(matches!(
            RequestHead::parse(raw),
            Err(RequestError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_empty_upgrade_header_is_not_upgrade() {
        let raw = b"GET /1 HTTP/1.1\r\nUpgrade:\r\n\r\n";
        let (head, _) = RequestHead::parse(raw).unwrap().unwrap();
        assert!(!head.is_upgrade());
    }
}
