//! Numeric identifiers assigned to home connections
//!
//! Peers name the home they want by requesting `/<digits>`. The identifier is
//! rendered as plain decimal, without zero padding.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Path is not of the form `/<digits>`
    #[error("Malformed identifier path: {0:?}")]
    Malformed(String),

    /// Digits are well-formed but do not fit in an identifier
    #[error("Identifier out of range: {0}")]
    OutOfRange(String),
}

/// Registry key handed to a home connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(u64);

impl Identifier {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Parse a request target of the form `/<digits>`
    ///
    /// Anything else (query strings, trailing slashes, signs, empty digits) is
    /// `Malformed`. Digit runs too large for `u64` are `OutOfRange`: they are
    /// syntactically valid but can never name a registered home.
    pub fn from_path(path: &str) -> Result<Self, IdentifierError> {
        let digits = path
            .strip_prefix('/')
            .ok_or_else(|| IdentifierError::Malformed(path.to_string()))?;

        digits.parse()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentifierError::Malformed(s.to_string()));
        }

        s.parse::<u64>()
            .map(Identifier)
            .map_err(|_| IdentifierError::OutOfRange(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(
            Identifier::from_path("/12345678").unwrap(),
            Identifier::new(12345678)
        );
        assert_eq!(Identifier::from_path("/0").unwrap(), Identifier::new(0));
        // Leading zeros name the same identifier
        assert_eq!(
            Identifier::from_path("/00001234").unwrap(),
            Identifier::new(1234)
        );
    }

    #[test]
    fn test_from_path_malformed() {
        for path in ["/abc", "/", "", "12345678", "/123/", "/12a4", "/+12", "/123?x=1", "//123"] {
            assert!(
                matches!(
                    Identifier::from_path(path),
                    Err(IdentifierError::Malformed(_))
                ),
                "path {:?} should be malformed",
                path
            );
        }
    }

    #[test]
    fn test_from_path_out_of_range() {
        let result = Identifier::from_path("/99999999999999999999999");
        assert!(matches!(result, Err(IdentifierError::OutOfRange(_))));
    }

    #[test]
    fn test_display_is_unpadded() {
        assert_eq!(Identifier::new(42).to_string(), "42");
        assert_eq!(Identifier::new(12345678).to_string(), "12345678");
    }
}
