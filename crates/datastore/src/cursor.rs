//! Opaque query cursors.

use std::{fmt, str::FromStr};

use base64::{DecodeError, Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;

/// An opaque position within an ordered query result stream.
///
/// A cursor's string form is URL-safe base64 of its backend bytes, so it
/// survives a trip through a URL or a form field. [`FromStr`] is the exact
/// inverse of [`Display`](fmt::Display); whether the bytes name a valid
/// position is for the backend to decide (see `RawDatastore::decode_cursor`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(Bytes);

impl Cursor {
    /// Wraps backend cursor bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the backend cursor bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl FromStr for Cursor {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        URL_SAFE_NO_PAD.decode(s).map(Self::from_bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_url_safe() {
        let cursor = Cursor::from_bytes(vec![0xfb, 0xff, 0x00]);
        let s = cursor.to_string();
        assert!(!s.contains('+') && !s.contains('/') && !s.contains('='));
        assert_eq!(s, "-_8A");
    }

    #[test]
    fn test_parse_inverts_display() {
        let cursor = Cursor::from_bytes(vec![0xfb, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02]);
        let parsed: Cursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
    }

    #[test]
    fn test_parse_rejects_other_alphabets() {
        assert!("+/8A".parse::<Cursor>().is_err());
        assert!("-_8A==".parse::<Cursor>().is_err());
    }
}
