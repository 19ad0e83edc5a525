//! Hash types for the threatdb threat-list database
//!
//! Threat lists identify URLs by the SHA-256 hash of a canonicalized
//! host+path expression. Most list entries are truncated to a 32-bit
//! prefix; a full 32-byte hash is kept only where a prefix would be
//! ambiguous or where exact matching is required (whitelists, the IP
//! blacklist record format).

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Error type for hash operations
#[derive(Debug, Error)]
pub enum HashError {
    /// Input was not exactly [`FULL_HASH_LEN`] bytes
    #[error("Invalid full hash length: {0}, must be {FULL_HASH_LEN}")]
    InvalidLength(usize),

    /// Invalid hash format
    #[error("Invalid hash format: {0}")]
    InvalidFormat(String),
}

/// Result type for hash operations
pub type Result<T> = std::result::Result<T, HashError>;

/// Length of a full hash in bytes (SHA-256)
pub const FULL_HASH_LEN: usize = 32;

/// A 32-bit hash prefix.
///
/// The prefix is the first 4 bytes of the full hash, interpreted
/// big-endian so that ordering prefixes agrees with ordering the full
/// hashes they were truncated from. Prefixes are not unique; the same
/// prefix may appear in multiple chunks.
pub type Prefix = u32;

/// A complete 32-byte hash of a canonicalized expression.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullHash([u8; FULL_HASH_LEN]);

impl FullHash {
    /// Create a FullHash from a fixed-size byte array.
    pub fn new(bytes: [u8; FULL_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a FullHash from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FULL_HASH_LEN {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut buf = [0u8; FULL_HASH_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Hash a canonicalized "host+path" expression.
    pub fn from_expression(expression: &str) -> Self {
        let digest = Sha256::digest(expression.as_bytes());
        let mut buf = [0u8; FULL_HASH_LEN];
        buf.copy_from_slice(&digest);
        Self(buf)
    }

    /// Get the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; FULL_HASH_LEN] {
        &self.0
    }

    /// The 32-bit prefix of this hash.
    pub fn prefix(&self) -> Prefix {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Convert the hash to a hexadecimal string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create a FullHash from a hexadecimal string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidFormat(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for FullHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FullHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullHash({})", self.to_hex())
    }
}

impl fmt::Display for FullHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Ord for FullHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for FullHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_expression() {
        let hash = FullHash::from_expression("example.com/");
        assert_eq!(hash.as_bytes().len(), FULL_HASH_LEN);

        // Same expression hashes identically, different ones do not.
        assert_eq!(hash, FullHash::from_expression("example.com/"));
        assert_ne!(hash, FullHash::from_expression("example.com/path"));
    }

    #[test]
    fn test_prefix_is_leading_bytes() {
        let mut bytes = [0u8; FULL_HASH_LEN];
        bytes[0] = 0x12;
        bytes[1] = 0x34;
        bytes[2] = 0xab;
        bytes[3] = 0xcd;
        let hash = FullHash::new(bytes);
        assert_eq!(hash.prefix(), 0x1234abcd);
    }

    #[test]
    fn test_prefix_order_matches_hash_order() {
        let a = FullHash::from_expression("a.example.com/");
        let b = FullHash::from_expression("b.example.com/");
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        assert!(lo.prefix() <= hi.prefix());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(matches!(
            FullHash::from_slice(&[0u8; 20]),
            Err(HashError::InvalidLength(20))
        ));
        assert!(FullHash::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = FullHash::from_expression("evil.com/");
        let parsed = FullHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }
}
