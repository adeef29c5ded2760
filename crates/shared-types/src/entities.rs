//! # Core Domain Entities
//!
//! Primitive identifiers used by every subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte hash (SHA-256 or double SHA-256).
pub type Hash = [u8; 32];

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Renders a hash as lowercase hex for logs.
pub fn hash_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Connection-scoped identifier of a remote peer, assigned by the
/// peer-connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Quorum type tag. Serialized as one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LlmqType(pub u8);

impl fmt::Display for LlmqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
