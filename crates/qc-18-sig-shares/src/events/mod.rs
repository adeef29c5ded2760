//! Events and error types for the Signature Shares subsystem.

use shared_types::QuorumError;
use thiserror::Error;

pub mod codec;
pub mod p2p;

pub use codec::CodecError;
pub use p2p::*;

/// Service-level errors returned through the inbound API.
#[derive(Debug, Error)]
pub enum SigSharesError {
    #[error("Unknown quorum: {0}")]
    UnknownQuorum(String),

    #[error("Local node is not a member of quorum {0}")]
    NotAMember(String),

    #[error("Signature already recovered for sign hash {0}")]
    AlreadyRecovered(String),

    #[error("Quorum operation failed: {0}")]
    Quorum(#[from] QuorumError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Reasons a peer gets banned. Carried in log lines only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("{command}: {count} entries exceeds limit of {max}")]
    TooManyEntries {
        command: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Announced reserved session id")]
    InvalidSessionId,

    #[error("Inventory size mismatch: expected {expected}, got {actual}")]
    InventorySizeMismatch { expected: usize, actual: usize },

    #[error("Batched shares for unknown session {session_id}")]
    UnknownSession { session_id: u32 },

    #[error("Duplicate member {member} in batch")]
    DuplicateMember { member: u16 },

    #[error("Member {member} out of range (quorum size {size})")]
    MemberOutOfRange { member: u16, size: usize },

    #[error("Member {member} is not a valid quorum member")]
    InvalidMember { member: u16 },

    #[error("Invalid signature share from member {member}")]
    InvalidSignatureShare { member: u16 },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] CodecError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: &str) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.to_string(),
        }
    }
}
