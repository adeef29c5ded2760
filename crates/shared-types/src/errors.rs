//! # Error Types
//!
//! Errors reported by the quorum registry / threshold-crypto collaborator.

use thiserror::Error;

/// Failures surfaced by quorum operations (signing, recovery, lookups).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuorumError {
    /// Quorum is not known to the registry.
    #[error("Unknown quorum: type {llmq_type}, hash {quorum_hash}")]
    UnknownQuorum { llmq_type: u8, quorum_hash: String },

    /// The local node holds no key share for this quorum.
    #[error("Local node is not a member of quorum {0}")]
    NotAMember(String),

    /// Fewer shares than the threshold were supplied for recovery.
    #[error("Insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    /// Creating the local signature share failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Lagrange interpolation or the final signature check failed.
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),
}
