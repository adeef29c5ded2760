//! Outbound ports (SPI) for the Signature Shares subsystem.

use crate::domain::{LazySignature, SigShare, SigSharesConfig, SignId};
use crate::events::{ConfigError, SigSharesMessage};
use shared_types::{Hash, LlmqType, PeerId, Quorum, QuorumError};
use std::sync::Arc;

/// Quorum registry and threshold-crypto collaborator.
///
/// All cryptography happens behind this trait.
pub trait QuorumManager: Send + Sync {
    /// Resolve a quorum by type and hash.
    fn get_quorum(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> Option<Arc<Quorum>>;

    /// False once the quorum has rotated out of the active set.
    fn is_quorum_active(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> bool;

    /// Our member index in `quorum`, if we hold a key share for it.
    fn local_member_index(&self, quorum: &Quorum) -> Option<u16>;

    /// Produce our signature share for `sign_id`.
    fn sign_share(&self, quorum: &Quorum, sign_id: &SignId) -> Result<SigShare, QuorumError>;

    /// Verify a share against the member's public key share.
    fn verify_share(&self, quorum: &Quorum, share: &SigShare) -> bool;

    /// Combine at least `threshold` shares into the quorum signature.
    fn recover_signature(
        &self,
        quorum: &Quorum,
        shares: &[SigShare],
    ) -> Result<LazySignature, QuorumError>;
}

/// Peer-connection layer.
pub trait PeerNetwork: Send + Sync {
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Peers we hold intra-quorum connections with for the given quorum.
    /// Share inventories are only announced to these.
    fn quorum_peers(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> Vec<PeerId>;

    /// Connected peer operated by the quorum member with `pro_tx_hash`.
    fn member_peer(&self, pro_tx_hash: &Hash) -> Option<PeerId>;

    /// Fire-and-forget send.
    fn send(&self, peer: PeerId, message: SigSharesMessage);

    /// Report misbehavior with the given score.
    fn misbehaving(&self, peer: PeerId, score: u32);

    fn disconnect(&self, peer: PeerId);
}

/// Monotonic millisecond clock.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct FixedTimeSource(u64);
///
/// impl TimeSource for FixedTimeSource {
///     fn now_ms(&self) -> u64 {
///         self.0
///     }
/// }
/// ```
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Abstract interface for configuration loading.
pub trait ConfigProvider: Send + Sync {
    fn sig_shares_config(&self) -> Result<SigSharesConfig, ConfigError>;
}
