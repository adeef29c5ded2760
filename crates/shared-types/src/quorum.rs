//! # Quorum View
//!
//! Read-only description of a signing quorum as handed out by the quorum
//! registry. Member order is significant: a member's position is its share
//! index on the wire.

use crate::entities::{hash_hex, Hash, LlmqType};
use serde::{Deserialize, Serialize};

/// Static parameters of a quorum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumParams {
    pub llmq_type: LlmqType,
    /// Human readable name, used in logs only.
    pub name: String,
    /// Number of shares required to reconstruct a signature.
    pub threshold: usize,
    /// How many distinct members are tried as recovery targets before the
    /// local node stops pushing its share.
    pub recovery_members: usize,
}

/// One quorum member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumMember {
    /// Registration hash identifying the member's masternode.
    pub pro_tx_hash: Hash,
    /// False if the member was excluded during quorum formation.
    pub valid: bool,
}

/// A quorum together with its ordered membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub params: QuorumParams,
    pub quorum_hash: Hash,
    pub members: Vec<QuorumMember>,
}

impl Quorum {
    pub fn new(params: QuorumParams, quorum_hash: Hash, members: Vec<QuorumMember>) -> Self {
        Self {
            params,
            quorum_hash,
            members,
        }
    }

    pub fn llmq_type(&self) -> LlmqType {
        self.params.llmq_type
    }

    /// Number of member slots; every share inventory for this quorum has
    /// exactly this many bits.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn threshold(&self) -> usize {
        self.params.threshold
    }

    pub fn member(&self, index: u16) -> Option<&QuorumMember> {
        self.members.get(usize::from(index))
    }

    /// True if `index` is in range and the member is marked valid.
    pub fn is_valid_member(&self, index: u16) -> bool {
        self.member(index).is_some_and(|m| m.valid)
    }

    pub fn member_index(&self, pro_tx_hash: &Hash) -> Option<u16> {
        self.members
            .iter()
            .position(|m| &m.pro_tx_hash == pro_tx_hash)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        format!("{}:{}", self.params.name, hash_hex(&self.quorum_hash))
    }
}
