//! Core entities for signature share exchange.

use sha2::{Digest, Sha256};
use shared_types::{hash_hex, Hash, LlmqType};
use std::fmt;

/// Size of a serialized BLS signature (and signature share).
pub const SIGNATURE_SIZE: usize = 96;

/// Session id value meaning "no session id assigned".
pub const NO_SESSION_ID: u32 = u32::MAX;

/// Primary key of a signing session.
pub type SignHash = Hash;

/// Identifies one share: the sign hash plus the member index that produced it.
pub type SigShareKey = (SignHash, u16);

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// `SHA256d(llmq_type ‖ quorum_hash ‖ id ‖ msg_hash)`.
pub fn build_sign_hash(
    llmq_type: LlmqType,
    quorum_hash: &Hash,
    id: &Hash,
    msg_hash: &Hash,
) -> SignHash {
    let mut buf = Vec::with_capacity(1 + 32 * 3);
    buf.push(llmq_type.0);
    buf.extend_from_slice(quorum_hash);
    buf.extend_from_slice(id);
    buf.extend_from_slice(msg_hash);
    sha256d(&buf)
}

/// Everything that distinguishes one signing request from another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignId {
    pub llmq_type: LlmqType,
    pub quorum_hash: Hash,
    pub id: Hash,
    pub msg_hash: Hash,
}

impl SignId {
    pub fn new(llmq_type: LlmqType, quorum_hash: Hash, id: Hash, msg_hash: Hash) -> Self {
        Self {
            llmq_type,
            quorum_hash,
            id,
            msg_hash,
        }
    }

    pub fn sign_hash(&self) -> SignHash {
        build_sign_hash(self.llmq_type, &self.quorum_hash, &self.id, &self.msg_hash)
    }
}

impl fmt::Display for SignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "llmqType={}, quorumHash={}, id={}, msgHash={}",
            self.llmq_type,
            hash_hex(&self.quorum_hash),
            hash_hex(&self.id),
            hash_hex(&self.msg_hash)
        )
    }
}

/// A serialized BLS signature that has not been decoded yet.
///
/// Decoding is deferred to the verifier. `is_well_formed` only checks the
/// shape of the blob.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LazySignature {
    bytes: Vec<u8>,
}

impl LazySignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Correct length and not the all-zero (null) signature.
    pub fn is_well_formed(&self) -> bool {
        self.bytes.len() == SIGNATURE_SIZE && self.bytes.iter().any(|b| *b != 0)
    }
}

impl fmt::Debug for LazySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.bytes[..self.bytes.len().min(8)];
        write!(f, "LazySignature({}..)", hex::encode(prefix))
    }
}

/// A partial signature produced by one quorum member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigShare {
    pub llmq_type: LlmqType,
    pub quorum_hash: Hash,
    pub quorum_member: u16,
    pub id: Hash,
    pub msg_hash: Hash,
    pub sig_share: LazySignature,
    key: SigShareKey,
}

impl SigShare {
    pub fn new(sign_id: &SignId, quorum_member: u16, sig_share: LazySignature) -> Self {
        Self {
            llmq_type: sign_id.llmq_type,
            quorum_hash: sign_id.quorum_hash,
            quorum_member,
            id: sign_id.id,
            msg_hash: sign_id.msg_hash,
            sig_share,
            key: (sign_id.sign_hash(), quorum_member),
        }
    }

    pub fn key(&self) -> SigShareKey {
        self.key
    }

    pub fn sign_hash(&self) -> SignHash {
        self.key.0
    }

    pub fn sign_id(&self) -> SignId {
        SignId::new(self.llmq_type, self.quorum_hash, self.id, self.msg_hash)
    }
}

/// Announces the per-peer session id the sender will use for a sign hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAnnounce {
    pub session_id: u32,
    pub sign_id: SignId,
}

impl fmt::Display for SessionAnnounce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sessionId={}, {}", self.session_id, self.sign_id)
    }
}

/// Shares for one session, answering a `qgetsigs` request.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BatchedSigShares {
    pub session_id: u32,
    pub sig_shares: Vec<(u16, LazySignature)>,
}

impl BatchedSigShares {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            sig_shares: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sig_shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sig_shares.is_empty()
    }

    /// Member indices as `(1,4,7)` for logs.
    pub fn to_inv_string(&self) -> String {
        let members: Vec<String> = self
            .sig_shares
            .iter()
            .map(|(member, _)| member.to_string())
            .collect();
        format!("({})", members.join(","))
    }
}

/// A reconstructed quorum signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredSig {
    pub llmq_type: LlmqType,
    pub quorum_hash: Hash,
    pub id: Hash,
    pub msg_hash: Hash,
    pub sig: LazySignature,
}

impl RecoveredSig {
    pub fn new(sign_id: &SignId, sig: LazySignature) -> Self {
        Self {
            llmq_type: sign_id.llmq_type,
            quorum_hash: sign_id.quorum_hash,
            id: sign_id.id,
            msg_hash: sign_id.msg_hash,
            sig,
        }
    }

    pub fn sign_hash(&self) -> SignHash {
        build_sign_hash(self.llmq_type, &self.quorum_hash, &self.id, &self.msg_hash)
    }
}
