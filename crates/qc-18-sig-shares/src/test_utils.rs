//! In-memory collaborators for tests.
//!
//! Signatures are deterministic digests, not real BLS: a member's share for
//! a sign hash is `sha256d(sign_hash ‖ member)` stretched to 96 bytes, and
//! the recovered signature is derived from the sign hash alone.

use crate::domain::{
    sha256d, LazySignature, SigShare, SignHash, SignId, SIGNATURE_SIZE,
};
use crate::events::SigSharesMessage;
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, LlmqType, PeerId, Quorum, QuorumError, QuorumMember, QuorumParams};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub const TEST_LLMQ_TYPE: LlmqType = LlmqType(1);
pub const TEST_QUORUM_HASH: Hash = [9u8; 32];

/// Quorum of `size` valid members with pro_tx_hash `[i + 1; 32]`.
pub fn test_quorum(size: usize, threshold: usize) -> Quorum {
    let members = (0..size)
        .map(|i| QuorumMember {
            pro_tx_hash: [(i as u8).wrapping_add(1); 32],
            valid: true,
        })
        .collect();
    Quorum::new(
        QuorumParams {
            llmq_type: TEST_LLMQ_TYPE,
            name: "llmq_test".into(),
            threshold,
            recovery_members: size.min(3),
        },
        TEST_QUORUM_HASH,
        members,
    )
}

fn stretch(seed: Hash) -> LazySignature {
    let mut bytes = Vec::with_capacity(SIGNATURE_SIZE);
    while bytes.len() < SIGNATURE_SIZE {
        bytes.extend_from_slice(&seed);
    }
    LazySignature::from_bytes(bytes)
}

/// The share `member` would produce for `sign_hash`.
pub fn share_signature(sign_hash: &SignHash, member: u16) -> LazySignature {
    let mut buf = sign_hash.to_vec();
    buf.extend_from_slice(&member.to_le_bytes());
    stretch(sha256d(&buf))
}

/// The signature any `threshold` shares for `sign_hash` recover to.
pub fn recovered_signature(sign_hash: &SignHash) -> LazySignature {
    let mut buf = b"recovered".to_vec();
    buf.extend_from_slice(sign_hash);
    stretch(sha256d(&buf))
}

pub fn valid_share(sign_id: &SignId, member: u16) -> SigShare {
    SigShare::new(sign_id, member, share_signature(&sign_id.sign_hash(), member))
}

/// Settable millisecond clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Quorum registry with digest-based "cryptography".
#[derive(Default)]
pub struct MockQuorumManager {
    quorums: RwLock<HashMap<(LlmqType, Hash), Arc<Quorum>>>,
    inactive: RwLock<HashSet<(LlmqType, Hash)>>,
    local_member: RwLock<Option<u16>>,
    /// Members whose shares never verify.
    invalid_members: RwLock<HashSet<u16>>,
    failing_recoveries: AtomicU32,
    recover_calls: AtomicU32,
}

impl MockQuorumManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `quorum` as active and returns the shared handle.
    pub fn add_quorum(&self, quorum: Quorum) -> Arc<Quorum> {
        let quorum = Arc::new(quorum);
        self.quorums
            .write()
            .insert((quorum.llmq_type(), quorum.quorum_hash), Arc::clone(&quorum));
        quorum
    }

    pub fn deactivate(&self, quorum: &Quorum) {
        self.inactive
            .write()
            .insert((quorum.llmq_type(), quorum.quorum_hash));
    }

    pub fn set_local_member(&self, member: Option<u16>) {
        *self.local_member.write() = member;
    }

    pub fn mark_invalid(&self, member: u16) {
        self.invalid_members.write().insert(member);
    }

    /// The next `count` recoveries fail.
    pub fn fail_next_recoveries(&self, count: u32) {
        self.failing_recoveries.store(count, Ordering::SeqCst);
    }

    pub fn recover_calls(&self) -> u32 {
        self.recover_calls.load(Ordering::SeqCst)
    }
}

impl QuorumManager for MockQuorumManager {
    fn get_quorum(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> Option<Arc<Quorum>> {
        self.quorums.read().get(&(llmq_type, *quorum_hash)).cloned()
    }

    fn is_quorum_active(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> bool {
        self.quorums.read().contains_key(&(llmq_type, *quorum_hash))
            && !self.inactive.read().contains(&(llmq_type, *quorum_hash))
    }

    fn local_member_index(&self, _quorum: &Quorum) -> Option<u16> {
        *self.local_member.read()
    }

    fn sign_share(&self, quorum: &Quorum, sign_id: &SignId) -> Result<SigShare, QuorumError> {
        let member = self
            .local_member_index(quorum)
            .ok_or_else(|| QuorumError::NotAMember(quorum.describe()))?;
        Ok(valid_share(sign_id, member))
    }

    fn verify_share(&self, _quorum: &Quorum, share: &SigShare) -> bool {
        !self.invalid_members.read().contains(&share.quorum_member)
            && share.sig_share == share_signature(&share.sign_hash(), share.quorum_member)
    }

    fn recover_signature(
        &self,
        quorum: &Quorum,
        shares: &[SigShare],
    ) -> Result<LazySignature, QuorumError> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        if shares.len() < quorum.threshold() {
            return Err(QuorumError::InsufficientShares {
                have: shares.len(),
                need: quorum.threshold(),
            });
        }
        let failing = self.failing_recoveries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_recoveries.store(failing - 1, Ordering::SeqCst);
            return Err(QuorumError::RecoveryFailed("injected failure".into()));
        }
        Ok(recovered_signature(&shares[0].sign_hash()))
    }
}

/// Peer layer that records everything sent through it.
#[derive(Default)]
pub struct MockNetwork {
    connected: RwLock<Vec<PeerId>>,
    member_peers: RwLock<HashMap<Hash, PeerId>>,
    quorum_peers: RwLock<HashMap<(LlmqType, Hash), Vec<PeerId>>>,
    sent: Mutex<Vec<(PeerId, SigSharesMessage)>>,
    misbehaving: Mutex<Vec<(PeerId, u32)>>,
    disconnected: Mutex<Vec<PeerId>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, peer: PeerId) {
        let mut connected = self.connected.write();
        if !connected.contains(&peer) {
            connected.push(peer);
        }
    }

    pub fn drop_peer(&self, peer: PeerId) {
        self.connected.write().retain(|p| *p != peer);
    }

    /// Routes traffic for the member with `pro_tx_hash` to `peer`.
    pub fn map_member(&self, pro_tx_hash: Hash, peer: PeerId) {
        self.member_peers.write().insert(pro_tx_hash, peer);
    }

    /// Limits the quorum's intra-quorum peers. Unset quorums treat every
    /// connected peer as one.
    pub fn set_quorum_peers(&self, quorum: &Quorum, peers: &[PeerId]) {
        self.quorum_peers
            .write()
            .insert((quorum.llmq_type(), quorum.quorum_hash), peers.to_vec());
    }

    /// Drains the messages sent so far.
    pub fn take_sent(&self) -> Vec<(PeerId, SigSharesMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn misbehaving_reports(&self) -> Vec<(PeerId, u32)> {
        self.misbehaving.lock().clone()
    }

    pub fn disconnected(&self) -> Vec<PeerId> {
        self.disconnected.lock().clone()
    }
}

impl PeerNetwork for MockNetwork {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.read().clone()
    }

    fn quorum_peers(&self, llmq_type: LlmqType, quorum_hash: &Hash) -> Vec<PeerId> {
        match self.quorum_peers.read().get(&(llmq_type, *quorum_hash)) {
            Some(peers) => peers.clone(),
            None => self.connected_peers(),
        }
    }

    fn member_peer(&self, pro_tx_hash: &Hash) -> Option<PeerId> {
        self.member_peers.read().get(pro_tx_hash).copied()
    }

    fn send(&self, peer: PeerId, message: SigSharesMessage) {
        self.sent.lock().push((peer, message));
    }

    fn misbehaving(&self, peer: PeerId, score: u32) {
        self.misbehaving.lock().push((peer, score));
    }

    fn disconnect(&self, peer: PeerId) {
        self.disconnected.lock().push(peer);
        self.drop_peer(peer);
    }
}
