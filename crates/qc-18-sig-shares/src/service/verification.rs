//! Verification of pending shares and merging into the share store.

use super::state::ManagerState;
use super::SigSharesManager;
use crate::domain::{RecoveryAttempt, SigShare, SignHash};
use crate::events::ProtocolViolation;
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use rand::seq::SliceRandom;
use shared_types::{hash_hex, Hash, LlmqType, PeerId, Quorum};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    /// Verifies one fair batch of pending shares. Returns true if anything
    /// was taken from the pending maps.
    pub(super) fn process_pending_sig_shares(&self, now_ms: u64) -> bool {
        let by_peer = self.collect_pending_sig_shares_to_verify();
        if by_peer.is_empty() {
            return false;
        }

        let mut quorums: HashMap<(LlmqType, Hash), Option<Arc<Quorum>>> = HashMap::new();
        for share in by_peer.values().flatten() {
            quorums
                .entry((share.llmq_type, share.quorum_hash))
                .or_insert_with(|| self.quorums.get_quorum(share.llmq_type, &share.quorum_hash));
        }

        for (peer, shares) in by_peer {
            let mut verified = Vec::with_capacity(shares.len());
            let mut bad_member = None;
            for share in shares {
                let quorum = quorums
                    .get(&(share.llmq_type, share.quorum_hash))
                    .cloned()
                    .flatten();
                let Some(quorum) = quorum else {
                    debug!(
                        %peer,
                        sign_hash = %hash_hex(&share.sign_hash()),
                        "[qc-18] Quorum of pending share not found, dropping"
                    );
                    continue;
                };
                if !share.sig_share.is_well_formed() || !self.quorums.verify_share(&quorum, &share) {
                    bad_member = Some(share.quorum_member);
                    break;
                }
                verified.push((share, quorum));
            }

            if let Some(member) = bad_member {
                warn!(%peer, member, "[qc-18] Invalid signature share");
                self.state.lock().metrics.shares_invalid += 1;
                self.ban_peer(peer, &ProtocolViolation::InvalidSignatureShare { member });
                continue;
            }
            for (share, quorum) in verified {
                self.process_sig_share(share, &quorum, now_ms);
            }
        }
        true
    }

    /// Takes up to `max_verify_batch_sessions` distinct (peer, sign hash)
    /// pairs worth of shares, one share per peer per round in random peer
    /// order, so one peer's large batch cannot starve the others.
    fn collect_pending_sig_shares_to_verify(&self) -> HashMap<PeerId, Vec<SigShare>> {
        let max_sessions = self.config.max_verify_batch_sessions;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut peers: Vec<PeerId> = state
            .peers
            .iter()
            .filter(|(_, s)| !s.banned && !s.pending_incoming.is_empty())
            .map(|(peer, _)| *peer)
            .collect();
        peers.shuffle(&mut rand::thread_rng());

        let mut unique_sessions: HashSet<(PeerId, SignHash)> = HashSet::new();
        let mut collected: HashMap<PeerId, Vec<SigShare>> = HashMap::new();
        while !peers.is_empty() && unique_sessions.len() < max_sessions {
            peers.retain(|peer| {
                if unique_sessions.len() >= max_sessions {
                    return true;
                }
                let Some(peer_state) = state.peers.get_mut(peer) else {
                    return false;
                };
                loop {
                    let Some(key) = peer_state.pending_incoming.first().map(|(key, _)| key) else {
                        return false;
                    };
                    let Some(share) = peer_state.pending_incoming.erase(&key) else {
                        return false;
                    };
                    if state.sig_shares.has(&key) || state.recovered.contains(&key.0) {
                        continue;
                    }
                    unique_sessions.insert((*peer, key.0));
                    collected.entry(*peer).or_default().push(share);
                    return !peer_state.pending_incoming.is_empty();
                }
            });
        }
        collected
    }

    pub(super) fn process_sig_share(&self, share: SigShare, quorum: &Arc<Quorum>, now_ms: u64) {
        merge_sig_share(&mut self.state.lock(), share, quorum, now_ms);
    }
}

/// Merges a verified share (or our own) exactly once, queues it for
/// announcement and arms recovery once the threshold is reached. Returns
/// false if the share was already held or its sign hash is recovered.
pub(super) fn merge_sig_share(
    state: &mut ManagerState,
    share: SigShare,
    quorum: &Arc<Quorum>,
    now_ms: u64,
) -> bool {
    let key = share.key();
    let sign_hash = key.0;
    if state.is_recovered(&sign_hash) {
        return false;
    }
    if !state.sig_shares.add(key, share.clone()) {
        return false;
    }
    state.requested.erase(&key);
    state.to_announce.add(key, Arc::clone(quorum));
    state.time_seen.insert(sign_hash, now_ms);
    state.metrics.shares_accepted += 1;

    let count = state.sig_shares.count_for_sign_hash(&sign_hash);
    trace!(
        sign_hash = %hash_hex(&sign_hash),
        member = key.1,
        count,
        threshold = quorum.threshold(),
        "[qc-18] Share accepted"
    );
    if count < quorum.threshold() {
        return true;
    }
    match state.recovery.entry(sign_hash) {
        Entry::Vacant(slot) => {
            debug!(
                sign_hash = %hash_hex(&sign_hash),
                count,
                "[qc-18] Threshold reached, recovery armed"
            );
            slot.insert(RecoveryAttempt::armed(share, Arc::clone(quorum), now_ms));
        }
        Entry::Occupied(mut slot) => {
            let attempt = slot.get_mut();
            if !attempt.ready {
                attempt.ready = true;
                attempt.next_attempt_ms = attempt.next_attempt_ms.min(now_ms);
            }
        }
    }
    true
}
