//! Periodic cleanup of inactive, timed out and disconnected state.

use super::SigSharesManager;
use crate::domain::SignHash;
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use shared_types::{hash_hex, Hash, LlmqType, PeerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    /// Runs at most once per `cleanup_interval_ms`.
    pub(super) fn cleanup(&self, now_ms: u64) {
        {
            let state = self.state.lock();
            if now_ms.saturating_sub(state.last_cleanup_ms) < self.config.cleanup_interval_ms {
                return;
            }
        }
        self.remove_inactive_quorum_sessions();
        self.remove_timed_out_sessions(now_ms);
        self.remove_disconnected_peers();
        self.state.lock().last_cleanup_ms = now_ms;
    }

    fn remove_inactive_quorum_sessions(&self) {
        let in_use: HashMap<SignHash, (LlmqType, Hash)> = {
            let state = self.state.lock();
            let mut in_use = HashMap::new();
            for (key, share) in state.sig_shares.iter() {
                in_use
                    .entry(key.0)
                    .or_insert((share.llmq_type, share.quorum_hash));
            }
            for (sign_hash, attempt) in &state.recovery {
                in_use
                    .entry(*sign_hash)
                    .or_insert((attempt.quorum.llmq_type(), attempt.quorum.quorum_hash));
            }
            for peer_state in state.peers.values() {
                for session in peer_state.sessions() {
                    in_use
                        .entry(session.sign_hash)
                        .or_insert((session.sign_id.llmq_type, session.sign_id.quorum_hash));
                }
            }
            in_use
        };

        let quorums: HashSet<(LlmqType, Hash)> = in_use.values().copied().collect();
        let inactive: HashSet<(LlmqType, Hash)> = quorums
            .into_iter()
            .filter(|(llmq_type, quorum_hash)| !self.quorums.is_quorum_active(*llmq_type, quorum_hash))
            .collect();
        if inactive.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let mut removed = 0usize;
        for (sign_hash, quorum_key) in &in_use {
            if inactive.contains(quorum_key) {
                state.remove_sig_shares_for_session(sign_hash);
                removed += 1;
            }
        }
        debug!(
            sessions = removed,
            quorums = inactive.len(),
            "[qc-18] Dropped sessions of inactive quorums"
        );
    }

    fn remove_timed_out_sessions(&self, now_ms: u64) {
        let timeout = self.config.session_timeout_ms;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let timed_out: Vec<SignHash> = state
            .time_seen
            .iter()
            .filter(|(_, seen)| now_ms.saturating_sub(**seen) >= timeout)
            .map(|(sign_hash, _)| *sign_hash)
            .collect();

        for sign_hash in timed_out {
            let have = state.sig_shares.count_for_sign_hash(&sign_hash);
            if have > 0 {
                let quorum = state
                    .recovery
                    .get(&sign_hash)
                    .map(|attempt| Arc::clone(&attempt.quorum))
                    .or_else(|| {
                        state.peers.values().find_map(|peer_state| {
                            peer_state
                                .session_by_sign_hash(&sign_hash)
                                .map(|session| Arc::clone(&session.quorum))
                        })
                    });
                let missing: Vec<u16> = quorum
                    .map(|quorum| {
                        (0..quorum.size())
                            .filter_map(|member| u16::try_from(member).ok())
                            .filter(|member| !state.sig_shares.has(&(sign_hash, *member)))
                            .collect()
                    })
                    .unwrap_or_default();
                warn!(
                    sign_hash = %hash_hex(&sign_hash),
                    have,
                    missing = ?missing,
                    "[qc-18] Signing session timed out"
                );
            } else {
                debug!(
                    sign_hash = %hash_hex(&sign_hash),
                    "[qc-18] Session without shares timed out"
                );
            }
            state.remove_sig_shares_for_session(&sign_hash);
            state.metrics.sessions_timed_out += 1;
        }
    }

    fn remove_disconnected_peers(&self) {
        let connected: HashSet<PeerId> = self.network.connected_peers().into_iter().collect();
        let mut state = self.state.lock();
        let gone: Vec<PeerId> = state
            .peers
            .keys()
            .filter(|peer| !connected.contains(peer))
            .copied()
            .collect();
        for peer in gone {
            debug!(%peer, "[qc-18] Dropping state of disconnected peer");
            state.remove_peer(peer);
        }
    }
}
