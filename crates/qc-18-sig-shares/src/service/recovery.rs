//! Recovery attempts: concentrated share pushes and signature
//! reconstruction.

use super::SigSharesManager;
use crate::domain::{
    select_member_for_recovery, RecoveredSig, SigShare, SigShareMap, SignHash, SignId,
};
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use shared_types::{hash_hex, Quorum};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempt taken off the schedule for this iteration.
struct DueAttempt {
    sign_id: SignId,
    sign_hash: SignHash,
    anchor: SigShare,
    anchor_is_local: bool,
    quorum: Arc<Quorum>,
    attempt: u32,
    /// First `threshold` shares, if enough are held.
    shares: Option<Vec<SigShare>>,
}

/// The `threshold` shares with the lowest member indices.
fn threshold_shares(
    store: &SigShareMap<SigShare>,
    sign_hash: &SignHash,
    threshold: usize,
) -> Option<Vec<SigShare>> {
    let held = store.get_all_for_sign_hash(sign_hash)?;
    if held.len() < threshold {
        return None;
    }
    let mut shares: Vec<&SigShare> = held.values().collect();
    shares.sort_by_key(|share| share.quorum_member);
    Some(shares.into_iter().take(threshold).cloned().collect())
}

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    pub(super) fn process_recovery(&self, now_ms: u64) -> bool {
        let due = self.collect_due_attempts(now_ms);
        if due.is_empty() {
            return false;
        }
        for attempt in due {
            if attempt.anchor_is_local {
                self.push_share_to_recovery_member(&attempt);
            }
            if let Some(shares) = attempt.shares {
                self.try_recover(&attempt.quorum, &attempt.sign_id, shares, now_ms);
            }
        }
        true
    }

    fn collect_due_attempts(&self, now_ms: u64) -> Vec<DueAttempt> {
        let initial = self.config.recovery_initial_delay_ms;
        let max = self.config.recovery_max_delay_ms;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut due = Vec::new();
        for (sign_hash, record) in state.recovery.iter_mut() {
            if !record.is_due(now_ms) {
                continue;
            }
            let attempt = record.advance(now_ms, initial, max);
            let shares = if record.ready {
                threshold_shares(&state.sig_shares, sign_hash, record.quorum.threshold())
            } else {
                None
            };
            due.push(DueAttempt {
                sign_id: record.anchor.sign_id(),
                sign_hash: *sign_hash,
                anchor: record.anchor.clone(),
                anchor_is_local: record.anchor_is_local,
                quorum: Arc::clone(&record.quorum),
                attempt,
                shares,
            });
        }
        state.metrics.recovery_attempts += due.iter().filter(|d| d.shares.is_some()).count() as u64;
        due
    }

    /// Sends our share to the member chosen for this attempt, unless that
    /// member is us or the attempt exceeds the quorum's recovery members.
    fn push_share_to_recovery_member(&self, due: &DueAttempt) {
        let quorum = &due.quorum;
        if usize::try_from(due.attempt).map_or(true, |a| a >= quorum.params.recovery_members) {
            return;
        }
        let Some(member) = select_member_for_recovery(quorum, &due.sign_hash, due.attempt) else {
            return;
        };
        if member == due.anchor.quorum_member {
            return;
        }
        let Some(target) = quorum.member(member) else {
            return;
        };
        let Some(peer) = self.network.member_peer(&target.pro_tx_hash) else {
            debug!(
                sign_hash = %hash_hex(&due.sign_hash),
                member,
                attempt = due.attempt,
                "[qc-18] Recovery member not connected"
            );
            return;
        };

        debug!(
            %peer,
            sign_hash = %hash_hex(&due.sign_hash),
            member,
            attempt = due.attempt,
            "[qc-18] Pushing own share to recovery member"
        );
        let mut state = self.state.lock();
        if state.is_banned(peer) {
            return;
        }
        state.to_push.entry(peer).or_default().push(due.anchor.clone());
    }

    fn try_recover(&self, quorum: &Arc<Quorum>, sign_id: &SignId, shares: Vec<SigShare>, now_ms: u64) {
        let sign_hash = sign_id.sign_hash();
        match self.quorums.recover_signature(quorum, &shares) {
            Ok(sig) => {
                {
                    let mut state = self.state.lock();
                    if state.is_recovered(&sign_hash) {
                        return;
                    }
                    state.complete(&sign_hash, now_ms);
                    state.metrics.signatures_recovered += 1;
                }
                info!(
                    sign_hash = %hash_hex(&sign_hash),
                    quorum = %quorum.describe(),
                    shares = shares.len(),
                    "[qc-18] Recovered threshold signature"
                );
                self.listeners.notify(&RecoveredSig::new(sign_id, sig));
            }
            Err(e) => {
                warn!(
                    sign_hash = %hash_hex(&sign_hash),
                    error = %e,
                    "[qc-18] Signature recovery failed, retrying next window"
                );
            }
        }
    }
}
