//! # Signature Shares Service
//!
//! The coordinator-side implementation of share exchange.
//!
//! ## Architecture
//!
//! The service implements [`SigSharesApi`]. Callers only enqueue work
//! (`process_message`, `request_signature`, `request_signature_async`) and
//! wake the coordinator;
//! all index mutation happens in [`SigSharesManager::run_iteration`], which
//! the worker task calls in a loop.
//!
//! It depends on three outbound ports:
//! - [`QuorumManager`]: quorum lookups and all cryptography
//! - [`PeerNetwork`]: sending, misbehavior reports, disconnects
//! - [`TimeSource`]: millisecond clock
//!
//! ## Iteration
//!
//! 1. Disconnect peers banned during the previous iteration
//! 2. Decode and apply queued wire messages
//! 3. Sign queued local requests
//! 4. Verify a fair batch of pending shares
//! 5. Run due recovery attempts
//! 6. Send announcements, requests, batches and pushes
//! 7. Drop inactive, timed out and disconnected state

mod cleanup;
mod inbound;
mod listeners;
mod outbound;
mod recovery;
pub(crate) mod state;
mod verification;

#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::{
    RecoveryAttempt, RecoverySchedule, SigShareKey, SigSharesConfig, SigSharesMetrics, SignHash,
    SignId, NO_SESSION_ID,
};
use crate::events::{ProtocolViolation, SigSharesError, SigSharesMessage};
use crate::ports::inbound::{ListenerId, RecoveredSigListener, SigSharesApi};
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use shared_types::{hash_hex, Hash, PeerId, Quorum};

use inbound::InboundMessage;
use listeners::ListenerRegistry;
use state::ManagerState;

/// A signing request queued by `request_signature_async`.
struct PendingSign {
    quorum: Arc<Quorum>,
    id: Hash,
    msg_hash: Hash,
}

/// Signature Shares Manager.
///
/// ## Thread Safety
///
/// Shared across tasks via `Arc`. State sits behind one coarse
/// `parking_lot::Mutex`; collaborator calls (verification, recovery, sends)
/// are made with the lock released.
pub struct SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    config: SigSharesConfig,
    quorums: Arc<Q>,
    network: Arc<N>,
    clock: Arc<T>,
    state: Mutex<ManagerState>,
    inbound: Mutex<VecDeque<InboundMessage>>,
    pending_signs: Mutex<Vec<PendingSign>>,
    listeners: ListenerRegistry,
    wakeup: Notify,
}

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    pub fn new(
        config: SigSharesConfig,
        quorums: Arc<Q>,
        network: Arc<N>,
        clock: Arc<T>,
    ) -> Result<Self, SigSharesError> {
        config.validate()?;
        let state = ManagerState::new(
            config.max_sessions_per_peer,
            config.recovered_cache_size,
            clock.now_ms(),
        );
        Ok(Self {
            config,
            quorums,
            network,
            clock,
            state: Mutex::new(state),
            inbound: Mutex::new(VecDeque::new()),
            pending_signs: Mutex::new(Vec::new()),
            listeners: ListenerRegistry::new(),
            wakeup: Notify::new(),
        })
    }

    pub fn config(&self) -> &SigSharesConfig {
        &self.config
    }

    /// Runs one coordinator pass. Returns true if anything was processed or
    /// sent, in which case the caller should iterate again without sleeping.
    pub fn run_iteration(&self) -> bool {
        let now_ms = self.clock.now_ms();
        self.remove_banned_peers();
        let mut did_work = self.process_inbound_queue(now_ms);
        did_work |= self.sign_pending_requests(now_ms);
        did_work |= self.process_pending_sig_shares(now_ms);
        did_work |= self.process_recovery(now_ms);
        did_work |= self.send_messages(now_ms);
        self.cleanup(now_ms);
        did_work
    }

    /// Time until the next scheduled piece of work (recovery attempt,
    /// cleanup), capped by the idle poll interval.
    pub fn next_wakeup_delay(&self) -> Duration {
        if !self.inbound.lock().is_empty() || !self.pending_signs.lock().is_empty() {
            return Duration::ZERO;
        }
        let now_ms = self.clock.now_ms();
        let state = self.state.lock();
        let mut next_ms = now_ms.saturating_add(self.config.idle_poll_ms);
        next_ms = next_ms.min(
            state
                .last_cleanup_ms
                .saturating_add(self.config.cleanup_interval_ms),
        );
        if let Some(due) = state.recovery.values().map(|a| a.next_attempt_ms).min() {
            next_ms = next_ms.min(due);
        }
        Duration::from_millis(next_ms.saturating_sub(now_ms))
    }

    /// Resolves when new work was queued.
    pub fn notified(&self) -> Notified<'_> {
        self.wakeup.notified()
    }

    pub fn metrics(&self) -> SigSharesMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn recovery_schedule(&self, sign_hash: &SignHash) -> Option<RecoverySchedule> {
        self.state
            .lock()
            .recovery
            .get(sign_hash)
            .map(|attempt| RecoverySchedule {
                sign_hash: *sign_hash,
                next_attempt_ms: attempt.next_attempt_ms,
                attempt: attempt.attempt,
                ready: attempt.ready,
            })
    }

    pub fn has_sig_share(&self, key: &SigShareKey) -> bool {
        self.state.lock().sig_shares.has(key)
    }

    pub fn sig_share_count(&self, sign_hash: &SignHash) -> usize {
        self.state.lock().sig_shares.count_for_sign_hash(sign_hash)
    }

    /// Entries in any index that still refer to `sign_hash`.
    pub fn session_footprint(&self, sign_hash: &SignHash) -> usize {
        self.state.lock().footprint(sign_hash)
    }

    pub fn is_recovered(&self, sign_hash: &SignHash) -> bool {
        self.state.lock().is_recovered(sign_hash)
    }

    pub fn is_peer_banned(&self, peer: PeerId) -> bool {
        self.state.lock().is_banned(peer)
    }

    pub fn tracked_peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    // ===== INTERNAL HELPERS =====

    /// Reports misbehavior once and flags the peer; its state is dropped and
    /// the connection closed at the start of the next iteration.
    pub(super) fn ban_peer(&self, peer: PeerId, violation: &ProtocolViolation) {
        {
            let mut state = self.state.lock();
            if state.is_banned(peer) {
                return;
            }
            state.ban_peer(peer);
            state.metrics.peers_banned += 1;
        }
        warn!(%peer, reason = %violation, "[qc-18] Banning peer");
        self.network.misbehaving(peer, self.config.ban_score);
    }

    fn remove_banned_peers(&self) {
        let banned = self.state.lock().remove_banned_peers();
        for peer in banned {
            debug!(%peer, "[qc-18] Disconnecting banned peer");
            self.network.disconnect(peer);
        }
    }

    fn sign_pending_requests(&self, now_ms: u64) -> bool {
        let pending = std::mem::take(&mut *self.pending_signs.lock());
        if pending.is_empty() {
            return false;
        }
        for request in pending {
            if let Err(e) = self.sign_and_stage(&request.quorum, request.id, request.msg_hash, now_ms)
            {
                warn!(
                    quorum = %request.quorum.describe(),
                    error = %e,
                    "[qc-18] Failed to sign queued request"
                );
            }
        }
        true
    }

    /// Checks that we can sign for `sign_id` in `quorum`; returns our member
    /// index.
    fn check_can_sign(&self, quorum: &Quorum, sign_id: &SignId) -> Result<u16, SigSharesError> {
        let sign_hash = sign_id.sign_hash();
        if self.state.lock().is_recovered(&sign_hash) {
            return Err(SigSharesError::AlreadyRecovered(hash_hex(&sign_hash)));
        }
        if !self
            .quorums
            .is_quorum_active(quorum.llmq_type(), &quorum.quorum_hash)
        {
            return Err(SigSharesError::UnknownQuorum(quorum.describe()));
        }
        self.quorums
            .local_member_index(quorum)
            .ok_or_else(|| SigSharesError::NotAMember(quorum.describe()))
    }

    /// Creates our share and merges it like a verified network share. The
    /// recovery record is anchored on our share so it gets pushed to the
    /// recovery member.
    ///
    /// The recovered check, the merge and the anchoring happen under one
    /// lock so a concurrent completion cannot leave a record behind.
    fn sign_and_stage(
        &self,
        quorum: &Arc<Quorum>,
        id: Hash,
        msg_hash: Hash,
        now_ms: u64,
    ) -> Result<SigShareKey, SigSharesError> {
        let sign_id = SignId::new(quorum.llmq_type(), quorum.quorum_hash, id, msg_hash);
        let sign_hash = sign_id.sign_hash();
        self.check_can_sign(quorum, &sign_id)?;

        let share = self.quorums.sign_share(quorum, &sign_id)?;
        let key = share.key();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.is_recovered(&sign_hash) {
            return Err(SigSharesError::AlreadyRecovered(hash_hex(&sign_hash)));
        }
        verification::merge_sig_share(state, share.clone(), quorum, now_ms);
        match state.recovery.entry(sign_hash) {
            Entry::Occupied(mut slot) => {
                let attempt = slot.get_mut();
                attempt.anchor = share;
                attempt.anchor_is_local = true;
            }
            Entry::Vacant(slot) => {
                slot.insert(RecoveryAttempt::for_local_share(
                    share,
                    Arc::clone(quorum),
                    now_ms,
                ));
            }
        }
        drop(guard);

        debug!(
            sign_hash = %hash_hex(&sign_hash),
            member = key.1,
            quorum = %quorum.describe(),
            "[qc-18] Created own signature share"
        );
        Ok(key)
    }
}

impl<Q, N, T> SigSharesApi for SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    fn request_signature(
        &self,
        quorum: Arc<Quorum>,
        id: Hash,
        msg_hash: Hash,
    ) -> Result<SigShareKey, SigSharesError> {
        let sign_id = SignId::new(quorum.llmq_type(), quorum.quorum_hash, id, msg_hash);
        let member = self.check_can_sign(&quorum, &sign_id)?;
        self.pending_signs.lock().push(PendingSign {
            quorum,
            id,
            msg_hash,
        });
        self.wakeup.notify_one();
        Ok((sign_id.sign_hash(), member))
    }

    fn request_signature_async(&self, quorum: Arc<Quorum>, id: Hash, msg_hash: Hash) {
        self.pending_signs.lock().push(PendingSign {
            quorum,
            id,
            msg_hash,
        });
        self.wakeup.notify_one();
    }

    fn force_reannouncement(&self, quorum: Arc<Quorum>, id: Hash, msg_hash: Hash) {
        let sign_hash = SignId::new(quorum.llmq_type(), quorum.quorum_hash, id, msg_hash).sign_hash();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let members: Vec<u16> = state
                .sig_shares
                .get_all_for_sign_hash(&sign_hash)
                .map(|held| held.keys().copied().collect())
                .unwrap_or_default();
            for member in members {
                state.to_announce.insert((sign_hash, member), Arc::clone(&quorum));
            }
            // Peers must learn a fresh session id before our inventory.
            for peer_state in state.peers.values_mut() {
                if let Some(session) = peer_state.session_by_sign_hash_mut(&sign_hash) {
                    session.knows.set_all(false);
                    session.send_session_id = NO_SESSION_ID;
                }
            }
        }
        debug!(sign_hash = %hash_hex(&sign_hash), "[qc-18] Forced re-announcement");
        self.wakeup.notify_one();
    }

    fn handle_new_recovered_sig(&self, sign_hash: &SignHash) {
        let now_ms = self.clock.now_ms();
        self.state.lock().complete(sign_hash, now_ms);
        debug!(
            sign_hash = %hash_hex(sign_hash),
            "[qc-18] Signature recovered elsewhere, dropped session"
        );
    }

    fn register_listener(&self, listener: RecoveredSigListener) -> ListenerId {
        self.listeners.register(listener)
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    fn process_message(&self, peer: PeerId, command: &str, payload: &[u8]) -> bool {
        if !SigSharesMessage::is_known_command(command) {
            return false;
        }
        self.inbound.lock().push_back(InboundMessage {
            peer,
            command: command.to_string(),
            payload: payload.to_vec(),
        });
        self.wakeup.notify_one();
        true
    }
}
