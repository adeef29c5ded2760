//! Applying decoded wire messages to the session index.
//!
//! Handlers return `Err(ProtocolViolation)` for anything that must ban the
//! peer. Benign mismatches (unknown quorum, unknown session id in an
//! inventory) are logged and skipped.

use super::SigSharesManager;
use crate::domain::{
    check_batched_members, check_direct_share, check_inventory_size, check_message_cap,
    check_session_id, BatchedSigShares, PeerSession, SessionAnnounce, SharesInventory, SigShare,
};
use crate::events::{
    ProtocolViolation, SigSharesMessage, CMD_BATCHED_SIG_SHARES, CMD_GET_SIG_SHARES,
    CMD_SIG_SES_ANN, CMD_SIG_SHARE, CMD_SIG_SHARES_INV,
};
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use shared_types::{hash_hex, PeerId};
use tracing::{debug, trace};

/// Raw message waiting for the coordinator.
pub(super) struct InboundMessage {
    pub peer: PeerId,
    pub command: String,
    pub payload: Vec<u8>,
}

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    pub(super) fn process_inbound_queue(&self, now_ms: u64) -> bool {
        let messages: Vec<InboundMessage> = self.inbound.lock().drain(..).collect();
        if messages.is_empty() {
            return false;
        }
        for message in messages {
            self.process_inbound(message, now_ms);
        }
        true
    }

    fn process_inbound(&self, message: InboundMessage, now_ms: u64) {
        let peer = message.peer;
        if self.state.lock().is_banned(peer) {
            trace!(%peer, command = %message.command, "[qc-18] Dropping message from banned peer");
            return;
        }

        let decoded = match SigSharesMessage::decode(&message.command, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.ban_peer(peer, &ProtocolViolation::from(e));
                return;
            }
        };
        trace!(
            %peer,
            command = decoded.command(),
            entries = decoded.len(),
            "[qc-18] Received message"
        );

        let result = match decoded {
            SigSharesMessage::SessionAnnouncements(anns) => {
                self.process_session_announcements(peer, anns, now_ms)
            }
            SigSharesMessage::Inventories(invs) => self.merge_inventories(
                peer,
                invs,
                CMD_SIG_SHARES_INV,
                self.config.max_inventories_per_message,
                now_ms,
                |session, inv| session.announced.merge(inv),
            ),
            SigSharesMessage::GetSigShares(invs) => self.merge_inventories(
                peer,
                invs,
                CMD_GET_SIG_SHARES,
                self.config.max_requests_per_message,
                now_ms,
                |session, inv| session.requested.merge(inv),
            ),
            SigSharesMessage::BatchedSigShares(batches) => {
                self.process_batched_sig_shares(peer, batches)
            }
            SigSharesMessage::SigShares(shares) => self.process_direct_sig_shares(peer, shares),
        };
        if let Err(violation) = result {
            self.ban_peer(peer, &violation);
        }
    }

    fn process_session_announcements(
        &self,
        peer: PeerId,
        anns: Vec<SessionAnnounce>,
        now_ms: u64,
    ) -> Result<(), ProtocolViolation> {
        check_message_cap(
            CMD_SIG_SES_ANN,
            anns.len(),
            self.config.max_announcements_per_message,
        )?;
        for ann in &anns {
            check_session_id(ann.session_id)?;
        }

        for ann in anns {
            let sign_id = ann.sign_id;
            let Some(quorum) = self
                .quorums
                .get_quorum(sign_id.llmq_type, &sign_id.quorum_hash)
            else {
                debug!(
                    %peer,
                    quorum_hash = %hash_hex(&sign_id.quorum_hash),
                    "[qc-18] Session announced for unknown quorum"
                );
                continue;
            };

            let sign_hash = sign_id.sign_hash();
            let mut state = self.state.lock();
            if state.is_recovered(&sign_hash) {
                continue;
            }
            trace!(%peer, announce = %ann, "[qc-18] Session announced");
            state.touch_sign_hash(sign_hash, now_ms);
            if let Some(session) = state.get_or_create_session(peer, &sign_id, &quorum, now_ms) {
                session.last_touched_ms = now_ms;
            }
            state
                .peer_mut(peer)
                .bind_recv_session_id(&sign_hash, ann.session_id);
        }
        Ok(())
    }

    /// Shared path for `qsigsinv` and `qgetsigs`: OR the bitset into the
    /// target inventory and into *knows*.
    fn merge_inventories<F>(
        &self,
        peer: PeerId,
        invs: Vec<SharesInventory>,
        command: &'static str,
        max: usize,
        now_ms: u64,
        apply: F,
    ) -> Result<(), ProtocolViolation>
    where
        F: Fn(&mut PeerSession, &SharesInventory),
    {
        check_message_cap(command, invs.len(), max)?;
        let mut state = self.state.lock();
        for inv in invs {
            let info = state
                .peers
                .get(&peer)
                .and_then(|p| p.session_info_by_recv_id(inv.session_id));
            let Some(info) = info else {
                debug!(
                    %peer,
                    command,
                    session_id = inv.session_id,
                    "[qc-18] Inventory for unknown session"
                );
                continue;
            };
            check_inventory_size(&inv, &info.quorum)?;
            if state.is_recovered(&info.sign_hash) {
                continue;
            }
            trace!(%peer, command, session_id = inv.session_id, inv = %inv, "[qc-18] Merging inventory");
            if let Some(session) = state.peer_mut(peer).session_by_recv_id_mut(inv.session_id) {
                apply(session, &inv);
                session.knows.merge(&inv);
                session.last_touched_ms = now_ms;
            }
        }
        Ok(())
    }

    fn process_batched_sig_shares(
        &self,
        peer: PeerId,
        batches: Vec<BatchedSigShares>,
    ) -> Result<(), ProtocolViolation> {
        let total: usize = batches.iter().map(BatchedSigShares::len).sum();
        check_message_cap(
            CMD_BATCHED_SIG_SHARES,
            total,
            self.config.max_batched_shares_per_message,
        )?;

        for batch in batches {
            let info = self
                .state
                .lock()
                .peers
                .get(&peer)
                .and_then(|p| p.session_info_by_recv_id(batch.session_id))
                .ok_or(ProtocolViolation::UnknownSession {
                    session_id: batch.session_id,
                })?;
            if !self
                .quorums
                .is_quorum_active(info.sign_id.llmq_type, &info.sign_id.quorum_hash)
            {
                debug!(
                    %peer,
                    quorum = %info.quorum.describe(),
                    "[qc-18] Batched shares for inactive quorum"
                );
                continue;
            }
            check_batched_members(&batch, &info.quorum)?;

            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.is_recovered(&info.sign_hash) {
                continue;
            }
            let Some(peer_state) = state.peers.get_mut(&peer) else {
                continue;
            };
            trace!(
                %peer,
                session_id = batch.session_id,
                shares = %batch.to_inv_string(),
                "[qc-18] Received batched shares"
            );
            let mut staged = 0u64;
            for (member, sig) in batch.sig_shares {
                let share = SigShare::new(&info.sign_id, member, sig);
                let key = share.key();
                peer_state.requested_shares.erase(&key);
                if let Some(session) = peer_state.session_by_sign_hash_mut(&info.sign_hash) {
                    session.knows.set(member, true);
                }
                if state.sig_shares.has(&key) {
                    continue;
                }
                if peer_state.pending_incoming.add(key, share) {
                    staged += 1;
                }
            }
            state.metrics.shares_received += staged;
        }
        Ok(())
    }

    fn process_direct_sig_shares(
        &self,
        peer: PeerId,
        shares: Vec<SigShare>,
    ) -> Result<(), ProtocolViolation> {
        check_message_cap(
            CMD_SIG_SHARE,
            shares.len(),
            self.config.max_direct_shares_per_message,
        )?;

        for share in shares {
            let Some(quorum) = self.quorums.get_quorum(share.llmq_type, &share.quorum_hash) else {
                debug!(
                    %peer,
                    quorum_hash = %hash_hex(&share.quorum_hash),
                    "[qc-18] Share for unknown quorum"
                );
                continue;
            };
            if !self
                .quorums
                .is_quorum_active(share.llmq_type, &share.quorum_hash)
            {
                debug!(%peer, quorum = %quorum.describe(), "[qc-18] Share for inactive quorum");
                continue;
            }
            check_direct_share(&share, &quorum)?;

            let key = share.key();
            let mut state = self.state.lock();
            if state.is_recovered(&key.0) || state.sig_shares.has(&key) {
                continue;
            }
            trace!(
                %peer,
                sign_hash = %hash_hex(&key.0),
                member = key.1,
                "[qc-18] Received pushed share"
            );
            if state.peer_mut(peer).pending_incoming.add(key, share) {
                state.metrics.shares_received += 1;
            }
        }
        Ok(())
    }
}
