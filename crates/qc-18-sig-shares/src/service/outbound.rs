//! Outbound scheduling: requests, batched answers, inventory announcements
//! and recovery pushes, chunked to the per-message caps.

use super::state::ManagerState;
use super::SigSharesManager;
use crate::domain::{
    BatchedSigShares, SessionAnnounce, SharesInventory, SigShare, SignHash, NO_SESSION_ID,
};
use crate::events::SigSharesMessage;
use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use rand::seq::SliceRandom;
use shared_types::{Hash, LlmqType, PeerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

type PerSession<T> = HashMap<PeerId, HashMap<SignHash, T>>;
type AnnouncementTargets = HashMap<(LlmqType, Hash), Vec<PeerId>>;

/// Everything queued for one peer in this send pass.
#[derive(Default)]
struct PeerOutbox {
    announcements: Vec<SessionAnnounce>,
    requests: Vec<SharesInventory>,
    batches: Vec<BatchedSigShares>,
    inventories: Vec<SharesInventory>,
    shares: Vec<SigShare>,
}

/// Allocates our send session id for `sign_hash`, queueing the session
/// announcement the first time.
fn assign_send_session_id(
    state: &mut ManagerState,
    peer: PeerId,
    sign_hash: &SignHash,
    outboxes: &mut HashMap<PeerId, PeerOutbox>,
) -> Option<u32> {
    let peer_state = state.peers.get_mut(&peer)?;
    let sign_id = peer_state.session_by_sign_hash(sign_hash)?.sign_id;
    let (session_id, newly_assigned) = peer_state.ensure_send_session_id(sign_hash)?;
    if newly_assigned {
        outboxes
            .entry(peer)
            .or_default()
            .announcements
            .push(SessionAnnounce { session_id, sign_id });
    }
    Some(session_id)
}

/// Stamps each per-session item with our send session id and files it in
/// the peer's outbox.
fn file_items<T>(
    state: &mut ManagerState,
    items: PerSession<T>,
    outboxes: &mut HashMap<PeerId, PeerOutbox>,
    set_session_id: fn(&mut T, u32),
    slot: fn(&mut PeerOutbox) -> &mut Vec<T>,
) {
    for (peer, by_session) in items {
        for (sign_hash, mut item) in by_session {
            let Some(session_id) = assign_send_session_id(state, peer, &sign_hash, outboxes) else {
                continue;
            };
            set_session_id(&mut item, session_id);
            slot(outboxes.entry(peer).or_default()).push(item);
        }
    }
}

impl<Q, N, T> SigSharesManager<Q, N, T>
where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    /// Runs at most once per `send_interval_ms`. Returns true if anything
    /// was sent.
    pub(super) fn send_messages(&self, now_ms: u64) -> bool {
        {
            let mut state = self.state.lock();
            if let Some(last) = state.last_send_ms {
                if now_ms.saturating_sub(last) < self.config.send_interval_ms {
                    return false;
                }
            }
            state.last_send_ms = Some(now_ms);
        }

        let connected: HashSet<PeerId> = self.network.connected_peers().into_iter().collect();
        let targets = self.announcement_targets(&connected);
        let outboxes = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let mut requests = PerSession::new();
            let mut batches = PerSession::new();
            let mut inventories = PerSession::new();
            self.collect_sig_shares_to_request(state, &connected, now_ms, &mut requests);
            self.collect_sig_shares_to_send(state, &connected, &mut batches);
            self.collect_sig_shares_to_announce(state, &targets, now_ms, &mut inventories);

            let mut outboxes: HashMap<PeerId, PeerOutbox> = HashMap::new();
            file_items(
                state,
                requests,
                &mut outboxes,
                |inv, id| inv.session_id = id,
                |outbox| &mut outbox.requests,
            );
            file_items(
                state,
                batches,
                &mut outboxes,
                |batch, id| batch.session_id = id,
                |outbox| &mut outbox.batches,
            );
            file_items(
                state,
                inventories,
                &mut outboxes,
                |inv, id| inv.session_id = id,
                |outbox| &mut outbox.inventories,
            );
            // The rest of a peer's pushes wait for the next pass.
            let max_direct = self.config.max_direct_shares_per_message;
            state.to_push.retain(|peer, shares| {
                if !connected.contains(peer) {
                    return false;
                }
                let take = shares.len().min(max_direct);
                outboxes
                    .entry(*peer)
                    .or_default()
                    .shares
                    .extend(shares.drain(..take));
                !shares.is_empty()
            });
            outboxes
        };

        let mut sent = false;
        for (peer, outbox) in outboxes {
            sent |= self.flush_outbox(peer, outbox);
        }
        sent
    }

    /// Picks shares to request from peers that announced them.
    ///
    /// A share reserved with another peer is only re-requested once that
    /// reservation is older than the request timeout.
    fn collect_sig_shares_to_request(
        &self,
        state: &mut ManagerState,
        connected: &HashSet<PeerId>,
        now_ms: u64,
        out: &mut PerSession<SharesInventory>,
    ) {
        let timeout = self.config.request_timeout_ms;
        let max_per_peer = self.config.max_requests_per_peer;

        let mut peers: Vec<PeerId> = state
            .peers
            .keys()
            .copied()
            .filter(|peer| connected.contains(peer))
            .collect();
        peers.shuffle(&mut rand::thread_rng());

        for peer in peers {
            let Some(peer_state) = state.peers.get_mut(&peer) else {
                continue;
            };
            if peer_state.banned {
                continue;
            }
            let timed_out = peer_state
                .requested_shares
                .erase_if(|_, requested_at| now_ms.saturating_sub(*requested_at) >= timeout);
            if timed_out > 0 {
                debug!(%peer, count = timed_out, "[qc-18] Share requests timed out");
            }

            for sign_hash in peer_state.sign_hashes() {
                if state.recovered.contains(&sign_hash) {
                    continue;
                }
                let Some(session) = peer_state.sessions.peek_mut(&sign_hash) else {
                    continue;
                };
                let announced: Vec<u16> = session.announced.iter_set().collect();
                for member in announced {
                    if peer_state.requested_shares.len() >= max_per_peer {
                        break;
                    }
                    let key = (sign_hash, member);
                    if state.sig_shares.has(&key) {
                        session.announced.set(member, false);
                        continue;
                    }
                    if let Some((holder, requested_at)) = state.requested.get(&key) {
                        if *holder == peer || now_ms.saturating_sub(*requested_at) < timeout {
                            continue;
                        }
                        debug!(
                            %peer,
                            holder = %holder,
                            member,
                            "[qc-18] Re-requesting share after timeout"
                        );
                    }
                    peer_state.requested_shares.insert(key, now_ms);
                    state.requested.insert(key, (peer, now_ms));
                    let size = session.announced.len();
                    out.entry(peer)
                        .or_default()
                        .entry(sign_hash)
                        .or_insert_with(|| SharesInventory::new(NO_SESSION_ID, size))
                        .set(member, true);
                    session.announced.set(member, false);
                }
            }
        }
    }

    /// Answers the peers' *requested* bits with shares we hold.
    fn collect_sig_shares_to_send(
        &self,
        state: &mut ManagerState,
        connected: &HashSet<PeerId>,
        out: &mut PerSession<BatchedSigShares>,
    ) {
        for (peer, peer_state) in state.peers.iter_mut() {
            if peer_state.banned || !connected.contains(peer) {
                continue;
            }
            for session in peer_state.sessions_mut() {
                if session.requested.count_set() == 0 {
                    continue;
                }
                let requested: Vec<u16> = session.requested.iter_set().collect();
                session.requested.set_all(false);
                if state.recovered.contains(&session.sign_hash) {
                    continue;
                }
                let mut batch = BatchedSigShares::new(NO_SESSION_ID);
                for member in requested {
                    if let Some(share) = state.sig_shares.get(&(session.sign_hash, member)) {
                        batch.sig_shares.push((member, share.sig_share.clone()));
                    }
                }
                if !batch.is_empty() {
                    out.entry(*peer).or_default().insert(session.sign_hash, batch);
                }
            }
        }
    }

    /// Connected intra-quorum peers of every quorum with shares waiting to
    /// be announced.
    fn announcement_targets(&self, connected: &HashSet<PeerId>) -> AnnouncementTargets {
        let quorums: HashSet<(LlmqType, Hash)> = self
            .state
            .lock()
            .to_announce
            .iter()
            .map(|(_, quorum)| (quorum.llmq_type(), quorum.quorum_hash))
            .collect();
        quorums
            .into_iter()
            .map(|(llmq_type, quorum_hash)| {
                let peers = self
                    .network
                    .quorum_peers(llmq_type, &quorum_hash)
                    .into_iter()
                    .filter(|peer| connected.contains(peer))
                    .collect();
                ((llmq_type, quorum_hash), peers)
            })
            .collect()
    }

    /// Announces newly merged shares to the quorum's peers that are not
    /// known to have them. Shares of a quorum queued after the targets were
    /// resolved stay queued.
    fn collect_sig_shares_to_announce(
        &self,
        state: &mut ManagerState,
        targets: &AnnouncementTargets,
        now_ms: u64,
        out: &mut PerSession<SharesInventory>,
    ) {
        let pending: Vec<_> = state
            .to_announce
            .iter()
            .filter(|(_, quorum)| targets.contains_key(&(quorum.llmq_type(), quorum.quorum_hash)))
            .map(|(key, quorum)| (key, Arc::clone(quorum)))
            .collect();
        for (key, _) in &pending {
            state.to_announce.erase(key);
        }

        for (key, quorum) in pending {
            let Some(sign_id) = state.sig_shares.get(&key).map(SigShare::sign_id) else {
                continue;
            };
            let Some(peers) = targets.get(&(quorum.llmq_type(), quorum.quorum_hash)) else {
                continue;
            };
            for peer in peers {
                if state.is_banned(*peer) {
                    continue;
                }
                let Some(session) = state.get_or_create_session(*peer, &sign_id, &quorum, now_ms)
                else {
                    continue;
                };
                if session.knows.is_set(key.1) {
                    continue;
                }
                session.knows.set(key.1, true);
                let size = session.knows.len();
                out.entry(*peer)
                    .or_default()
                    .entry(key.0)
                    .or_insert_with(|| SharesInventory::new(NO_SESSION_ID, size))
                    .set(key.1, true);
            }
        }
    }

    /// Sends the outbox in protocol order, chunked to the per-message caps.
    fn flush_outbox(&self, peer: PeerId, outbox: PeerOutbox) -> bool {
        let config = &self.config;
        let mut sent = false;

        for chunk in outbox.announcements.chunks(config.max_announcements_per_message) {
            self.send(peer, SigSharesMessage::SessionAnnouncements(chunk.to_vec()));
            sent = true;
        }
        for chunk in outbox.requests.chunks(config.max_requests_per_message) {
            self.send(peer, SigSharesMessage::GetSigShares(chunk.to_vec()));
            sent = true;
        }

        // Flush before the total share count would exceed the cap.
        let max_shares = config.max_batched_shares_per_message;
        let mut pending: Vec<BatchedSigShares> = Vec::new();
        let mut pending_shares = 0;
        for batch in outbox.batches {
            for part in batch.sig_shares.chunks(max_shares) {
                if pending_shares + part.len() > max_shares {
                    self.send(
                        peer,
                        SigSharesMessage::BatchedSigShares(std::mem::take(&mut pending)),
                    );
                    pending_shares = 0;
                }
                pending_shares += part.len();
                pending.push(BatchedSigShares {
                    session_id: batch.session_id,
                    sig_shares: part.to_vec(),
                });
            }
        }
        if !pending.is_empty() {
            self.send(peer, SigSharesMessage::BatchedSigShares(pending));
            sent = true;
        }

        for chunk in outbox.inventories.chunks(config.max_inventories_per_message) {
            self.send(peer, SigSharesMessage::Inventories(chunk.to_vec()));
            sent = true;
        }
        for chunk in outbox.shares.chunks(config.max_direct_shares_per_message) {
            self.send(peer, SigSharesMessage::SigShares(chunk.to_vec()));
            sent = true;
        }
        sent
    }

    fn send(&self, peer: PeerId, message: SigSharesMessage) {
        trace!(
            %peer,
            command = message.command(),
            entries = message.len(),
            "[qc-18] Sending message"
        );
        self.network.send(peer, message);
    }
}
