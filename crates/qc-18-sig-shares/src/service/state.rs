//! Mutable state owned by the coordinator.
//!
//! Every index is keyed by sign hash so that a completed or abandoned
//! signing session can be dropped from all of them in one pass.

use crate::domain::{
    PeerSession, PeerState, RecoveryAttempt, SigShare, SigShareKey, SigShareMap, SigSharesMetrics,
    SignHash, SignId,
};
use lru::LruCache;
use shared_types::{hash_hex, PeerId, Quorum};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ManagerState {
    /// Verified shares.
    pub sig_shares: SigShareMap<SigShare>,
    /// Which peer we asked for a share, and when.
    pub requested: SigShareMap<(PeerId, u64)>,
    /// Freshly verified shares not yet announced, with their quorum.
    pub to_announce: SigShareMap<Arc<Quorum>>,
    /// Shares pushed straight to a recovery member on the next send.
    pub to_push: HashMap<PeerId, Vec<SigShare>>,
    pub recovery: HashMap<SignHash, RecoveryAttempt>,
    /// Last time a new share arrived for a sign hash (or it was first seen).
    pub time_seen: HashMap<SignHash, u64>,
    pub peers: HashMap<PeerId, PeerState>,
    /// Sign hashes already recovered; late traffic for them is ignored.
    pub recovered: LruCache<SignHash, u64>,
    pub metrics: SigSharesMetrics,
    pub last_cleanup_ms: u64,
    pub last_send_ms: Option<u64>,
    max_sessions_per_peer: usize,
}

impl ManagerState {
    pub fn new(max_sessions_per_peer: usize, recovered_cache_size: usize, now_ms: u64) -> Self {
        let recovered_capacity =
            NonZeroUsize::new(recovered_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            sig_shares: SigShareMap::new(),
            requested: SigShareMap::new(),
            to_announce: SigShareMap::new(),
            to_push: HashMap::new(),
            recovery: HashMap::new(),
            time_seen: HashMap::new(),
            peers: HashMap::new(),
            recovered: LruCache::new(recovered_capacity),
            metrics: SigSharesMetrics::default(),
            last_cleanup_ms: now_ms,
            last_send_ms: None,
            max_sessions_per_peer,
        }
    }

    pub fn peer_mut(&mut self, peer: PeerId) -> &mut PeerState {
        let max_sessions = self.max_sessions_per_peer;
        self.peers
            .entry(peer)
            .or_insert_with(|| PeerState::new(max_sessions))
    }

    pub fn is_banned(&self, peer: PeerId) -> bool {
        self.peers.get(&peer).is_some_and(|state| state.banned)
    }

    pub fn is_recovered(&self, sign_hash: &SignHash) -> bool {
        self.recovered.contains(sign_hash)
    }

    /// Starts the session timer if this sign hash is new.
    pub fn touch_sign_hash(&mut self, sign_hash: SignHash, now_ms: u64) {
        self.time_seen.entry(sign_hash).or_insert(now_ms);
    }

    /// Returns the peer's session for `sign_id`, creating it if needed.
    ///
    /// An LRU eviction releases the global reservations the evicted session
    /// held with this peer.
    pub fn get_or_create_session(
        &mut self,
        peer: PeerId,
        sign_id: &SignId,
        quorum: &Arc<Quorum>,
        now_ms: u64,
    ) -> Option<&mut PeerSession> {
        let sign_hash = sign_id.sign_hash();
        let evicted = self.peer_mut(peer).ensure_session(sign_id, quorum, now_ms);
        if let Some(evicted) = evicted {
            debug!(
                %peer,
                sign_hash = %hash_hex(&evicted.sign_hash),
                "[qc-18] Session cache full, evicted least recently used session"
            );
            self.release_reservations(peer, &evicted.requested);
            self.forget_if_orphaned(&evicted.sign_hash);
        }
        self.peers
            .get_mut(&peer)?
            .session_by_sign_hash_mut(&sign_hash)
    }

    /// Drops global reservations that `peer` still holds for `keys`.
    pub fn release_reservations(&mut self, peer: PeerId, keys: &[SigShareKey]) {
        for key in keys {
            if matches!(self.requested.get(key), Some((holder, _)) if *holder == peer) {
                self.requested.erase(key);
            }
        }
    }

    /// Drops the session timer of a sign hash nothing refers to anymore.
    pub fn forget_if_orphaned(&mut self, sign_hash: &SignHash) {
        let referenced = self.sig_shares.count_for_sign_hash(sign_hash) > 0
            || self.to_announce.count_for_sign_hash(sign_hash) > 0
            || self.recovery.contains_key(sign_hash)
            || self
                .peers
                .values()
                .any(|state| state.session_by_sign_hash(sign_hash).is_some());
        if !referenced {
            self.time_seen.remove(sign_hash);
        }
    }

    /// Removes every trace of `sign_hash` from every index.
    pub fn remove_sig_shares_for_session(&mut self, sign_hash: &SignHash) {
        for peer_state in self.peers.values_mut() {
            peer_state.remove_session(sign_hash);
        }
        for pushes in self.to_push.values_mut() {
            pushes.retain(|share| share.sign_hash() != *sign_hash);
        }
        self.to_push.retain(|_, pushes| !pushes.is_empty());
        self.sig_shares.erase_all_for_sign_hash(sign_hash);
        self.requested.erase_all_for_sign_hash(sign_hash);
        self.to_announce.erase_all_for_sign_hash(sign_hash);
        self.recovery.remove(sign_hash);
        self.time_seen.remove(sign_hash);
    }

    /// Marks `sign_hash` as recovered and purges it.
    pub fn complete(&mut self, sign_hash: &SignHash, now_ms: u64) {
        self.recovered.put(*sign_hash, now_ms);
        self.remove_sig_shares_for_session(sign_hash);
    }

    /// Flags the peer as banned and releases everything it had reserved.
    pub fn ban_peer(&mut self, peer: PeerId) {
        let released = {
            let state = self.peer_mut(peer);
            state.banned = true;
            state.pending_incoming.clear();
            state.release_requests()
        };
        for key in &released {
            self.requested.erase(key);
        }
        self.to_push.remove(&peer);
    }

    /// Drops the states of banned peers. Returns who must be disconnected.
    pub fn remove_banned_peers(&mut self) -> Vec<PeerId> {
        let banned: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, state)| state.banned)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &banned {
            self.remove_peer(*peer);
        }
        banned
    }

    /// Drops a peer's state and its request reservations.
    pub fn remove_peer(&mut self, peer: PeerId) {
        if let Some(mut state) = self.peers.remove(&peer) {
            let released = state.release_requests();
            self.release_reservations(peer, &released);
            for sign_hash in state.sign_hashes() {
                self.forget_if_orphaned(&sign_hash);
            }
        }
        self.to_push.remove(&peer);
    }

    /// Number of entries in any index that still refer to `sign_hash`.
    pub fn footprint(&self, sign_hash: &SignHash) -> usize {
        self.sig_shares.count_for_sign_hash(sign_hash)
            + self.requested.count_for_sign_hash(sign_hash)
            + self.to_announce.count_for_sign_hash(sign_hash)
            + usize::from(self.recovery.contains_key(sign_hash))
            + usize::from(self.time_seen.contains_key(sign_hash))
            + self
                .to_push
                .values()
                .flatten()
                .filter(|share| share.sign_hash() == *sign_hash)
                .count()
            + self
                .peers
                .values()
                .map(|state| state.footprint(sign_hash))
                .sum::<usize>()
    }
}
