//! Per-peer signing sessions.
//!
//! A session binds one sign hash to two compact ids: the id the peer uses
//! when talking to us (`recv_session_id`) and the id we use when talking to
//! the peer (`send_session_id`).

use super::entities::{SigShare, SigShareKey, SignHash, SignId, NO_SESSION_ID};
use super::inventory::SharesInventory;
use super::share_map::SigShareMap;
use lru::LruCache;
use shared_types::Quorum;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Reconciliation state for one (peer, sign hash) pair.
#[derive(Clone, Debug)]
pub struct PeerSession {
    pub recv_session_id: u32,
    pub send_session_id: u32,
    pub sign_id: SignId,
    pub sign_hash: SignHash,
    pub quorum: Arc<Quorum>,
    /// Shares the peer told us it has.
    pub announced: SharesInventory,
    /// Shares the peer asked us for.
    pub requested: SharesInventory,
    /// Shares the peer is known to have.
    pub knows: SharesInventory,
    pub last_touched_ms: u64,
}

impl PeerSession {
    pub fn new(sign_id: SignId, quorum: Arc<Quorum>, now_ms: u64) -> Self {
        let size = quorum.size();
        Self {
            recv_session_id: NO_SESSION_ID,
            send_session_id: NO_SESSION_ID,
            sign_hash: sign_id.sign_hash(),
            sign_id,
            quorum,
            announced: SharesInventory::new(NO_SESSION_ID, size),
            requested: SharesInventory::new(NO_SESSION_ID, size),
            knows: SharesInventory::new(NO_SESSION_ID, size),
            last_touched_ms: now_ms,
        }
    }
}

/// What a session resolves to, detached from the peer state borrow.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub recv_session_id: u32,
    pub sign_id: SignId,
    pub sign_hash: SignHash,
    pub quorum: Arc<Quorum>,
}

impl From<&PeerSession> for SessionInfo {
    fn from(session: &PeerSession) -> Self {
        Self {
            recv_session_id: session.recv_session_id,
            sign_id: session.sign_id,
            sign_hash: session.sign_hash,
            quorum: Arc::clone(&session.quorum),
        }
    }
}

/// Bookkeeping released when the LRU drops a session.
#[derive(Debug, Default)]
pub struct EvictedSession {
    pub sign_hash: SignHash,
    pub requested: Vec<SigShareKey>,
}

/// Everything we track about one connected peer.
#[derive(Debug)]
pub struct PeerState {
    pub(crate) sessions: LruCache<SignHash, PeerSession>,
    pub(crate) session_by_recv_id: HashMap<u32, SignHash>,
    pub(crate) next_send_session_id: u32,
    /// Shares received but not verified yet.
    pub pending_incoming: SigShareMap<SigShare>,
    /// Shares we asked this peer for, with the request time.
    pub requested_shares: SigShareMap<u64>,
    pub banned: bool,
}

impl PeerState {
    pub fn new(max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: LruCache::new(capacity),
            session_by_recv_id: HashMap::new(),
            next_send_session_id: 1,
            pending_incoming: SigShareMap::new(),
            requested_shares: SigShareMap::new(),
            banned: false,
        }
    }

    /// Creates the session if missing and refreshes its LRU position.
    ///
    /// If the cache was full the least recently used session is dropped along
    /// with this peer's pending and requested entries for it.
    pub fn ensure_session(
        &mut self,
        sign_id: &SignId,
        quorum: &Arc<Quorum>,
        now_ms: u64,
    ) -> Option<EvictedSession> {
        let sign_hash = sign_id.sign_hash();
        if self.sessions.get(&sign_hash).is_some() {
            return None;
        }
        let session = PeerSession::new(*sign_id, Arc::clone(quorum), now_ms);
        let (evicted_hash, evicted) = self.sessions.push(sign_hash, session)?;
        if evicted_hash == sign_hash {
            return None;
        }
        self.unbind_recv_id(&evicted_hash, evicted.recv_session_id);
        self.pending_incoming.erase_all_for_sign_hash(&evicted_hash);
        let requested = self.drain_requested_for(&evicted_hash);
        Some(EvictedSession {
            sign_hash: evicted_hash,
            requested,
        })
    }

    pub fn session_by_sign_hash(&self, sign_hash: &SignHash) -> Option<&PeerSession> {
        self.sessions.peek(sign_hash)
    }

    pub fn session_by_sign_hash_mut(&mut self, sign_hash: &SignHash) -> Option<&mut PeerSession> {
        self.sessions.peek_mut(sign_hash)
    }

    pub fn session_by_recv_id(&self, recv_session_id: u32) -> Option<&PeerSession> {
        let sign_hash = self.session_by_recv_id.get(&recv_session_id)?;
        self.sessions.peek(sign_hash)
    }

    /// Mutable lookup by the peer's session id; counts as a use for the LRU.
    pub fn session_by_recv_id_mut(&mut self, recv_session_id: u32) -> Option<&mut PeerSession> {
        let sign_hash = *self.session_by_recv_id.get(&recv_session_id)?;
        self.sessions.get_mut(&sign_hash)
    }

    pub fn session_info_by_recv_id(&self, recv_session_id: u32) -> Option<SessionInfo> {
        self.session_by_recv_id(recv_session_id).map(SessionInfo::from)
    }

    /// Records the id the peer announced for `sign_hash`.
    ///
    /// A session that previously owned `recv_session_id` loses it.
    pub fn bind_recv_session_id(&mut self, sign_hash: &SignHash, recv_session_id: u32) {
        let Some(old_id) = self.sessions.peek(sign_hash).map(|s| s.recv_session_id) else {
            return;
        };
        self.unbind_recv_id(sign_hash, old_id);
        if let Some(previous_owner) = self.session_by_recv_id.insert(recv_session_id, *sign_hash) {
            if previous_owner != *sign_hash {
                if let Some(session) = self.sessions.peek_mut(&previous_owner) {
                    session.recv_session_id = NO_SESSION_ID;
                }
            }
        }
        if let Some(session) = self.sessions.peek_mut(sign_hash) {
            session.recv_session_id = recv_session_id;
        }
    }

    /// Assigns our send session id for `sign_hash` if it has none yet.
    ///
    /// Returns `(id, newly_assigned)`, or `None` if the session is unknown
    /// or the id space is exhausted.
    pub fn ensure_send_session_id(&mut self, sign_hash: &SignHash) -> Option<(u32, bool)> {
        let session = self.sessions.peek_mut(sign_hash)?;
        if session.send_session_id != NO_SESSION_ID {
            return Some((session.send_session_id, false));
        }
        if self.next_send_session_id == NO_SESSION_ID {
            return None;
        }
        session.send_session_id = self.next_send_session_id;
        self.next_send_session_id += 1;
        Some((session.send_session_id, true))
    }

    /// Drops the session and every per-peer entry for `sign_hash`.
    ///
    /// Returns the keys this peer had outstanding requests for.
    pub fn remove_session(&mut self, sign_hash: &SignHash) -> Vec<SigShareKey> {
        if let Some(session) = self.sessions.pop(sign_hash) {
            self.unbind_recv_id(sign_hash, session.recv_session_id);
        }
        self.pending_incoming.erase_all_for_sign_hash(sign_hash);
        self.drain_requested_for(sign_hash)
    }

    /// Clears all outstanding requests, returning their keys.
    pub fn release_requests(&mut self) -> Vec<SigShareKey> {
        let keys = self.requested_shares.keys();
        self.requested_shares.clear();
        keys
    }

    pub fn sign_hashes(&self) -> Vec<SignHash> {
        self.sessions.iter().map(|(hash, _)| *hash).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> + '_ {
        self.sessions.iter().map(|(_, session)| session)
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PeerSession> + '_ {
        self.sessions.iter_mut().map(|(_, session)| session)
    }

    /// Number of per-peer entries still referring to `sign_hash`.
    pub fn footprint(&self, sign_hash: &SignHash) -> usize {
        usize::from(self.sessions.contains(sign_hash))
            + self
                .session_by_recv_id
                .values()
                .filter(|hash| *hash == sign_hash)
                .count()
            + self.pending_incoming.count_for_sign_hash(sign_hash)
            + self.requested_shares.count_for_sign_hash(sign_hash)
    }

    fn unbind_recv_id(&mut self, sign_hash: &SignHash, recv_session_id: u32) {
        if recv_session_id == NO_SESSION_ID {
            return;
        }
        if self.session_by_recv_id.get(&recv_session_id) == Some(sign_hash) {
            self.session_by_recv_id.remove(&recv_session_id);
        }
    }

    fn drain_requested_for(&mut self, sign_hash: &SignHash) -> Vec<SigShareKey> {
        let keys: Vec<SigShareKey> = self
            .requested_shares
            .get_all_for_sign_hash(sign_hash)
            .map(|members| members.keys().map(|member| (*sign_hash, *member)).collect())
            .unwrap_or_default();
        self.requested_shares.erase_all_for_sign_hash(sign_hash);
        keys
    }
}
