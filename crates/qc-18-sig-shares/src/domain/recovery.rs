//! Recovery scheduling: backoff windows and the deterministic choice of which
//! member should receive our share on each attempt.

use super::entities::{sha256d, SigShare, SignHash};
use shared_types::{Hash, Quorum};
use std::sync::Arc;

/// Pending or armed reconstruction for one sign hash.
#[derive(Clone, Debug)]
pub struct RecoveryAttempt {
    /// Share pushed to the recovery member. Our own share when we signed.
    pub anchor: SigShare,
    pub quorum: Arc<Quorum>,
    pub next_attempt_ms: u64,
    pub attempt: u32,
    /// At least `threshold` shares are held.
    pub ready: bool,
    /// The anchor was produced by the local node.
    pub anchor_is_local: bool,
}

impl RecoveryAttempt {
    /// Record for a share we produced ourselves; due immediately.
    pub fn for_local_share(anchor: SigShare, quorum: Arc<Quorum>, now_ms: u64) -> Self {
        Self {
            anchor,
            quorum,
            next_attempt_ms: now_ms,
            attempt: 0,
            ready: false,
            anchor_is_local: true,
        }
    }

    /// Record armed because the threshold was reached; due immediately.
    pub fn armed(anchor: SigShare, quorum: Arc<Quorum>, now_ms: u64) -> Self {
        Self {
            anchor,
            quorum,
            next_attempt_ms: now_ms,
            attempt: 0,
            ready: true,
            anchor_is_local: false,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_attempt_ms
    }

    /// Consumes the current attempt and opens the next backoff window.
    /// Returns the attempt number that was consumed.
    pub fn advance(&mut self, now_ms: u64, initial_delay_ms: u64, max_delay_ms: u64) -> u32 {
        let consumed = self.attempt;
        self.next_attempt_ms =
            now_ms.saturating_add(recovery_backoff_ms(consumed, initial_delay_ms, max_delay_ms));
        self.attempt = self.attempt.saturating_add(1);
        consumed
    }
}

/// `min(max_delay, initial_delay * 2^attempt)`.
pub fn recovery_backoff_ms(attempt: u32, initial_delay_ms: u64, max_delay_ms: u64) -> u64 {
    2u64.checked_pow(attempt)
        .and_then(|factor| initial_delay_ms.checked_mul(factor))
        .map_or(max_delay_ms, |delay| delay.min(max_delay_ms))
}

/// Ordering score of a member for a given sign hash.
fn recovery_score(pro_tx_hash: &Hash, sign_hash: &SignHash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(pro_tx_hash);
    buf[32..].copy_from_slice(sign_hash);
    sha256d(&buf)
}

/// Member responsible for reconstruction on `attempt`.
///
/// Members are sorted by `SHA256d(pro_tx_hash ‖ sign_hash)`; the attempt
/// indexes into that order modulo the quorum size, so every node picks the
/// same member. `None` for an empty quorum.
pub fn select_member_for_recovery(quorum: &Quorum, sign_hash: &SignHash, attempt: u32) -> Option<u16> {
    if quorum.members.is_empty() {
        return None;
    }
    let mut scored: Vec<(Hash, usize)> = quorum
        .members
        .iter()
        .enumerate()
        .map(|(index, member)| (recovery_score(&member.pro_tx_hash, sign_hash), index))
        .collect();
    scored.sort_unstable();
    let slot = usize::try_from(attempt).unwrap_or(usize::MAX) % scored.len();
    u16::try_from(scored[slot].1).ok()
}
