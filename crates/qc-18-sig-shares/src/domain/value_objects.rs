//! Value objects for signature share exchange.

use super::entities::SignHash;

/// Running counters, exposed for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SigSharesMetrics {
    pub shares_received: u64,
    pub shares_accepted: u64,
    pub shares_invalid: u64,
    pub recovery_attempts: u64,
    pub signatures_recovered: u64,
    pub sessions_timed_out: u64,
    pub peers_banned: u64,
}

/// Snapshot of the recovery record for a sign hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverySchedule {
    pub sign_hash: SignHash,
    pub next_attempt_ms: u64,
    pub attempt: u32,
    pub ready: bool,
}
