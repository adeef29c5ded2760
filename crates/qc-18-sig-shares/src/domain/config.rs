//! Signature shares configuration and validation.
//!
//! # Example
//!
//! ```ignore
//! use qc_18_sig_shares::domain::SigSharesConfig;
//!
//! let config = SigSharesConfig::default()
//!     .with_session_timeout_ms(30_000)
//!     .with_max_requests_per_peer(16);
//! config.validate().expect("valid config");
//! ```

use crate::events::ConfigError;
use serde::{Deserialize, Serialize};

/// Timeouts and caps for share exchange.
///
/// Missing keys in a TOML table fall back to the defaults below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigSharesConfig {
    /// A sign hash without new shares for this long is abandoned.
    pub session_timeout_ms: u64,
    /// A request not answered within this time may go to another peer.
    pub request_timeout_ms: u64,
    /// First recovery backoff window.
    pub recovery_initial_delay_ms: u64,
    /// Upper bound for the recovery backoff window.
    pub recovery_max_delay_ms: u64,
    pub cleanup_interval_ms: u64,
    pub send_interval_ms: u64,
    /// Longest idle sleep of the worker between iterations.
    pub idle_poll_ms: u64,
    /// Distinct (peer, sign hash) pairs verified per iteration.
    pub max_verify_batch_sessions: usize,
    /// Outstanding share requests per peer.
    pub max_requests_per_peer: usize,
    /// Sessions tracked per peer before the least recently used is dropped.
    pub max_sessions_per_peer: usize,
    /// Sign hashes remembered as recovered, so late shares are ignored.
    pub recovered_cache_size: usize,
    pub max_announcements_per_message: usize,
    pub max_inventories_per_message: usize,
    pub max_requests_per_message: usize,
    pub max_batched_shares_per_message: usize,
    pub max_direct_shares_per_message: usize,
    /// Misbehavior score reported for a protocol violation.
    pub ban_score: u32,
}

impl Default for SigSharesConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 60_000,
            request_timeout_ms: 5_000,
            recovery_initial_delay_ms: 2_000,
            recovery_max_delay_ms: 10_000,
            cleanup_interval_ms: 5_000,
            send_interval_ms: 100,
            idle_poll_ms: 100,
            max_verify_batch_sessions: 32,
            max_requests_per_peer: 32,
            max_sessions_per_peer: 1_000,
            recovered_cache_size: 10_000,
            max_announcements_per_message: 100,
            max_inventories_per_message: 200,
            max_requests_per_message: 200,
            max_batched_shares_per_message: 400,
            max_direct_shares_per_message: 32,
            ban_score: 100,
        }
    }
}

impl SigSharesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("session_timeout_ms", self.session_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("recovery_initial_delay_ms", self.recovery_initial_delay_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
            ("send_interval_ms", self.send_interval_ms),
            ("idle_poll_ms", self.idle_poll_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        let non_zero_caps = [
            ("max_verify_batch_sessions", self.max_verify_batch_sessions),
            ("max_requests_per_peer", self.max_requests_per_peer),
            ("max_sessions_per_peer", self.max_sessions_per_peer),
            ("recovered_cache_size", self.recovered_cache_size),
            ("max_announcements_per_message", self.max_announcements_per_message),
            ("max_inventories_per_message", self.max_inventories_per_message),
            ("max_requests_per_message", self.max_requests_per_message),
            ("max_batched_shares_per_message", self.max_batched_shares_per_message),
            ("max_direct_shares_per_message", self.max_direct_shares_per_message),
        ];
        for (field, value) in non_zero_caps {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.recovery_max_delay_ms < self.recovery_initial_delay_ms {
            return Err(ConfigError::invalid(
                "recovery_max_delay_ms",
                "must not be below recovery_initial_delay_ms",
            ));
        }
        if self.request_timeout_ms > self.session_timeout_ms {
            return Err(ConfigError::invalid(
                "request_timeout_ms",
                "must not exceed session_timeout_ms",
            ));
        }
        Ok(())
    }

    pub fn with_session_timeout_ms(mut self, ms: u64) -> Self {
        self.session_timeout_ms = ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_recovery_delays_ms(mut self, initial: u64, max: u64) -> Self {
        self.recovery_initial_delay_ms = initial;
        self.recovery_max_delay_ms = max;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.cleanup_interval_ms = ms;
        self
    }

    pub fn with_send_interval_ms(mut self, ms: u64) -> Self {
        self.send_interval_ms = ms;
        self
    }

    pub fn with_max_requests_per_peer(mut self, max: usize) -> Self {
        self.max_requests_per_peer = max;
        self
    }

    pub fn with_max_sessions_per_peer(mut self, max: usize) -> Self {
        self.max_sessions_per_peer = max;
        self
    }

    pub fn with_max_verify_batch_sessions(mut self, max: usize) -> Self {
        self.max_verify_batch_sessions = max;
        self
    }
}
