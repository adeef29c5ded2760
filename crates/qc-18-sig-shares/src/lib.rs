//! # Signature Shares Subsystem (qc-18)
//!
//! Gossips threshold signature shares between the members of a signing
//! quorum and reconstructs the quorum signature once enough shares are seen.
//!
//! ## Architecture Role
//!
//! ```text
//! [Quorum registry] ──get_quorum / sign / verify / recover──┐
//!                                                           │
//! [Peer layer] ──qsigsesann/qsigsinv/qgetsigs/qbsigs/qsigshare──→ [Sig Shares (18)]
//!                                                           │
//!                                         RecoveredSig ─────┴──→ [listeners]
//! ```
//!
//! ## Protocol outline
//!
//! 1. A node that holds shares announces a session (`qsigsesann`) binding a
//!    compact per-peer session id to a sign hash.
//! 2. Share availability is exchanged as bitsets (`qsigsinv`), missing shares
//!    are requested (`qgetsigs`) and answered in batches (`qbsigs`).
//! 3. Incoming shares are verified in fair batches; any invalid share bans the
//!    peer that supplied it.
//! 4. Once `threshold` shares are held, recovery is attempted with exponential
//!    backoff while the local share is pushed (`qsigshare`) to a
//!    deterministically chosen recovery member.
//!
//! ## Security
//!
//! - Every protocol violation bans the peer (misbehaving score 100)
//! - Per-message caps and a bounded per-peer session LRU limit memory use
//! - A share request is reserved with a single peer until it times out

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use domain::*;
pub use events::{CodecError, ProtocolViolation, SigSharesError, SigSharesMessage};
pub use ports::inbound::{ListenerId, RecoveredSigListener, SigSharesApi};
pub use ports::outbound::{ConfigProvider, PeerNetwork, QuorumManager, TimeSource};
pub use service::SigSharesManager;
pub use worker::SigSharesWorker;
