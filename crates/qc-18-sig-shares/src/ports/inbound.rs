//! Inbound ports (API) for the Signature Shares subsystem.

use crate::domain::{RecoveredSig, SigShareKey, SignHash};
use crate::events::SigSharesError;
use shared_types::{Hash, PeerId, Quorum};
use std::fmt;
use std::sync::Arc;

/// Callback invoked once per recovered signature.
pub type RecoveredSigListener = Arc<dyn Fn(&RecoveredSig) + Send + Sync>;

/// Handle returned by `register_listener`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Primary API for signature share exchange.
pub trait SigSharesApi: Send + Sync {
    /// Check that we can sign `(id, msg_hash)` and queue our share for the
    /// coordinator. Returns the key the share will be stored under.
    fn request_signature(
        &self,
        quorum: Arc<Quorum>,
        id: Hash,
        msg_hash: Hash,
    ) -> Result<SigShareKey, SigSharesError>;

    /// Queue a signing request for the coordinator and return immediately.
    fn request_signature_async(&self, quorum: Arc<Quorum>, id: Hash, msg_hash: Hash);

    /// Re-announce every share we hold for the request to all peers.
    fn force_reannouncement(&self, quorum: Arc<Quorum>, id: Hash, msg_hash: Hash);

    /// A signature for `sign_hash` was recovered elsewhere; drop local state.
    fn handle_new_recovered_sig(&self, sign_hash: &SignHash);

    fn register_listener(&self, listener: RecoveredSigListener) -> ListenerId;

    /// Returns false if `id` was not registered.
    fn unregister_listener(&self, id: ListenerId) -> bool;

    /// Queue a raw wire message from `peer`.
    ///
    /// Returns false if `command` does not belong to this subsystem.
    fn process_message(&self, peer: PeerId, command: &str, payload: &[u8]) -> bool;
}
