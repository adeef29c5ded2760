//! Recovered-signature listener registry.

use crate::domain::RecoveredSig;
use crate::ports::inbound::{ListenerId, RecoveredSigListener};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(super) struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, RecoveredSigListener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, listener: RecoveredSigListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Calls every listener once. The list is snapshotted first so a
    /// listener may register or unregister without deadlocking.
    pub fn notify(&self, recovered: &RecoveredSig) {
        let snapshot: Vec<RecoveredSigListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(recovered);
        }
    }
}
