//! Background coordinator task.
//!
//! Drives [`SigSharesManager::run_iteration`] until shut down. When an
//! iteration did no work the task sleeps until the next scheduled deadline
//! or until new work is queued, whichever comes first.

use crate::ports::outbound::{PeerNetwork, QuorumManager, TimeSource};
use crate::service::SigSharesManager;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle to the running coordinator task.
pub struct SigSharesWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SigSharesWorker {
    /// Spawns the coordinator loop on the current Tokio runtime.
    pub fn spawn<Q, N, T>(manager: Arc<SigSharesManager<Q, N, T>>) -> Self
    where
        Q: QuorumManager + 'static,
        N: PeerNetwork + 'static,
        T: TimeSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(manager, shutdown_rx));
        info!("[qc-18] Signature shares worker started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "[qc-18] Signature shares worker panicked");
            }
        }
    }
}

impl Drop for SigSharesWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run<Q, N, T>(
    manager: Arc<SigSharesManager<Q, N, T>>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    Q: QuorumManager,
    N: PeerNetwork,
    T: TimeSource,
{
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if manager.run_iteration() {
            tokio::task::yield_now().await;
            continue;
        }

        let delay = manager.next_wakeup_delay();
        tokio::select! {
            _ = manager.notified() => {}
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    debug!("[qc-18] Worker handle dropped");
                    break;
                }
            }
        }
    }
    info!("[qc-18] Signature shares worker stopped");
}
