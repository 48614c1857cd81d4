//! Background tasks owned by whoever owns the session store.

use std::sync::Arc;
use std::time::Duration;

use crate::task::{spawn_periodic, TaskHandle};

use super::store::SessionStore;

/// Write the store out once each mutation burst goes quiet. The write
/// runs on the blocking pool.
///
/// Cancelling the handle does not flush; call `SessionStore::flush` on the
/// shutdown path.
pub fn spawn_autosave(store: Arc<SessionStore>) -> TaskHandle {
    TaskHandle::spawn("session-autosave", async move {
        loop {
            match store.next_save_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            let writer = store.clone();
                            let write = tokio::task::spawn_blocking(move || writer.flush_if_due());
                            if let Err(e) = write.await {
                                tracing::warn!(error = %e, "Session autosave write failed");
                            }
                        }
                        _ = store.save_requested() => {}
                    }
                }
                None => store.save_requested().await,
            }
        }
    })
}

/// Poll the legacy recent-worlds key every `period`.
pub fn spawn_legacy_sync(store: Arc<SessionStore>, period: Duration) -> TaskHandle {
    spawn_periodic("legacy-worlds-sync", period, move || {
        store.sync_legacy_recent_worlds();
    })
}
