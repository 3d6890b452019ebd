use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::NotificationStore;

/// Periodic unread-count refresh, independent of the push channel.
///
/// One handle per session. The loop stops on [`PollingFallback::stop`] or
/// when the handle is dropped.
pub struct PollingFallback {
    cancel: CancellationToken,
}

impl PollingFallback {
    /// Spawn the refresh loop. The first refresh happens after one
    /// `interval`, not immediately; the session's snapshot already
    /// carries a fresh count.
    pub fn start(store: Arc<NotificationStore>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            info!("unread polling started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("unread polling stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match store.refresh_unread_count().await {
                            Ok(n) => debug!(unread = n, "unread poll"),
                            Err(e) => warn!(error = %e, "unread poll failed; will retry"),
                        }
                    }
                }
            }
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
