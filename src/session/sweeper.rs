//! Background expiry sweep for server mode.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SessionStore;

/// Calls [`SessionStore::clear_expired`] on a fixed interval.
pub struct SessionSweeper {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Starting session sweeper with {} second interval",
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.store.clear_expired();
                    debug!("Sweep removed {removed} sessions, {} active", self.store.len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ManualClock, SessionId};

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(
            SessionStore::new(Duration::from_secs(60), 10)
                .with_clock(clock.clone())
                .with_sweep_on_access(false),
        );
        store.init(&SessionId::from("idle"));
        clock.advance(Duration::from_secs(120));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            SessionSweeper::new(Arc::clone(&store), Duration::from_millis(10)).run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper should stop on cancel")
            .unwrap();
    }
}
