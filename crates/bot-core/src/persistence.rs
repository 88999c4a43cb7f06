//! Persistence scheduler: periodically snapshots
//! the reputation cache to disk and loads it back at startup. A failed
//! write is logged and the scheduler simply tries again on its next tick —
//! the kernel always keeps running off in-memory state in the meantime.
//!
//! Wraps `ReputationCache::persist`/`load` in a `tokio::time::interval`
//! loop so the owning binary can drain one last snapshot before exit.

use crate::capabilities::Clock;
use crate::reputation::ReputationCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct PersistenceScheduler {
    reputation: ReputationCache,
    path: PathBuf,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl PersistenceScheduler {
    pub fn new(reputation: ReputationCache, path: PathBuf, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            reputation,
            path,
            interval,
            clock,
        }
    }

    /// Best-effort warm start at process boot.
    pub async fn load_at_startup(&self) -> usize {
        match self.reputation.load(&self.path).await {
            Ok(n) => {
                tracing::info!(entries = n, path = %self.path.display(), "loaded reputation snapshot");
                n
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "no usable reputation snapshot, starting cold");
                0
            }
        }
    }

    /// Run forever, persisting on a fixed tick until `shutdown` resolves.
    /// A failed tick is logged and retried next tick rather than aborting
    /// the loop.
    pub async fn run(&self, mut shutdown: impl std::future::Future<Output = ()> + Unpin) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.persist_once().await;
                }
                _ = &mut shutdown => {
                    self.persist_once().await;
                    break;
                }
            }
        }
    }

    async fn persist_once(&self) {
        let _now = self.clock.now();
        match self.reputation.persist(&self.path).await {
            Ok(()) => tracing::debug!(entries = self.reputation.len(), path = %self.path.display(), "persisted reputation snapshot"),
            Err(err) => tracing::warn!(error = %err, path = %self.path.display(), "reputation persist failed, retrying next tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SystemClock;
    use bot_protocol::PatternType;

    #[tokio::test]
    async fn load_at_startup_on_missing_file_returns_zero_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let reputation = ReputationCache::new(crate::config::Config::default().reputation);
        let scheduler = PersistenceScheduler::new(reputation, path, Duration::from_secs(60), Arc::new(SystemClock));
        assert_eq!(scheduler.load_at_startup().await, 0);
    }

    #[tokio::test]
    async fn persist_once_then_reload_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reputation.json");
        let reputation = ReputationCache::new(crate::config::Config::default().reputation);
        let now = chrono::Utc::now();
        reputation.apply_evidence("p1", PatternType::Ua, "chrome", 0.8, 4.0, now);

        let scheduler = PersistenceScheduler::new(reputation.clone(), path.clone(), Duration::from_secs(60), Arc::new(SystemClock));
        scheduler.persist_once().await;

        let restored = ReputationCache::new(crate::config::Config::default().reputation);
        let scheduler2 = PersistenceScheduler::new(restored, path, Duration::from_secs(60), Arc::new(SystemClock));
        assert_eq!(scheduler2.load_at_startup().await, 1);
    }
}
