//! Periodic removal of finalized saga instances.
//!
//! Finalized sagas are kept for a while so late duplicate events still find a
//! tombstone and are ignored. Once the retention window has passed they are
//! dropped from the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::SagaStore;
use crate::workers::WorkerHandle;

const WORKER_NAME: &str = "saga-janitor";

#[derive(Debug)]
pub struct SagaJanitor;

impl SagaJanitor {
    /// Purge sagas finalized more than `retention` ago, once every `interval`.
    ///
    /// The first pass runs immediately.
    pub fn spawn(store: Arc<dyn SagaStore>, retention: Duration, interval: Duration) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(purge_loop(store, retention, interval, shutdown_rx));
        info!(worker = WORKER_NAME, ?retention, ?interval, "saga janitor started");
        WorkerHandle::new(WORKER_NAME, shutdown_tx, join)
    }
}

async fn purge_loop(
    store: Arc<dyn SagaStore>,
    retention: Duration,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Some(cutoff) = Utc::now().checked_sub_signed(retention) {
                    match store.purge_finalized(cutoff).await {
                        Ok(0) => debug!(worker = WORKER_NAME, "no finalized sagas to purge"),
                        Ok(purged) => info!(worker = WORKER_NAME, purged, %cutoff, "finalized sagas purged"),
                        Err(e) => warn!(worker = WORKER_NAME, error = %e, "saga purge failed"),
                    }
                }
            }
        }
    }

    info!(worker = WORKER_NAME, "saga janitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::InMemorySagaStore;
    use docproc_core::ProcessId;
    use docproc_events::{SagaPhase, SagaState};

    fn finalized(age: TimeDelta) -> SagaState {
        let mut s = SagaState::new(ProcessId::new(), 1, Utc::now() - age);
        s.current_state = SagaPhase::Completed;
        s
    }

    #[tokio::test(start_paused = true)]
    async fn old_tombstones_are_purged_on_every_pass() {
        let store = Arc::new(InMemorySagaStore::new());
        let old = finalized(TimeDelta::hours(2));
        let fresh = finalized(TimeDelta::zero());
        let running = SagaState::new(ProcessId::new(), 1, Utc::now() - TimeDelta::hours(2));
        for s in [&old, &fresh, &running] {
            store.insert(s).await.unwrap();
        }

        let handle = SagaJanitor::spawn(store.clone(), Duration::from_secs(3600), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.load(old.correlation_id).await.unwrap().is_none());
        assert!(store.load(fresh.correlation_id).await.unwrap().is_some());
        assert!(store.load(running.correlation_id).await.unwrap().is_some());

        // Finalized after the first pass; picked up by the next one.
        let late = finalized(TimeDelta::hours(3));
        store.insert(&late).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.load(late.correlation_id).await.unwrap().is_none());
        assert_eq!(store.len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let store = Arc::new(InMemorySagaStore::new());
        let handle = SagaJanitor::spawn(store.clone(), Duration::from_secs(1), Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("janitor joins promptly");
    }
}
