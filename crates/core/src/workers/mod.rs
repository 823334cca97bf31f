//! Workers — the long-lived background tasks: the lifecycle executor and
//! the compute state reconciler. Both only ever mutate state through their
//! service's public methods (never repositories directly), per §5's shared-
//! resource rule, and both carry a cooperative cancellation signal rather
//! than being killed mid-tick.

use std::time::Duration;

use tokio::sync::watch;

use crate::compute::ComputeService;
use crate::objectstore::ObjectStoreService;

/// A cheap-to-clone cancellation handle. Dropping the paired sender (or
/// calling `cancel()`) wakes every loop waiting in `cancelled()`.
#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancellation_pair() -> (CancellationHandle, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationToken { rx })
}

impl CancellationToken {
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Runs `run_lifecycle_once` on `interval`, logging each sweep's outcome,
/// until cancelled. The interval is the only scheduling dimension (no
/// backoff, no catch-up): a slow tick just means the next one is later.
pub async fn lifecycle_loop(service: ObjectStoreService, interval: Duration, mut cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.run_lifecycle_once().await {
                    Ok(summary) => tracing::info!(
                        buckets = summary.buckets_evaluated,
                        deleted = summary.objects_deleted,
                        archived = summary.objects_archived,
                        "lifecycle sweep complete",
                    ),
                    Err(e) => tracing::warn!(error = %e, "lifecycle sweep failed"),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("lifecycle worker shutting down");
                break;
            }
        }
    }
}

/// Runs `reconcile_once` on `interval` until cancelled.
pub async fn reconcile_loop(service: ComputeService, interval: Duration, mut cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.reconcile_once().await {
                    Ok(summary) => tracing::info!(
                        inspected = summary.instances_inspected,
                        changed = summary.instances_changed,
                        "reconcile sweep complete",
                    ),
                    Err(e) => tracing::warn!(error = %e, "reconcile sweep failed"),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("reconciler worker shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_wakes_a_waiting_loop() {
        let (handle, mut token) = cancellation_pair();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
