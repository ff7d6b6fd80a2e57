use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    config::Settings,
    refresh::{RefreshCoordinator, RefreshOutcome, Tick},
    storage::Store,
};

/// Runs a refresh cycle every configured interval.
///
/// The interval is read again at the start of every cycle, so a changed
/// `refresh_rate` applies from the next cycle on.
pub struct RefreshScheduler {
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<Store>,
}

impl RefreshScheduler {
    pub fn new(coordinator: Arc<RefreshCoordinator>, store: Arc<Store>) -> Self {
        Self { coordinator, store }
    }

    pub fn next_interval(&self) -> Duration {
        Settings::load(&self.store).refresh_interval
    }

    /// Ticks until `shutdown` resolves. Each tick runs as its own task, so a
    /// slow cycle does not hold back the timer; ticks that land on a running
    /// cycle are dropped by the coordinator.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Refresh scheduler started");

        loop {
            let interval = self.next_interval();
            debug!(?interval, "Next refresh scheduled");

            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                match coordinator.tick().await {
                    Tick::Ran(RefreshOutcome::Published(summary)) => info!(
                        repos = summary.repo_count,
                        pulls = summary.pull_count,
                        unread = summary.unread,
                        notified = summary.notified,
                        failures = summary.failures,
                        "Refresh complete"
                    ),
                    Tick::Ran(outcome) => debug!(?outcome, "Refresh ended early"),
                    Tick::Skipped => debug!(phase = ?coordinator.phase(), "Tick skipped"),
                }
            });

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
