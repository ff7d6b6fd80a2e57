//! Single-flight refresh cycles.
//!
//! A cycle verifies the stored credential, aggregates every open pull
//! request, publishes the freshness signal and emits notifications. At most
//! one cycle runs at a time: a timer tick that arrives mid-cycle is dropped,
//! while an external trigger waits for the running cycle and receives its
//! outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    aggregate::Aggregator,
    config::Settings,
    domain::{FreshnessSignal, Notification, Watermark},
    freshness::{has_unread, should_notify},
    github::{GitHubClient, PULLS_KEY_PREFIX, Verification},
    storage::Store,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Renders the badge state.
pub trait StatusSignal: Send + Sync {
    fn publish(&self, signal: FreshnessSignal);
}

/// Shows a notification; clicking it should open `click_url`.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Verifying,
    Fetching,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleSummary {
    pub repo_count: usize,
    pub pull_count: usize,
    pub unread: bool,
    pub notified: usize,
    pub failures: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published(CycleSummary),
    NoLogin,
    /// The credential check could not complete; nothing was changed.
    VerificationFailed,
    /// The token was refused and has been cleared.
    CredentialsRejected,
    /// The cycle this caller waited on ended without reporting back.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    Ran(RefreshOutcome),
    Skipped,
}

struct RefreshState {
    phase: Phase,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

pub struct RefreshCoordinator {
    store: Arc<Store>,
    client: GitHubClient,
    aggregator: Aggregator,
    signal: Arc<dyn StatusSignal>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<Store>,
        client: GitHubClient,
        signal: Arc<dyn StatusSignal>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            aggregator: Aggregator::new(client.clone()),
            client,
            signal,
            notifier,
            clock,
            state: Mutex::new(RefreshState {
                phase: Phase::Idle,
                waiters: Vec::new(),
            }),
        }
    }

    pub fn with_pull_concurrency(mut self, limit: usize) -> Self {
        self.aggregator = self.aggregator.with_pull_concurrency(limit);
        self
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Timer entry point. Does nothing if a cycle is already running.
    pub async fn tick(self: &Arc<Self>) -> Tick {
        let Some(done) = self.try_begin() else {
            info!("Refresh already in progress");
            return Tick::Skipped;
        };
        Tick::Ran(done.await.unwrap_or(RefreshOutcome::Abandoned))
    }

    /// External entry point, e.g. right after login. Starts a cycle, or joins
    /// the running one and resolves once it completes.
    pub async fn trigger(self: &Arc<Self>) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.state();
            state.waiters.push(tx);
            let idle = state.phase == Phase::Idle;
            if idle {
                state.phase = Phase::Verifying;
            }
            idle
        };

        if start {
            self.spawn_cycle();
        } else {
            debug!("Waiting for the refresh in progress");
        }
        rx.await.unwrap_or(RefreshOutcome::Abandoned)
    }

    fn try_begin(self: &Arc<Self>) -> Option<oneshot::Receiver<RefreshOutcome>> {
        let rx = {
            let mut state = self.state();
            if state.phase != Phase::Idle {
                return None;
            }
            state.phase = Phase::Verifying;
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };
        self.spawn_cycle();
        Some(rx)
    }

    /// The cycle runs on its own task, so it completes and reports to every
    /// waiter even when the caller that started it goes away.
    fn spawn_cycle(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run_cycle().await });
    }

    async fn run_cycle(&self) {
        let started_at = self.clock.now();
        info!(%started_at, "Refreshing");

        // Every read this cycle goes back to durable storage.
        self.store.clear_shadow();

        let outcome = self.verify_and_fetch().await;
        self.finish(&outcome);
    }

    async fn verify_and_fetch(&self) -> RefreshOutcome {
        if self.store.credential().is_none() {
            info!("No login credentials");
            return RefreshOutcome::NoLogin;
        }

        match self.client.verify_credentials().await {
            Err(err) => {
                warn!(error = %err, "Error verifying login details");
                RefreshOutcome::VerificationFailed
            }
            Ok(Verification::Invalid) => {
                self.purge_credentials();
                RefreshOutcome::CredentialsRejected
            }
            Ok(Verification::Valid) => {
                info!("Valid login, requesting all pull requests");
                self.state().phase = Phase::Fetching;
                RefreshOutcome::Published(self.fetch_and_publish().await)
            }
        }
    }

    async fn fetch_and_publish(&self) -> CycleSummary {
        let aggregate = self.aggregator.list_all_pull_requests(true).await;

        let last_view = self.store.watermark(Watermark::LastView);
        let last_notification = self.store.watermark(Watermark::LastNotification);
        self.record(Watermark::LastNotification, self.clock.now());

        let settings = Settings::load(&self.store);
        let mut notified = 0;
        for pull in aggregate
            .pulls
            .iter()
            .filter(|pull| should_notify(pull, last_notification, &settings.alert_keywords))
        {
            self.notifier.notify(&Notification::for_pull(pull));
            notified += 1;
        }

        let unread = has_unread(&aggregate.pulls, last_view);
        self.signal
            .publish(FreshnessSignal::new(aggregate.pulls.len(), unread));
        self.record(Watermark::LastRefresh, self.clock.now());

        CycleSummary {
            repo_count: aggregate.repo_count,
            pull_count: aggregate.pulls.len(),
            unread,
            notified,
            failures: aggregate.failures,
        }
    }

    /// Drops the credential and cached pull requests. Cached repository
    /// lists stay.
    fn purge_credentials(&self) {
        warn!("Auth token invalid, clearing credentials");
        if let Err(err) = self.store.clear_credential() {
            warn!(error = %err, "Failed to clear credentials");
        }
        match self.store.delete_prefixed(PULLS_KEY_PREFIX) {
            Ok(removed) => debug!(removed, "Removed cached pull requests"),
            Err(err) => warn!(error = %err, "Failed to remove cached pull requests"),
        }
        self.signal.publish(FreshnessSignal::no_data());
    }

    fn record(&self, mark: Watermark, at: DateTime<Utc>) {
        if let Err(err) = self.store.set_watermark(mark, at) {
            warn!(key = mark.key(), error = %err, "Failed to store watermark");
        }
    }

    fn finish(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.state();
            state.phase = Phase::Idle;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), ?outcome, "Refresh finished");
        for waiter in waiters {
            if waiter.send(outcome.clone()).is_err() {
                debug!("Waiter went away before the refresh finished");
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
