use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use tracing::{info, warn};

use crate::{
    aggregate::Aggregator,
    config::{SettingKey, raw_setting},
    domain::{Credential, FreshnessSignal, Notification, PullRequest, Watermark},
    freshness::relative_age,
    github::{GitHubClient, Transport},
    refresh::{
        NotificationSink, RefreshCoordinator, RefreshOutcome, StatusSignal, SystemClock,
    },
    scheduler::RefreshScheduler,
    storage::Store,
};

pub const APP_NAME: &str = "reviewlog";

pub enum LoginSecret {
    Token(String),
    Password(String),
}

pub struct ReviewLogApp {
    store: Arc<Store>,
    client: GitHubClient,
    aggregator: Aggregator,
    coordinator: Arc<RefreshCoordinator>,
    signal: Arc<dyn StatusSignal>,
}

impl ReviewLogApp {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
        signal: Arc<dyn StatusSignal>,
        notifier: Arc<dyn NotificationSink>,
        pull_concurrency: usize,
    ) -> Self {
        let client = GitHubClient::new(transport, Arc::clone(&store));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            client.clone(),
            Arc::clone(&signal),
            notifier,
            Arc::new(SystemClock),
        )
        .with_pull_concurrency(pull_concurrency);

        Self {
            aggregator: Aggregator::new(client.clone()).with_pull_concurrency(pull_concurrency),
            store,
            client,
            coordinator: Arc::new(coordinator),
            signal,
        }
    }

    /// Refreshes in the background until Ctrl-C.
    pub async fn watch(&self) {
        self.signal.publish(FreshnessSignal::no_data());

        let scheduler =
            RefreshScheduler::new(Arc::clone(&self.coordinator), Arc::clone(&self.store));
        scheduler
            .run(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Unable to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await;
    }

    /// Prints every open pull request, marking those updated since the last
    /// time this ran.
    pub async fn list(&self, filter: &str, refresh: bool) -> Result<()> {
        if self.store.credential().is_none() {
            bail!("Not logged in; run `{APP_NAME} login` first.");
        }

        let last_view = self.store.watermark(Watermark::LastView);
        self.store
            .set_watermark(Watermark::LastView, Utc::now())
            .context("Unable to record the view time")?;

        let result = self.aggregator.list_all_pull_requests(refresh).await;
        println!(
            "{} repositories, {} pull requests",
            result.repo_count,
            result.pulls.len()
        );

        let filter = SearchFilter::new(filter);
        let now = Local::now();
        for pull in result.pulls.iter().filter(|pull| {
            filter.matches_any(&[
                pull.title.as_str(),
                pull.project.as_str(),
                pull.owner.as_str(),
                pull.user.as_str(),
            ])
        }) {
            let line = render_pull(pull, last_view, &now);
            if pull.updated_after(last_view) {
                println!("{}", line.bold());
            } else {
                println!("{line}");
            }
        }

        self.signal
            .publish(FreshnessSignal::new(result.pulls.len(), false));
        Ok(())
    }

    /// Stores the credential and runs a refresh right away.
    pub async fn login(&self, username: &str, secret: LoginSecret) -> Result<RefreshOutcome> {
        let username = username.trim();
        if username.is_empty() {
            bail!("A GitHub username is required.");
        }

        let access_token = match secret {
            LoginSecret::Token(token) => token.trim().to_owned(),
            LoginSecret::Password(password) => self
                .client
                .issue_token(username, &password)
                .await
                .context("Failed to authenticate, please try again.")?,
        };
        if access_token.is_empty() {
            bail!("A personal access token is required.");
        }

        self.store
            .save_credential(&Credential {
                username: username.to_owned(),
                access_token,
            })
            .context("Unable to persist credentials locally")?;
        info!("Log in successful");

        let outcome = self.coordinator.trigger().await;
        match &outcome {
            RefreshOutcome::Published(summary) => println!(
                "Logged in as {username}: {} repositories, {} pull requests",
                summary.repo_count, summary.pull_count
            ),
            RefreshOutcome::CredentialsRejected => {
                bail!("GitHub rejected the credentials for {username}.")
            }
            RefreshOutcome::VerificationFailed => println!(
                "Logged in as {username}, but GitHub could not be reached; the next refresh will retry."
            ),
            RefreshOutcome::NoLogin | RefreshOutcome::Abandoned => {}
        }
        Ok(outcome)
    }

    pub fn config_get(&self, key: Option<SettingKey>) {
        let keys = match key {
            Some(key) => vec![key],
            None => SettingKey::ALL.to_vec(),
        };
        for key in keys {
            match raw_setting(&self.store, key) {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is not set"),
            }
        }
    }

    pub fn config_set(&self, key: SettingKey, value: &str) -> Result<()> {
        let value = key.validate(value)?;
        self.store
            .set(key.as_str(), &value)
            .with_context(|| format!("Unable to save {key}"))?;
        println!("{key} = {value}");
        Ok(())
    }
}

fn render_pull<Tz: chrono::TimeZone>(
    pull: &PullRequest,
    last_view: DateTime<Utc>,
    now: &DateTime<Tz>,
) -> String {
    let marker = if pull.updated_after(last_view) { "*" } else { " " };
    format!(
        "{marker} {} in {} ({}, {})\n    {}",
        pull.title,
        pull.project,
        pull.user,
        relative_age(pull.updated_at, now),
        pull.url
    )
}

// -----------------------------------------------------------------------------
// Console surfaces
// -----------------------------------------------------------------------------

/// Prints the badge whenever it changes.
pub struct ConsoleBadge;

impl StatusSignal for ConsoleBadge {
    fn publish(&self, signal: FreshnessSignal) {
        let (r, g, b) = signal.urgency.rgb();
        let badge = format!(" {} ", signal.badge_text())
            .white()
            .bold()
            .on_truecolor(r, g, b);
        println!("{} {badge}", Local::now().format("%H:%M"));
    }
}

pub struct ConsoleNotifier;

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, notification: &Notification) {
        println!(
            "{} {}\n    {}",
            "●".yellow(),
            notification.title.bold(),
            notification.click_url.underline()
        );
    }
}

// -----------------------------------------------------------------------------
// Search filtering
// -----------------------------------------------------------------------------

struct SearchFilter {
    needle: Option<String>,
}

impl SearchFilter {
    fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let needle = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_lowercase())
        };
        Self { needle }
    }

    fn matches_any(&self, fields: &[&str]) -> bool {
        match &self.needle {
            None => true,
            Some(needle) => fields
                .iter()
                .any(|field| field.to_lowercase().contains(needle)),
        }
    }
}
