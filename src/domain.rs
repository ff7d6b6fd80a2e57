use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Domain data structures shared across modules.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub access_token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub project: String,
}

/// Snapshot of an open pull request as returned by the listing endpoint.
///
/// `updated_at` is `None` when the upstream timestamp could not be parsed;
/// such a pull never counts as newer than any watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub owner: String,
    pub project: String,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub user: String,
    pub user_avatar: String,
}

impl PullRequest {
    pub fn updated_after(&self, watermark: DateTime<Utc>) -> bool {
        self.updated_at.is_some_and(|updated| updated > watermark)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub repo_count: usize,
    pub pulls: Vec<PullRequest>,
    /// Requests that degraded to an empty result during this aggregation.
    pub failures: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    /// No credentials, or credentials were rejected.
    None,
    Low,
    High,
}

impl Urgency {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Urgency::None => (0x66, 0x00, 0x00),
            Urgency::Low => (0xaa, 0xaa, 0xaa),
            Urgency::High => (0x99, 0x00, 0x00),
        }
    }
}

/// The `{count, urgency}` pair that drives the badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessSignal {
    pub count: usize,
    pub urgency: Urgency,
}

impl FreshnessSignal {
    pub fn new(count: usize, unread: bool) -> Self {
        Self {
            count,
            urgency: if unread { Urgency::High } else { Urgency::Low },
        }
    }

    pub fn no_data() -> Self {
        Self {
            count: 0,
            urgency: Urgency::None,
        }
    }

    pub fn badge_text(&self) -> String {
        match self.urgency {
            Urgency::None => "-".to_owned(),
            _ => self.count.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub click_url: String,
}

impl Notification {
    pub fn for_pull(pull: &PullRequest) -> Self {
        Self {
            title: format!(
                "{}/{} #{}: {}",
                pull.owner, pull.project, pull.number, pull.title
            ),
            click_url: pull.url.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Watermark {
    LastView,
    LastNotification,
    LastRefresh,
}

impl Watermark {
    pub fn key(self) -> &'static str {
        match self {
            Watermark::LastView => "lastView",
            Watermark::LastNotification => "lastNotification",
            Watermark::LastRefresh => "lastRefresh",
        }
    }
}
