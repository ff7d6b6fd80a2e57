//! User settings kept in the key-value store.
//!
//! Settings are stored as plain strings the way a settings form would save
//! them, and parsed leniently: anything unusable falls back to a default.

use std::{fmt, time::Duration};

use clap::ValueEnum;
use serde_json::Value;
use thiserror::Error;

use crate::storage::Store;

pub const DEFAULT_REFRESH_MINUTES: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SettingKey {
    /// Minutes between background refreshes.
    #[value(name = "refresh_rate")]
    RefreshRate,
    /// Comma-separated words; only pulls mentioning one trigger a notification.
    #[value(name = "alert_words")]
    AlertWords,
    /// Comma-separated project names to leave out of every listing.
    #[value(name = "ignore_repos")]
    IgnoreRepos,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::RefreshRate,
        SettingKey::AlertWords,
        SettingKey::IgnoreRepos,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::RefreshRate => "refresh_rate",
            SettingKey::AlertWords => "alert_words",
            SettingKey::IgnoreRepos => "ignore_repos",
        }
    }

    /// Checks a value typed by the user before it is saved.
    pub fn validate(self, raw: &str) -> Result<String, ConfigError> {
        let trimmed = raw.trim();
        if self == SettingKey::RefreshRate && parse_minutes(trimmed).is_none() {
            return Err(ConfigError::InvalidRefreshRate(trimmed.to_owned()));
        }
        Ok(trimmed.to_owned())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub refresh_interval: Duration,
    pub alert_keywords: Vec<String>,
    pub ignored_repos: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_raw(None, None, None)
    }
}

impl Settings {
    /// Reads the current settings, bypassing the in-memory cache so edits
    /// made by another process are seen.
    pub fn load(store: &Store) -> Self {
        let refresh = raw_setting(store, SettingKey::RefreshRate);
        let alert = raw_setting(store, SettingKey::AlertWords);
        let ignore = raw_setting(store, SettingKey::IgnoreRepos);
        Self::from_raw(refresh.as_deref(), alert.as_deref(), ignore.as_deref())
    }

    pub fn from_raw(refresh: Option<&str>, alert: Option<&str>, ignore: Option<&str>) -> Self {
        Self {
            refresh_interval: refresh_interval(refresh),
            alert_keywords: split_list(alert),
            ignored_repos: split_list(ignore),
        }
    }

    pub fn is_ignored(&self, project: &str) -> bool {
        self.ignored_repos.iter().any(|name| name == project)
    }
}

/// Returns the stored text for a setting, accepting numbers saved as JSON
/// numbers as well as strings.
pub fn raw_setting(store: &Store, key: SettingKey) -> Option<String> {
    match store.get(key.as_str(), true)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Positive minutes become the interval; anything else means two minutes.
pub fn refresh_interval(raw: Option<&str>) -> Duration {
    raw.and_then(parse_minutes)
        .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_REFRESH_MINUTES * 60.0))
}

fn parse_minutes(raw: &str) -> Option<Duration> {
    let minutes = raw.trim().parse::<f64>().ok()?;
    if !minutes.is_finite() || minutes <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(minutes * 60.0).ok()
}

pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|text| {
        text.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("refresh_rate must be a positive number of minutes, got {0:?}")]
    InvalidRefreshRate(String),
}
