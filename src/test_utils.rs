//! Test fixtures: a scripted transport, recording sinks and a wired-up
//! coordinator over an in-memory store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::{
    aggregate::Aggregator,
    domain::{Credential, FreshnessSignal, Notification, PullRequest},
    github::{ApiError, Auth, GitHubClient, HttpResponse, Transport},
    refresh::{Clock, NotificationSink, RefreshCoordinator, StatusSignal},
    storage::{Store, memory::MemoryBackend},
};

/// 2024-06-01T12:00:00Z, the fixture clock's current time.
pub const NOW_MS: i64 = 1_717_243_200_000;

pub fn pull(owner: &str, project: &str, number: u64, updated_ms: i64) -> PullRequest {
    PullRequest {
        number,
        title: format!("Change {number}"),
        body: Some(format!("Description of change {number}")),
        url: format!("https://github.com/{owner}/{project}/pull/{number}"),
        owner: owner.to_owned(),
        project: project.to_owned(),
        updated_at: Utc.timestamp_millis_opt(updated_ms).single(),
        user: owner.to_owned(),
        user_avatar: format!("https://avatars.example/{owner}"),
    }
}

/// One element of a pull request listing as the API returns it.
pub fn pull_json(number: u64, title: &str, updated_at: &str) -> String {
    json!({
        "number": number,
        "title": title,
        "body": format!("Description of change {number}"),
        "html_url": format!("https://github.com/octo/repo/pull/{number}"),
        "updated_at": updated_at,
        "user": {
            "login": format!("author{number}"),
            "avatar_url": format!("https://avatars.example/author{number}"),
        },
    })
    .to_string()
}

pub fn repos_json(full_names: &[&str]) -> String {
    let repos: Vec<Value> = full_names
        .iter()
        .map(|name| json!({ "full_name": name }))
        .collect();
    Value::Array(repos).to_string()
}

/// Holds a request until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Answers requests from canned responses keyed by path (query stripped).
/// Unknown paths get a 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<(String, Auth)>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl FakeTransport {
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.routes.lock().unwrap().insert(
            path.to_owned(),
            HttpResponse {
                status,
                body: body.to_owned(),
            },
        );
    }

    /// Makes the next request to `path` wait for `release`.
    pub fn gate(&self, path: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_owned(), Arc::clone(&gate));
        gate
    }

    pub fn requests(&self) -> Vec<(String, Auth)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| route(requested) == path)
            .count()
    }

    async fn answer(&self, path: &str, auth: &Auth) -> Result<HttpResponse, ApiError> {
        self.requests
            .lock()
            .unwrap()
            .push((path.to_owned(), auth.clone()));

        let route = route(path).to_owned();
        let gate = self.gates.lock().unwrap().remove(&route);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let response = self.routes.lock().unwrap().get(&route).cloned();
        Ok(response.unwrap_or(HttpResponse {
            status: 404,
            body: r#"{"message":"Not Found"}"#.to_owned(),
        }))
    }
}

fn route(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str, auth: &Auth) -> Result<HttpResponse, ApiError> {
        self.answer(path, auth).await
    }

    async fn post_json(
        &self,
        path: &str,
        auth: &Auth,
        _body: &Value,
    ) -> Result<HttpResponse, ApiError> {
        self.answer(path, auth).await
    }
}

#[derive(Default)]
pub struct RecordingSignal {
    published: Mutex<Vec<FreshnessSignal>>,
}

impl RecordingSignal {
    pub fn published(&self) -> Vec<FreshnessSignal> {
        self.published.lock().unwrap().clone()
    }
}

impl StatusSignal for RecordingSignal {
    fn publish(&self, signal: FreshnessSignal) {
        self.published.lock().unwrap().push(signal);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|note| note.title.clone())
            .collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Advances by `step` on every reading, starting at `start`.
pub struct SteppingClock {
    next: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + self.step;
        now
    }
}

pub struct Fixture {
    pub backend: MemoryBackend,
    pub store: Arc<Store>,
    pub transport: Arc<FakeTransport>,
    pub client: GitHubClient,
    pub aggregator: Aggregator,
    pub signal: Arc<RecordingSignal>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: Arc<RefreshCoordinator>,
}

impl Fixture {
    pub fn new() -> Self {
        let backend = MemoryBackend::default();
        let store = Arc::new(Store::new(backend.clone()));
        let transport = Arc::new(FakeTransport::default());
        let client = GitHubClient::new(transport.clone(), Arc::clone(&store));
        let signal = Arc::new(RecordingSignal::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock(Utc.timestamp_millis_opt(NOW_MS).unwrap()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            client.clone(),
            signal.clone(),
            notifier.clone(),
            clock,
        );

        Self {
            backend,
            store,
            transport,
            aggregator: Aggregator::new(client.clone()),
            client,
            signal,
            notifier,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn logged_in() -> Self {
        let fixture = Self::new();
        fixture
            .store
            .save_credential(&Credential {
                username: "octo".into(),
                access_token: "ghp_test".into(),
            })
            .unwrap();
        fixture
    }
}
