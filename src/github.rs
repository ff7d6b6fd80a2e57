use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    Client, RequestBuilder,
    header::{ACCEPT, USER_AGENT},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::Settings,
    domain::{Credential, PullRequest, RepoRef},
    storage::Store,
};

const GH_API: &str = "https://api.github.com";
const USER_AGENT_HEADER: &str = "reviewlog/0.1";
const PER_PAGE: u32 = 100;
const TOKEN_NOTE: &str = "reviewlog";

pub const ORGS_KEY: &str = "orgs";
pub const REPOS_KEY_PREFIX: &str = "repos_";
pub const PULLS_KEY_PREFIX: &str = "pulls_";

#[derive(Clone, Debug)]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Moves requests to the hosting API. Paths are relative to the API root.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, auth: &Auth) -> Result<HttpResponse, ApiError>;
    async fn post_json(
        &self,
        path: &str,
        auth: &Auth,
        body: &Value,
    ) -> Result<HttpResponse, ApiError>;
}

pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(USER_AGENT_HEADER)
            .build()
            .map_err(ApiError::Http)?;
        Ok(Self {
            client,
            base_url: GH_API.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(request: RequestBuilder, auth: &Auth) -> Result<HttpResponse, ApiError> {
        let request = match auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        let response = request
            .header(USER_AGENT, USER_AGENT_HEADER)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, path: &str, auth: &Auth) -> Result<HttpResponse, ApiError> {
        Self::send(self.client.get(self.url(path)), auth).await
    }

    async fn post_json(
        &self,
        path: &str,
        auth: &Auth,
        body: &Value,
    ) -> Result<HttpResponse, ApiError> {
        Self::send(self.client.post(self.url(path)).json(body), auth).await
    }
}

/// Result of a listing call. Failures carry the cause for diagnostics but
/// callers that only want data see an empty value.
#[derive(Debug)]
pub enum Fetched<T> {
    Cached(T),
    Fresh(T),
    Failed(ApiError),
}

impl<T: Default> Fetched<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Fetched::Failed(_))
    }

    pub fn into_data(self) -> T {
        match self {
            Fetched::Cached(data) | Fetched::Fresh(data) => data,
            Fetched::Failed(_) => T::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
}

/// Hosting API client. Every listing goes through the store: a cached entry
/// answers without a request unless `force` is set.
#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn Transport>,
    store: Arc<Store>,
}

impl GitHubClient {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<Store>) -> Self {
        Self { transport, store }
    }

    /// Checks the stored token against the user lookup endpoint.
    ///
    /// Server errors come back as `Err` so an upstream outage is not taken
    /// for a revoked token.
    pub async fn verify_credentials(&self) -> Result<Verification, ApiError> {
        let credential = self.credential()?;
        let path = format!("users/{}", credential.username);
        let response = self
            .transport
            .get(&path, &Auth::Bearer(credential.access_token))
            .await?;

        match response.status {
            status if is_success(status) => Ok(Verification::Valid),
            status if (500..600).contains(&status) => Err(ApiError::Status(status)),
            status => {
                debug!(status, "Credential check rejected");
                Ok(Verification::Invalid)
            }
        }
    }

    /// Exchanges a username and password for a `repo`-scoped token.
    pub async fn issue_token(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let auth = Auth::Basic {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        let body = json!({ "scopes": ["repo"], "note": TOKEN_NOTE });
        let response = self
            .transport
            .post_json("authorizations", &auth, &body)
            .await?;
        if response.status != 201 {
            return Err(ApiError::Status(response.status));
        }
        let payload: TokenResponse = serde_json::from_str(&response.body)?;
        Ok(payload.token)
    }

    pub async fn list_organizations(&self, force: bool) -> Fetched<Vec<String>> {
        self.cached_or_fetch(ORGS_KEY, "user/orgs", force, |body| {
            let orgs: Vec<OrgResponse> = serde_json::from_str(body)?;
            Ok(orgs.into_iter().map(|org| org.login).collect())
        })
        .await
    }

    /// Lists repositories under `path`, cached as `repos_<scope>`. Projects
    /// named in the ignore setting are dropped before caching.
    pub async fn list_repositories(
        &self,
        scope: &str,
        path: &str,
        force: bool,
    ) -> Fetched<Vec<RepoRef>> {
        let key = format!("{REPOS_KEY_PREFIX}{scope}");
        let settings = Settings::load(&self.store);
        self.cached_or_fetch(&key, path, force, move |body| {
            let repos: Vec<RepoResponse> = serde_json::from_str(body)?;
            Ok(repos
                .into_iter()
                .filter_map(|repo| split_full_name(&repo.full_name))
                .filter(|repo| !settings.is_ignored(&repo.project))
                .collect())
        })
        .await
    }

    pub async fn list_user_repositories(&self, force: bool) -> Fetched<Vec<RepoRef>> {
        self.list_repositories("user", "user/repos", force).await
    }

    pub async fn list_org_repositories(&self, org: &str, force: bool) -> Fetched<Vec<RepoRef>> {
        let scope = format!("orgs_{org}");
        let path = format!("orgs/{org}/repos");
        self.list_repositories(&scope, &path, force).await
    }

    pub async fn list_pull_requests(
        &self,
        owner: &str,
        project: &str,
        force: bool,
    ) -> Fetched<Vec<PullRequest>> {
        let key = format!("{PULLS_KEY_PREFIX}{owner}_{project}");
        let path = format!("repos/{owner}/{project}/pulls");
        self.cached_or_fetch(&key, &path, force, |body| {
            let pulls: Vec<PullResponse> = serde_json::from_str(body)?;
            Ok(pulls
                .into_iter()
                .map(|pull| normalize_pull(pull, owner, project))
                .collect())
        })
        .await
    }

    async fn cached_or_fetch<T, F>(
        &self,
        key: &str,
        path: &str,
        force: bool,
        normalize: F,
    ) -> Fetched<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(&str) -> Result<Vec<T>, ApiError> + Send,
    {
        if !force && let Some(hit) = self.store.get_as::<Vec<T>>(key, false) {
            debug!(key, "Retrieved from store");
            return Fetched::Cached(hit);
        }

        debug!(key, "Fetching");
        match self.fetch_list(path, normalize).await {
            Ok(items) => {
                if let Err(err) = self.store.set(key, &items) {
                    warn!(key, error = %err, "Failed to cache response");
                }
                Fetched::Fresh(items)
            }
            Err(err) => {
                warn!(key, error = %err, "Request failed");
                Fetched::Failed(err)
            }
        }
    }

    async fn fetch_list<T, F>(&self, path: &str, normalize: F) -> Result<Vec<T>, ApiError>
    where
        F: FnOnce(&str) -> Result<Vec<T>, ApiError>,
    {
        let credential = self.credential()?;
        let path = format!("{path}?per_page={PER_PAGE}");
        let response = self
            .transport
            .get(&path, &Auth::Bearer(credential.access_token))
            .await?;
        if !is_success(response.status) {
            return Err(ApiError::Status(response.status));
        }
        normalize(&response.body)
    }

    fn credential(&self) -> Result<Credential, ApiError> {
        self.store.credential().ok_or(ApiError::MissingToken)
    }
}

fn is_success(status: u16) -> bool {
    status == 200 || status == 304
}

fn split_full_name(full_name: &str) -> Option<RepoRef> {
    let (owner, project) = full_name.split_once('/')?;
    Some(RepoRef {
        owner: owner.to_owned(),
        project: project.to_owned(),
    })
}

fn normalize_pull(pull: PullResponse, owner: &str, project: &str) -> PullRequest {
    let updated_at = pull.updated_at.as_deref().and_then(parse_instant);
    let (user, user_avatar) = pull
        .user
        .map(|user| (user.login, user.avatar_url))
        .unwrap_or_default();
    PullRequest {
        number: pull.number,
        title: pull.title,
        body: pull.body,
        url: pull.html_url,
        owner: owner.to_owned(),
        project: project.to_owned(),
        updated_at,
        user,
        user_avatar,
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GitHub API responded with status {0}")]
    Status(u16),
    #[error("Malformed GitHub API response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Account token is missing")]
    MissingToken,
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OrgResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    updated_at: Option<String>,
    user: Option<GitHubUser>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    avatar_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
