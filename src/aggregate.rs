//! Fan-out across organizations and repositories into one pull request list.

use futures::{StreamExt, future::join_all, join, stream};
use tracing::{debug, info};

use crate::{
    domain::{Aggregate, PullRequest, RepoRef},
    freshness::sort_newest_first,
    github::GitHubClient,
};

/// Pull request requests in flight at once. One keeps the upstream load to a
/// single request at a time.
pub const DEFAULT_PULL_CONCURRENCY: usize = 1;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RepoListing {
    pub repos: Vec<RepoRef>,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Aggregator {
    client: GitHubClient,
    pull_concurrency: usize,
}

impl Aggregator {
    pub fn new(client: GitHubClient) -> Self {
        Self {
            client,
            pull_concurrency: DEFAULT_PULL_CONCURRENCY,
        }
    }

    pub fn with_pull_concurrency(mut self, limit: usize) -> Self {
        self.pull_concurrency = limit.max(1);
        self
    }

    /// Lists personal repositories and those of every organization. The
    /// organization branch and the personal branch run concurrently, and each
    /// organization's listing runs concurrently with the others.
    pub async fn list_all_repositories(&self, force: bool) -> RepoListing {
        let orgs_branch = async {
            let orgs = self.client.list_organizations(force).await;
            let mut failures = usize::from(orgs.is_failed());
            let orgs = orgs.into_data();
            debug!(orgs = orgs.len(), "Listing organization repositories");

            let listings = join_all(
                orgs.iter()
                    .map(|org| self.client.list_org_repositories(org, force)),
            )
            .await;

            let mut repos = Vec::new();
            for listing in listings {
                failures += usize::from(listing.is_failed());
                repos.extend(listing.into_data());
            }
            (repos, failures)
        };
        let user_branch = self.client.list_user_repositories(force);

        let ((mut repos, mut failures), user) = join!(orgs_branch, user_branch);
        failures += usize::from(user.is_failed());
        repos.extend(user.into_data());

        RepoListing { repos, failures }
    }

    /// Collects the open pull requests of every repository, newest first.
    ///
    /// Repositories are visited with at most `pull_concurrency` requests in
    /// flight; results are concatenated in repository order before sorting.
    pub async fn list_all_pull_requests(&self, force: bool) -> Aggregate {
        let RepoListing {
            repos,
            mut failures,
        } = self.list_all_repositories(force).await;

        let pending: Vec<_> = repos
            .iter()
            .map(|repo| {
                self.client
                    .list_pull_requests(&repo.owner, &repo.project, force)
            })
            .collect();
        let fetched: Vec<_> = stream::iter(pending)
            .buffered(self.pull_concurrency)
            .collect()
            .await;

        let mut pulls: Vec<PullRequest> = Vec::new();
        for listing in fetched {
            failures += usize::from(listing.is_failed());
            pulls.extend(listing.into_data());
        }
        sort_newest_first(&mut pulls);

        info!(
            repos = repos.len(),
            pulls = pulls.len(),
            failures,
            "Aggregated pull requests"
        );
        Aggregate {
            repo_count: repos.len(),
            pulls,
            failures,
        }
    }
}
