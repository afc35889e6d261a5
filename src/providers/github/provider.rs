use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::{FlakeLensError, Result};
use crate::insights::{normalize_timestamp, ChangeRecord, Platform, RetrySignals};
use crate::providers::signals::{
    count_retest_comments, is_branch_update_commit, tally_rerun_instances,
};
use crate::providers::transport::{RateLimitPause, TransportOptions};
use crate::providers::FlakinessProvider;

use super::client::GitHubClient;
use super::types::{GitHubCommit, GitHubPullRequest};

/// How retries are detected on GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubStrategy {
    /// Count retry-command comments plus "Update branch" merge commits.
    CommentsAndBranchUpdates { retest_command: String },
    /// Count repeated check suites of one GitHub App per commit.
    CheckSuiteReruns { app_slug: String },
}

/// Provider for measuring retest flakiness of GitHub pull requests.
pub struct GitHubProvider {
    client: GitHubClient,
    strategy: GitHubStrategy,
    pause: RateLimitPause,
}

impl GitHubProvider {
    /// Creates a GitHub provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(
        base_url: &str,
        options: TransportOptions,
        page_cap: usize,
        strategy: GitHubStrategy,
        pause: RateLimitPause,
    ) -> Result<Self> {
        Ok(Self {
            client: GitHubClient::new(base_url, options, page_cap)?,
            strategy,
            pause,
        })
    }

    /// Validates an `owner/repo` path.
    pub fn parse_repo_path(repo: &str) -> Result<(&str, &str)> {
        match repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((owner, name))
            }
            _ => Err(FlakeLensError::Config(format!(
                "Repository '{repo}' must be in format 'owner/repo'"
            ))),
        }
    }

    async fn analyze_pull(&self, repo: &str, pull: &GitHubPullRequest) -> Option<ChangeRecord> {
        let commits = match self.client.fetch_pull_commits(repo, pull.number).await {
            Ok(commits) => commits,
            Err(e) => {
                warn!("Skipping {repo}#{}: failed to fetch commits: {e}", pull.number);
                return None;
            }
        };

        let merged_at = pull.merged_at.as_deref().unwrap_or_default();
        let merged_at = match normalize_timestamp(merged_at) {
            Ok(merged_at) => merged_at,
            Err(e) => {
                warn!("Skipping {repo}#{}: {e}", pull.number);
                return None;
            }
        };

        let (total_retests, signals) = match &self.strategy {
            GitHubStrategy::CommentsAndBranchUpdates { retest_command } => {
                let retest_comments = self.count_comments(repo, pull.number, retest_command).await;
                let update_branch_count = count_update_branch_commits(&commits, &pull.base.ref_);
                (
                    retest_comments + update_branch_count,
                    RetrySignals::CommentsAndBranchUpdates {
                        retest_comments,
                        update_branch_count,
                    },
                )
            }
            GitHubStrategy::CheckSuiteReruns { app_slug } => {
                let mut per_commit = Vec::with_capacity(commits.len());
                for commit in &commits {
                    per_commit.push(self.count_check_suites(repo, &commit.sha, app_slug).await);
                }
                let (total_instances, total_retests, commits_with_retests) =
                    tally_rerun_instances(per_commit);
                (
                    total_retests,
                    RetrySignals::RerunInstances {
                        total_instances,
                        commits_with_retests,
                    },
                )
            }
        };

        Some(ChangeRecord {
            group_id: repo.to_string(),
            item_id: pull.number,
            title: pull.title.clone(),
            merged_at,
            author: pull.user.login.clone(),
            total_commits: commits.len() as u64,
            total_retests,
            url: pull.html_url.clone(),
            signals,
        })
    }

    async fn count_comments(&self, repo: &str, number: u64, command: &str) -> u64 {
        let comments = self.client.fetch_pull_comments(repo, number).await;
        count_retest_comments(
            comments.iter().filter_map(|comment| comment.body.as_deref()),
            command,
        )
    }

    async fn count_check_suites(&self, repo: &str, sha: &str, app_slug: &str) -> u64 {
        match self.client.fetch_check_suites(repo, sha).await {
            Ok(suites) => suites
                .iter()
                .filter(|suite| suite.app.as_ref().is_some_and(|app| app.slug == app_slug))
                .count() as u64,
            Err(e) => {
                let short_sha = sha.get(..8).unwrap_or(sha);
                warn!("Failed to fetch check suites for {repo}@{short_sha}, counting none: {e}");
                0
            }
        }
    }
}

fn count_update_branch_commits(commits: &[GitHubCommit], base_ref: &str) -> u64 {
    commits
        .iter()
        .filter(|commit| {
            is_branch_update_commit(commit.parents.len(), &commit.commit.message, base_ref)
        })
        .count() as u64
}

impl FlakinessProvider for GitHubProvider {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn analyze_group(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
        Self::parse_repo_path(repo)?;

        let pulls = self.client.fetch_merged_pulls(repo, since).await?;
        info!("Analyzing {} merged pull requests in {repo}", pulls.len());

        let mut records = Vec::with_capacity(pulls.len());
        for pull in &pulls {
            if let Some(record) = self.analyze_pull(repo, pull).await {
                records.push(record);
            }
            self.client.rest().pause_if_near_limit(&self.pause).await;
        }

        Ok(records)
    }
}
