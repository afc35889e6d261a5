use chrono::{DateTime, Utc};
use log::{debug, warn};
use url::Url;

use crate::error::Result;
use crate::providers::transport::{api_base, endpoint, RestClient, TransportOptions};

use super::types::{
    CheckSuitesResponse, GitHubCheckSuite, GitHubComment, GitHubCommit, GitHubPullRequest,
};

const PER_PAGE: usize = 100;

/// GitHub REST API client for the endpoints flakiness analysis needs.
pub struct GitHubClient {
    rest: RestClient,
    api_url: Url,
    page_cap: usize,
}

impl GitHubClient {
    /// Creates a client for the given API base URL (e.g. `https://api.github.com`).
    ///
    /// `page_cap` bounds how many pages of the merged-PR listing are walked.
    pub fn new(base_url: &str, options: TransportOptions, page_cap: usize) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(options)?,
            api_url: api_base(base_url, "")?,
            page_cap,
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    fn paged_url(&self, path: &str, extra: &[(&str, &str)], page: usize) -> Result<Url> {
        let mut url = endpoint(&self.api_url, path)?;
        url.query_pairs_mut()
            .extend_pairs(extra)
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Lists pull requests merged since `since`, most recently updated first.
    ///
    /// Walks closed PRs sorted by update time and stops at the first merged PR
    /// older than `since`, an empty page, or the page cap.
    pub async fn fetch_merged_pulls(
        &self,
        repo: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GitHubPullRequest>> {
        let mut merged = Vec::new();
        let path = format!("repos/{repo}/pulls");

        for page in 1..=self.page_cap {
            let url = self.paged_url(
                &path,
                &[("state", "closed"), ("sort", "updated"), ("direction", "desc")],
                page,
            )?;

            let pulls: Vec<GitHubPullRequest> = self.rest.get_json(&url).await?;
            if pulls.is_empty() {
                break;
            }

            for pull in pulls {
                let Some(merged_at) = pull.merged_at.as_deref() else {
                    continue;
                };

                let merged_at = DateTime::parse_from_rfc3339(merged_at)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .ok();
                if merged_at.is_some_and(|merged_at| merged_at < since) {
                    return Ok(merged);
                }

                merged.push(pull);
            }
        }

        debug!("Found {} merged pull requests in {repo}", merged.len());
        Ok(merged)
    }

    /// Lists the commits of a pull request.
    pub async fn fetch_pull_commits(&self, repo: &str, number: u64) -> Result<Vec<GitHubCommit>> {
        let path = format!("repos/{repo}/pulls/{number}/commits");
        self.fetch_all_pages(&path).await
    }

    /// Lists the conversation comments of a pull request.
    ///
    /// A failing page ends the walk; comments from earlier pages are kept.
    pub async fn fetch_pull_comments(&self, repo: &str, number: u64) -> Vec<GitHubComment> {
        let path = format!("repos/{repo}/issues/{number}/comments");
        let mut comments = Vec::new();
        let mut page = 1;

        loop {
            let batch: Vec<GitHubComment> = match self.fetch_page(&path, page).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        "Failed to fetch comment page {page} for {repo}#{number}, \
                         keeping {} comments: {e}",
                        comments.len()
                    );
                    break;
                }
            };
            let fetched = batch.len();
            comments.extend(batch);

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        comments
    }

    /// Lists the check suites attached to a commit.
    pub async fn fetch_check_suites(&self, repo: &str, sha: &str) -> Result<Vec<GitHubCheckSuite>> {
        let path = format!("repos/{repo}/commits/{sha}/check-suites");
        let url = self.paged_url(&path, &[], 1)?;
        let response: CheckSuitesResponse = self.rest.get_json(&url).await?;
        Ok(response.check_suites)
    }

    async fn fetch_all_pages<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let batch: Vec<T> = self.fetch_page(path, page).await?;
            let fetched = batch.len();
            items.extend(batch);

            // A short page is the last page
            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn fetch_page<T>(&self, path: &str, page: usize) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.paged_url(path, &[], page)?;
        self.rest.get_json(&url).await
    }
}
