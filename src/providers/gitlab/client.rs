use chrono::{DateTime, Utc};
use log::debug;
use url::Url;

use crate::error::Result;
use crate::providers::transport::{api_base, endpoint, RestClient, TransportOptions};

use super::types::{GitLabCommit, GitLabMergeRequest, GitLabPipeline};

const PER_PAGE: usize = 100;

/// GitLab REST (v4) client for merge request and pipeline history.
pub struct GitLabClient {
    rest: RestClient,
    api_url: Url,
    page_cap: usize,
}

impl GitLabClient {
    pub fn new(base_url: &str, options: TransportOptions, page_cap: usize) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(options)?,
            api_url: api_base(base_url, "api/v4")?,
            page_cap,
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Construct a URL under the project's API prefix
    fn project_url(&self, project: &str, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = endpoint(
            &self.api_url,
            &format!("projects/{}/{path}", urlencoding::encode(project)),
        )?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    /// Lists merge requests merged since `since`, most recently updated first.
    pub async fn fetch_merged_merge_requests(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GitLabMergeRequest>> {
        let mut merged = Vec::new();
        let per_page = PER_PAGE.to_string();

        for page in 1..=self.page_cap {
            let page = page.to_string();
            let url = self.project_url(
                project,
                "merge_requests",
                &[
                    ("state", "merged"),
                    ("order_by", "updated_at"),
                    ("sort", "desc"),
                    ("per_page", per_page.as_str()),
                    ("page", page.as_str()),
                ],
            )?;

            let merge_requests: Vec<GitLabMergeRequest> = self.rest.get_json(&url).await?;
            if merge_requests.is_empty() {
                break;
            }

            for merge_request in merge_requests {
                let Some(merged_at) = merge_request.merged_at.as_deref() else {
                    continue;
                };

                let merged_at = DateTime::parse_from_rfc3339(merged_at)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .ok();
                if merged_at.is_some_and(|merged_at| merged_at < since) {
                    return Ok(merged);
                }

                merged.push(merge_request);
            }
        }

        debug!("Found {} merged merge requests in {project}", merged.len());
        Ok(merged)
    }

    /// Lists the commits of a merge request.
    pub async fn fetch_merge_request_commits(
        &self,
        project: &str,
        iid: u64,
    ) -> Result<Vec<GitLabCommit>> {
        let path = format!("merge_requests/{iid}/commits");
        let per_page = PER_PAGE.to_string();
        let mut commits = Vec::new();
        let mut page = 1;

        loop {
            let page_str = page.to_string();
            let url = self.project_url(
                project,
                &path,
                &[("per_page", per_page.as_str()), ("page", page_str.as_str())],
            )?;
            let batch: Vec<GitLabCommit> = self.rest.get_json(&url).await?;
            let fetched = batch.len();
            commits.extend(batch);

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(commits)
    }

    /// Lists every pipeline that ran for a commit SHA.
    pub async fn fetch_commit_pipelines(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<GitLabPipeline>> {
        let per_page = PER_PAGE.to_string();
        let url = self.project_url(project, "pipelines", &[("sha", sha), ("per_page", per_page.as_str())])?;
        self.rest.get_json(&url).await
    }
}
