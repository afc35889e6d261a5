use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::Result;
use crate::insights::{normalize_timestamp, ChangeRecord, Platform, RetrySignals};
use crate::providers::signals::tally_rerun_instances;
use crate::providers::transport::{RateLimitPause, TransportOptions};
use crate::providers::FlakinessProvider;

use super::client::GitLabClient;
use super::types::{GitLabMergeRequest, GitLabPipeline};

/// Identifies the pipelines created by merge-request automation.
///
/// A pipeline is attributable when its trigger source is one of `sources`
/// or its ref contains one of `ref_patterns` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFilter {
    pub sources: Vec<String>,
    pub ref_patterns: Vec<String>,
}

impl Default for PipelineFilter {
    fn default() -> Self {
        Self {
            sources: vec![
                "merge_request_event".to_string(),
                "external_pull_request_event".to_string(),
            ],
            ref_patterns: vec!["pull-request".to_string(), "merge-request".to_string()],
        }
    }
}

impl PipelineFilter {
    pub fn is_attributable(&self, pipeline: &GitLabPipeline) -> bool {
        let source_matches = pipeline
            .source
            .as_deref()
            .is_some_and(|source| self.sources.iter().any(|s| s == source));

        let ref_ = pipeline.ref_.as_deref().unwrap_or_default().to_lowercase();
        let ref_matches = self
            .ref_patterns
            .iter()
            .any(|pattern| ref_.contains(&pattern.to_lowercase()));

        source_matches || ref_matches
    }
}

/// Provider for measuring retest flakiness of GitLab merge requests.
///
/// GitLab exposes every pipeline run per commit, so retries are counted as
/// repeated attributable pipelines for the same SHA.
pub struct GitLabProvider {
    client: GitLabClient,
    filter: PipelineFilter,
    pause: RateLimitPause,
}

impl GitLabProvider {
    /// Creates a GitLab provider.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `options` - Token, retry policy and TLS settings for the transport
    /// * `page_cap` - Maximum pages of merged merge requests to walk
    /// * `filter` - Which pipelines count as merge-request automation
    /// * `pause` - Cooperative pause applied when the quota runs low
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL cannot be constructed.
    pub fn new(
        base_url: &str,
        options: TransportOptions,
        page_cap: usize,
        filter: PipelineFilter,
        pause: RateLimitPause,
    ) -> Result<Self> {
        Ok(Self {
            client: GitLabClient::new(base_url, options, page_cap)?,
            filter,
            pause,
        })
    }

    async fn analyze_merge_request(
        &self,
        project: &str,
        merge_request: &GitLabMergeRequest,
    ) -> Option<ChangeRecord> {
        let iid = merge_request.iid;

        let commits = match self.client.fetch_merge_request_commits(project, iid).await {
            Ok(commits) => commits,
            Err(e) => {
                warn!("Skipping {project}!{iid}: failed to fetch commits: {e}");
                return None;
            }
        };

        if commits.is_empty() {
            warn!("Skipping {project}!{iid}: no commits");
            return None;
        }

        let merged_at = merge_request.merged_at.as_deref().unwrap_or_default();
        let merged_at = match normalize_timestamp(merged_at) {
            Ok(merged_at) => merged_at,
            Err(e) => {
                warn!("Skipping {project}!{iid}: {e}");
                return None;
            }
        };

        let mut per_commit = Vec::with_capacity(commits.len());
        for commit in &commits {
            per_commit.push(self.count_pipelines(project, &commit.id).await);
        }
        let (total_instances, total_retests, commits_with_retests) =
            tally_rerun_instances(per_commit);

        Some(ChangeRecord {
            group_id: project.to_string(),
            item_id: iid,
            title: merge_request.title.clone(),
            merged_at,
            author: merge_request.author.username.clone(),
            total_commits: commits.len() as u64,
            total_retests,
            url: merge_request.web_url.clone(),
            signals: RetrySignals::RerunInstances {
                total_instances,
                commits_with_retests,
            },
        })
    }

    async fn count_pipelines(&self, project: &str, sha: &str) -> u64 {
        match self.client.fetch_commit_pipelines(project, sha).await {
            Ok(pipelines) => pipelines
                .iter()
                .filter(|pipeline| self.filter.is_attributable(pipeline))
                .count() as u64,
            Err(e) => {
                let short_sha = sha.get(..8).unwrap_or(sha);
                warn!("Failed to fetch pipelines for {project}@{short_sha}, counting none: {e}");
                0
            }
        }
    }
}

impl FlakinessProvider for GitLabProvider {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    async fn analyze_group(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>> {
        let merge_requests = self
            .client
            .fetch_merged_merge_requests(project, since)
            .await?;
        info!(
            "Analyzing {} merged merge requests in {project}",
            merge_requests.len()
        );

        let mut records = Vec::with_capacity(merge_requests.len());
        for merge_request in &merge_requests {
            if let Some(record) = self.analyze_merge_request(project, merge_request).await {
                records.push(record);
            }
            self.client.rest().pause_if_near_limit(&self.pause).await;
        }

        Ok(records)
    }
}
