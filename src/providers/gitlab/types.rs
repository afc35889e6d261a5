use serde::Deserialize;

/// A merged GitLab merge request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    /// Project-scoped internal id (the `!123` number)
    pub iid: u64,
    pub title: String,
    pub merged_at: Option<String>,
    pub author: GitLabUser,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub username: String,
}

/// A commit belonging to a merge request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCommit {
    /// Full commit SHA
    pub id: String,
}

/// A pipeline run for a commit.
///
/// Each rerun of the merge-request automation creates a new pipeline for the
/// same SHA, which is what the rerun-instance strategy counts.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabPipeline {
    #[serde(rename = "ref", default)]
    pub ref_: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}
