use serde::de::IgnoredAny;
use serde::Deserialize;

/// Pull request as returned by the pulls listing.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub title: String,
    /// `None` for pull requests closed without merging
    pub merged_at: Option<String>,
    pub user: GitHubUser,
    pub base: GitHubBaseRef,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubBaseRef {
    #[serde(rename = "ref")]
    pub ref_: String,
}

/// Commit within a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommit {
    pub sha: String,
    pub commit: GitHubCommitDetail,
    /// Only the parent count matters for merge-commit detection
    #[serde(default)]
    pub parents: Vec<IgnoredAny>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitDetail {
    pub message: String,
}

/// Issue comment on a pull request's conversation tab.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubComment {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuitesResponse {
    #[serde(default)]
    pub check_suites: Vec<GitHubCheckSuite>,
}

/// One check-suite instance; reruns of the same app create new suites.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCheckSuite {
    pub app: Option<GitHubApp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubApp {
    pub slug: String,
}
