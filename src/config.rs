use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::insights::Platform;
use crate::providers::gitlab::PipelineFilter;
use crate::providers::transport::{RateLimitPause, RetryPolicy};

/// Configuration file structure for flakelens.
///
/// Holds the groups to scrape and the knobs of every stage so scheduled runs
/// need no flags. Configuration files are loaded from the current directory or
/// a specified path; command-line flags override individual values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Extraction window and transport behaviour
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Historical store location and retention
    #[serde(default)]
    pub history: HistoryConfig,

    /// Pushgateway export
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// GitHub personal access token
    pub token: Option<String>,

    /// GitHub API base URL
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// Repositories to analyze (e.g., 'owner/repo')
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Comment that asks CI to run again
    #[serde(default = "default_retest_command")]
    pub retest_command: String,

    /// Count reruns of this app's check suites instead of comments and
    /// branch updates
    pub check_suite_app: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab personal access token
    pub token: Option<String>,

    /// GitLab instance base URL
    #[serde(default = "default_gitlab_base_url")]
    pub base_url: String,

    /// Projects to analyze (e.g., 'group/project')
    #[serde(default)]
    pub projects: Vec<String>,

    /// Pipeline sources attributed to merge-request automation
    #[serde(default = "default_pipeline_sources")]
    pub pipeline_sources: Vec<String>,

    /// Ref fragments attributed to merge-request automation
    #[serde(default = "default_pipeline_ref_patterns")]
    pub pipeline_ref_patterns: Vec<String>,

    /// Skip TLS verification for self-hosted instances
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScrapeConfig {
    /// Trailing window of merged changes to scrape
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    /// Maximum pages of 100 merged changes per group
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,

    /// Remaining-quota level that triggers a pause
    #[serde(default = "default_rate_limit_threshold")]
    pub rate_limit_threshold: u64,

    #[serde(default = "default_rate_limit_pause_secs")]
    pub rate_limit_pause_secs: u64,

    /// Attempts per request when rate limited (first try included)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryConfig {
    /// Records merged longer ago than this are dropped from the store
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Directory holding the increment and historical store files
    #[serde(default = "default_history_directory")]
    pub directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Pushgateway address; export is skipped when unset
    pub pushgateway_url: Option<String>,

    #[serde(default = "default_job")]
    pub job: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_github_base_url(),
            repositories: Vec::new(),
            retest_command: default_retest_command(),
            check_suite_app: None,
        }
    }
}

impl GitLabConfig {
    pub fn pipeline_filter(&self) -> PipelineFilter {
        PipelineFilter {
            sources: self.pipeline_sources.clone(),
            ref_patterns: self.pipeline_ref_patterns.clone(),
        }
    }
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_gitlab_base_url(),
            projects: Vec::new(),
            pipeline_sources: default_pipeline_sources(),
            pipeline_ref_patterns: default_pipeline_ref_patterns(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            page_cap: default_page_cap(),
            rate_limit_threshold: default_rate_limit_threshold(),
            rate_limit_pause_secs: default_rate_limit_pause_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            directory: default_history_directory(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            job: default_job(),
        }
    }
}

fn default_github_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_retest_command() -> String {
    crate::providers::signals::DEFAULT_RETEST_COMMAND.to_string()
}

fn default_pipeline_sources() -> Vec<String> {
    PipelineFilter::default().sources
}

fn default_pipeline_ref_patterns() -> Vec<String> {
    PipelineFilter::default().ref_patterns
}

fn default_days_back() -> u32 {
    1
}

fn default_page_cap() -> usize {
    10
}

fn default_rate_limit_threshold() -> u64 {
    10
}

fn default_rate_limit_pause_secs() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_retention_days() -> u32 {
    90
}

fn default_history_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_job() -> String {
    "flakiness".to_string()
}

impl ScrapeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_delay_secs),
        )
    }

    pub fn rate_limit_pause(&self) -> RateLimitPause {
        RateLimitPause {
            threshold: self.rate_limit_threshold,
            pause: Duration::from_secs(self.rate_limit_pause_secs),
        }
    }
}

impl HistoryConfig {
    /// Where a scrape writes its batch.
    pub fn increment_file(&self, platform: Platform) -> PathBuf {
        self.directory.join(platform.default_increment_file())
    }

    /// Where the rolling store for a platform lives.
    pub fn history_file(&self, platform: Platform) -> PathBuf {
        self.directory.join(platform.default_history_file())
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./flakelens.toml
    /// 3. ./flakelens.json
    /// 4. ./flakelens.yaml
    /// 5. ./flakelens.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "flakelens.toml",
            "flakelens.json",
            "flakelens.yaml",
            "flakelens.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}
