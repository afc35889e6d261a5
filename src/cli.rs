use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::analysis::collect_batch;
use crate::auth::Token;
use crate::config::{Config, MetricsConfig};
use crate::history::{HistoricalStore, MergeEngine};
use crate::insights::{BatchResult, Platform};
use crate::metrics::{observations, MetricsSource, PushGateway};
use crate::output::{bright_green, bright_red, cyan, dim, print_summary};
use crate::providers::github::GitHubStrategy;
use crate::providers::transport::{AuthScheme, TransportOptions};
use crate::providers::{FlakinessProvider, GitHubProvider, GitLabProvider};

#[derive(Parser)]
#[command(name = "flakelens")]
#[command(author, version, about = "CI retest flakiness for GitHub and GitLab", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./flakelens.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the increment and historical store files
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Pretty-print the increment file
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape merged pull requests from GitHub
    Github {
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// API base URL (GitHub Enterprise: https://host/api/v3)
        #[arg(short, long)]
        url: Option<String>,

        /// Repository to analyze as owner/repo (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,

        /// Trailing window in days
        #[arg(short = 'D', long)]
        days_back: Option<u32>,

        /// Count reruns of this GitHub App's check suites instead of comments
        #[arg(long)]
        check_suite_app: Option<String>,

        #[command(flatten)]
        stages: StageArgs,
    },

    /// Scrape merged merge requests from GitLab
    Gitlab {
        #[arg(short, long, env = "GITLAB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// GitLab instance base URL
        #[arg(short, long)]
        url: Option<String>,

        /// Project to analyze as group/project (repeatable)
        #[arg(short = 'P', long = "project")]
        projects: Vec<String>,

        /// Trailing window in days
        #[arg(short = 'D', long)]
        days_back: Option<u32>,

        /// Skip TLS certificate verification
        #[arg(long, default_value_t = false)]
        accept_invalid_certs: bool,

        #[command(flatten)]
        stages: StageArgs,
    },

    /// Merge an increment file into the historical store
    Merge {
        #[arg(value_enum)]
        platform: PlatformArg,

        /// Increment file (defaults to <data-dir>/<platform>_flakiness_current.json)
        #[arg(short, long)]
        increment: Option<PathBuf>,

        /// Retention window for a newly created store
        #[arg(short, long)]
        retention_days: Option<u32>,
    },

    /// Push metrics from a stored file to the Pushgateway
    Push {
        #[arg(value_enum)]
        platform: PlatformArg,

        /// Which file to export
        #[arg(short, long, value_enum, default_value_t = PushSource::Historical)]
        source: PushSource,

        /// Pushgateway address, e.g. pushgateway:9091
        #[arg(short = 'g', long)]
        pushgateway_url: Option<String>,

        #[arg(short, long)]
        job: Option<String>,
    },
}

/// Which stages run after a scrape.
#[derive(clap::Args, Debug, Clone, Copy)]
struct StageArgs {
    /// Only write the increment file
    #[arg(long, default_value_t = false)]
    no_merge: bool,

    /// Skip the Pushgateway export
    #[arg(long, default_value_t = false)]
    no_push: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlatformArg {
    Github,
    Gitlab,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Github => Self::GitHub,
            PlatformArg::Gitlab => Self::GitLab,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PushSource {
    Current,
    Historical,
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn load_increment(path: &Path) -> Result<Option<BatchResult>> {
    if !path.exists() {
        warn!("No increment file at {}", path.display());
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read increment file: {}", path.display()))?;
    let batch = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse increment file: {}", path.display()))?;
    Ok(Some(batch))
}

/// Pushes observations, reporting failure without failing the run.
async fn push_metrics<S: MetricsSource + ?Sized>(metrics: &MetricsConfig, source: &S) {
    let Some(url) = metrics.pushgateway_url.as_deref() else {
        info!("No Pushgateway configured, skipping metrics export");
        return;
    };

    let observations = observations(source);
    let result = match PushGateway::new(url, &metrics.job) {
        Ok(gateway) => gateway.push(&observations).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => eprintln!(
            "{} {}",
            bright_green("✓"),
            dim(format!("Pushed {} metrics to {url}", observations.len()))
        ),
        Err(e) => {
            warn!("Metrics export failed: {e}");
            eprintln!("{} {}", bright_red("✗"), dim(format!("Metrics export failed: {e}")));
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.history.directory.clone_from(dir);
        }
        Ok(config)
    }

    fn merge_into_history(
        config: &Config,
        platform: Platform,
        increment: Option<&BatchResult>,
        now: DateTime<Utc>,
    ) -> Result<Option<HistoricalStore>> {
        let path = config.history.history_file(platform);
        let store = HistoricalStore::load(&path, platform)
            .with_context(|| format!("Failed to load historical store: {}", path.display()))?;

        let engine = MergeEngine::new(platform, config.history.retention_days);
        let merged = engine.merge(increment, store, now)?;

        if let Some(store) = &merged {
            if increment.is_some_and(|batch| !batch.groups.is_empty()) {
                store
                    .save(&path)
                    .with_context(|| format!("Failed to save historical store: {}", path.display()))?;
            }
        }
        Ok(merged)
    }

    async fn run_scrape<P: FlakinessProvider>(
        &self,
        config: &Config,
        provider: &P,
        groups: &[String],
        stages: StageArgs,
    ) -> Result<()> {
        let platform = provider.platform();
        if groups.is_empty() {
            bail!(
                "No {} to analyze: pass one on the command line or list them in the config file",
                platform.group_label()
            );
        }

        let now = Utc::now();
        let batch = collect_batch(provider, groups, config.scrape.days_back, now).await;

        let increment_path = config.history.increment_file(platform);
        write_json(&increment_path, &batch, self.pretty)?;
        info!("Increment written to: {}", increment_path.display());
        print_summary(&batch, "Current Scrape");

        if stages.no_merge {
            if !stages.no_push {
                push_metrics(&config.metrics, &batch).await;
            }
            return Ok(());
        }

        let store = Self::merge_into_history(config, platform, Some(&batch), now)?;
        if let Some(store) = &store {
            print_summary(store, "Historical Window");
            if !stages.no_push {
                push_metrics(&config.metrics, store).await;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_github(
        &self,
        mut config: Config,
        token: Option<&str>,
        url: Option<&str>,
        repos: &[String],
        days_back: Option<u32>,
        check_suite_app: Option<&str>,
        stages: StageArgs,
    ) -> Result<()> {
        if let Some(token) = token {
            config.github.token = Some(token.to_string());
        }
        if let Some(url) = url {
            config.github.base_url = url.to_string();
        }
        if !repos.is_empty() {
            config.github.repositories = repos.to_vec();
        }
        if let Some(days_back) = days_back {
            config.scrape.days_back = days_back;
        }
        if let Some(app) = check_suite_app {
            config.github.check_suite_app = Some(app.to_string());
        }

        let strategy = match &config.github.check_suite_app {
            Some(app_slug) => GitHubStrategy::CheckSuiteReruns {
                app_slug: app_slug.clone(),
            },
            None => GitHubStrategy::CommentsAndBranchUpdates {
                retest_command: config.github.retest_command.clone(),
            },
        };
        info!(
            "Collecting GitHub flakiness for {} repositories",
            config.github.repositories.len()
        );
        if config.github.token.is_none() {
            warn!("No GitHub token provided; unauthenticated requests are heavily rate limited");
        }

        let provider = GitHubProvider::new(
            &config.github.base_url,
            TransportOptions {
                token: config.github.token.as_deref().map(Token::from),
                auth: AuthScheme::Bearer,
                rate_limit_header: "X-RateLimit-Remaining",
                retry: config.scrape.retry_policy(),
                accept_invalid_certs: false,
            },
            config.scrape.page_cap,
            strategy,
            config.scrape.rate_limit_pause(),
        )?;

        let repositories = config.github.repositories.clone();
        self.run_scrape(&config, &provider, &repositories, stages).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_gitlab(
        &self,
        mut config: Config,
        token: Option<&str>,
        url: Option<&str>,
        projects: &[String],
        days_back: Option<u32>,
        accept_invalid_certs: bool,
        stages: StageArgs,
    ) -> Result<()> {
        if let Some(token) = token {
            config.gitlab.token = Some(token.to_string());
        }
        if let Some(url) = url {
            config.gitlab.base_url = url.to_string();
        }
        if !projects.is_empty() {
            config.gitlab.projects = projects.to_vec();
        }
        if let Some(days_back) = days_back {
            config.scrape.days_back = days_back;
        }
        config.gitlab.accept_invalid_certs |= accept_invalid_certs;

        info!(
            "Collecting GitLab flakiness for {} projects",
            config.gitlab.projects.len()
        );

        let provider = GitLabProvider::new(
            &config.gitlab.base_url,
            TransportOptions {
                token: config.gitlab.token.as_deref().map(Token::from),
                auth: AuthScheme::PrivateToken,
                rate_limit_header: "RateLimit-Remaining",
                retry: config.scrape.retry_policy(),
                accept_invalid_certs: config.gitlab.accept_invalid_certs,
            },
            config.scrape.page_cap,
            config.gitlab.pipeline_filter(),
            config.scrape.rate_limit_pause(),
        )?;

        let projects = config.gitlab.projects.clone();
        self.run_scrape(&config, &provider, &projects, stages).await
    }

    fn execute_merge(
        &self,
        mut config: Config,
        platform: Platform,
        increment: Option<&Path>,
        retention_days: Option<u32>,
    ) -> Result<()> {
        if let Some(retention_days) = retention_days {
            config.history.retention_days = retention_days;
        }

        let increment_path = increment
            .map_or_else(|| config.history.increment_file(platform), Path::to_path_buf);
        let batch = load_increment(&increment_path)?;

        match Self::merge_into_history(&config, platform, batch.as_ref(), Utc::now())? {
            Some(store) => print_summary(&store, "Historical Window"),
            None => eprintln!(
                "{}",
                dim("Nothing to merge and no historical store yet.")
            ),
        }
        Ok(())
    }

    async fn execute_push(
        &self,
        mut config: Config,
        platform: Platform,
        source: PushSource,
        pushgateway_url: Option<&str>,
        job: Option<&str>,
    ) -> Result<()> {
        if let Some(url) = pushgateway_url {
            config.metrics.pushgateway_url = Some(url.to_string());
        }
        if let Some(job) = job {
            config.metrics.job = job.to_string();
        }
        if config.metrics.pushgateway_url.is_none() {
            bail!("No Pushgateway configured: pass --pushgateway-url or set metrics.pushgateway-url");
        }

        match source {
            PushSource::Current => {
                let path = config.history.increment_file(platform);
                let Some(batch) = load_increment(&path)? else {
                    bail!("No increment file at {}", path.display());
                };
                push_metrics(&config.metrics, &batch).await;
            }
            PushSource::Historical => {
                let path = config.history.history_file(platform);
                let Some(store) = HistoricalStore::load(&path, platform)? else {
                    bail!("No historical store at {}", path.display());
                };
                push_metrics(&config.metrics, &store).await;
            }
        }
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        eprintln!(
            "{} {}",
            dim("Data directory:"),
            cyan(config.history.directory.display())
        );

        match &self.command {
            Commands::Github {
                token,
                url,
                repos,
                days_back,
                check_suite_app,
                stages,
            } => {
                self.execute_github(
                    config,
                    token.as_deref(),
                    url.as_deref(),
                    repos,
                    *days_back,
                    check_suite_app.as_deref(),
                    *stages,
                )
                .await
            }
            Commands::Gitlab {
                token,
                url,
                projects,
                days_back,
                accept_invalid_certs,
                stages,
            } => {
                self.execute_gitlab(
                    config,
                    token.as_deref(),
                    url.as_deref(),
                    projects,
                    *days_back,
                    *accept_invalid_certs,
                    *stages,
                )
                .await
            }
            Commands::Merge {
                platform,
                increment,
                retention_days,
            } => self.execute_merge(
                config,
                (*platform).into(),
                increment.as_deref(),
                *retention_days,
            ),
            Commands::Push {
                platform,
                source,
                pushgateway_url,
                job,
            } => {
                self.execute_push(
                    config,
                    (*platform).into(),
                    *source,
                    pushgateway_url.as_deref(),
                    job.as_deref(),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::create_record;
    use crate::insights::{DateRange, GroupResult};
    use chrono::TimeZone;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_github_with_repeated_repos() {
        let cli = Cli::try_parse_from([
            "flakelens",
            "github",
            "--repo",
            "org/app",
            "-r",
            "org/lib",
            "--check-suite-app",
            "red-hat-konflux",
            "--no-push",
        ])
        .unwrap();

        match cli.command {
            Commands::Github {
                repos,
                check_suite_app,
                stages,
                ..
            } => {
                assert_eq!(repos, ["org/app", "org/lib"]);
                assert_eq!(check_suite_app.as_deref(), Some("red-hat-konflux"));
                assert!(stages.no_push);
                assert!(!stages.no_merge);
            }
            _ => panic!("expected github subcommand"),
        }
    }

    #[test]
    fn test_parse_merge_with_global_flags() {
        let cli = Cli::try_parse_from([
            "flakelens",
            "merge",
            "gitlab",
            "--retention-days",
            "30",
            "--data-dir",
            "/tmp/flakes",
            "--pretty",
        ])
        .unwrap();

        assert!(cli.pretty);
        assert_eq!(cli.data_dir.as_deref(), Some(Path::new("/tmp/flakes")));
        match cli.command {
            Commands::Merge {
                platform,
                retention_days,
                ..
            } => {
                assert_eq!(Platform::from(platform), Platform::GitLab);
                assert_eq!(retention_days, Some(30));
            }
            _ => panic!("expected merge subcommand"),
        }
    }

    #[test]
    fn test_parse_push_defaults_to_historical() {
        let cli = Cli::try_parse_from(["flakelens", "push", "github"]).unwrap();
        match cli.command {
            Commands::Push { source, .. } => assert_eq!(source, PushSource::Historical),
            _ => panic!("expected push subcommand"),
        }
    }

    #[test]
    fn test_merge_into_history_creates_data_dir_and_writes_store() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.history.directory = dir.path().join("data").join("flakes");
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();

        let records = vec![create_record(3, "2024-05-02T00:00:00Z", 1)];
        let summary = crate::aggregate::aggregate(&records);
        let mut groups = IndexMap::new();
        groups.insert(
            "org/repo".to_string(),
            GroupResult {
                records,
                summary: summary.clone(),
            },
        );
        let batch = BatchResult {
            platform: Platform::GitHub,
            analysis_date: now,
            days_analyzed: 1,
            date_range: DateRange { from: now, to: now },
            groups,
            overall_summary: summary,
        };

        let increment_path = config.history.increment_file(Platform::GitHub);
        write_json(&increment_path, &batch, true).unwrap();
        let loaded = load_increment(&increment_path).unwrap();
        assert_eq!(loaded.as_ref(), Some(&batch));

        let store = Cli::merge_into_history(&config, Platform::GitHub, loaded.as_ref(), now)
            .unwrap()
            .unwrap();
        assert_eq!(store.total_records(), 1);

        let history_path = config.history.history_file(Platform::GitHub);
        let reloaded = HistoricalStore::load(&history_path, Platform::GitHub)
            .unwrap()
            .unwrap();
        assert_eq!(reloaded, store);
    }

    #[test]
    fn test_missing_increment_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_increment(&dir.path().join("absent.json")).unwrap().is_none());
    }
}
