use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FlakeLensError, Result};

/// Source platform a batch or historical store was scraped from.
///
/// Everything that differs between GitHub- and GitLab-shaped data outside of
/// extraction (file names, metric names, label names) hangs off this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitHub,
    GitLab,
}

impl Platform {
    pub fn label(self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::GitLab => "GitLab",
        }
    }

    /// Lower-case prefix used for metric names and default file names.
    pub fn slug(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    /// Short noun for one change ("pr" / "mr").
    pub fn item_noun(self) -> &'static str {
        match self {
            Self::GitHub => "pr",
            Self::GitLab => "mr",
        }
    }

    /// Metric label carrying the group identity.
    pub fn group_label(self) -> &'static str {
        match self {
            Self::GitHub => "repository",
            Self::GitLab => "project",
        }
    }

    /// Metric label carrying the change identity.
    pub fn item_label(self) -> &'static str {
        match self {
            Self::GitHub => "pr_number",
            Self::GitLab => "mr_number",
        }
    }

    /// Reserved group label value for cross-group aggregates.
    pub fn all_groups_value(self) -> &'static str {
        match self {
            Self::GitHub => "all_repositories",
            Self::GitLab => "all_projects",
        }
    }

    pub fn default_increment_file(self) -> String {
        format!("{}_flakiness_current.json", self.slug())
    }

    pub fn default_history_file(self) -> String {
        format!("{}_flakiness_historical.json", self.slug())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw sub-signals a change's retry count was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetrySignals {
    /// Retry commands in discussion comments plus branch-update merge commits.
    CommentsAndBranchUpdates {
        retest_comments: u64,
        update_branch_count: u64,
    },
    /// Repeated CI instances per commit for one automation identity.
    RerunInstances {
        total_instances: u64,
        commits_with_retests: u64,
    },
}

/// One merged pull/merge request with its observed retry signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub group_id: String,
    pub item_id: u64,
    pub title: String,
    /// `YYYY-MM-DDTHH:MM:SSZ`, so string order is chronological order.
    pub merged_at: String,
    pub author: String,
    pub total_commits: u64,
    pub total_retests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub signals: RetrySignals,
}

/// Formats an instant the way `merged_at` and `cutoff_date` are stored.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses any RFC 3339 timestamp and re-renders it in the stored form.
///
/// GitHub reports `2024-05-01T10:00:00Z` while GitLab reports
/// `2024-05-01T10:00:00.123Z` or explicit offsets; mixing them would break
/// lexicographic comparison against the retention cutoff.
pub fn normalize_timestamp(raw: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| format_timestamp(parsed.with_timezone(&Utc)))
        .map_err(|_| FlakeLensError::InvalidTimestamp(raw.to_string()))
}

/// Sums of the raw sub-signals across a record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTotals {
    pub retest_comments: u64,
    pub update_branch_actions: u64,
    pub total_instances: u64,
}

/// Rollup over all change records of one group (or of all groups).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub total_items: u64,
    pub total_commits: u64,
    pub total_retests: u64,
    pub items_with_retests: u64,
    pub retest_rate: f64,
    pub avg_retests_per_item: f64,
    pub avg_retests_per_commit: f64,
    pub signal_totals: SignalTotals,
}

/// Records and summary of one group within a scrape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    pub records: Vec<ChangeRecord>,
    pub summary: GroupSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Output of one scrape run: the increment fed into the historical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub platform: Platform,
    pub analysis_date: DateTime<Utc>,
    pub days_analyzed: u32,
    pub date_range: DateRange,
    pub groups: IndexMap<String, GroupResult>,
    pub overall_summary: GroupSummary,
}

impl BatchResult {
    pub fn total_records(&self) -> usize {
        self.groups.values().map(|group| group.records.len()).sum()
    }
}
