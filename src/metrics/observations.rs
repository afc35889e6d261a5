use crate::aggregate::aggregate;
use crate::history::HistoricalStore;
use crate::insights::{BatchResult, ChangeRecord, GroupSummary, Platform};

/// One named, labeled gauge value.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: String,
    pub help: String,
    /// Label pairs in a fixed order; every observation of one name uses the
    /// same keys.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Anything that can be exported: a fresh batch or the historical store.
pub trait MetricsSource {
    fn platform(&self) -> Platform;

    /// Per-group summaries with the records they were computed from.
    fn groups(&self) -> Vec<(&str, GroupSummary, &[ChangeRecord])>;

    fn overall_summary(&self) -> GroupSummary;
}

impl MetricsSource for BatchResult {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn groups(&self) -> Vec<(&str, GroupSummary, &[ChangeRecord])> {
        self.groups
            .iter()
            .map(|(id, group)| (id.as_str(), group.summary.clone(), group.records.as_slice()))
            .collect()
    }

    fn overall_summary(&self) -> GroupSummary {
        self.overall_summary.clone()
    }
}

impl MetricsSource for HistoricalStore {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn groups(&self) -> Vec<(&str, GroupSummary, &[ChangeRecord])> {
        self.groups
            .iter()
            .map(|(id, records)| (id.as_str(), aggregate(records), records.as_slice()))
            .collect()
    }

    fn overall_summary(&self) -> GroupSummary {
        self.summary.clone()
    }
}

/// Turns a source into the full observation set.
///
/// Per group, one observation per summary field; the same fields again
/// under the platform's all-groups label value; and one retest count per
/// change labeled with group, change number and author.
#[allow(clippy::cast_precision_loss)]
pub fn observations<S: MetricsSource + ?Sized>(source: &S) -> Vec<Observation> {
    let platform = source.platform();
    let mut observations = Vec::new();

    let groups = source.groups();
    for (group, summary, _) in &groups {
        observations.extend(summary_observations(platform, group, summary));
    }
    observations.extend(summary_observations(
        platform,
        platform.all_groups_value(),
        &source.overall_summary(),
    ));

    let name = format!("{}_{}_retests", platform.slug(), platform.item_noun());
    let help = format!(
        "Retests observed on a merged {} {}",
        platform.label(),
        platform.item_noun().to_uppercase()
    );
    for (group, _, records) in &groups {
        for record in *records {
            observations.push(Observation {
                name: name.clone(),
                help: help.clone(),
                labels: vec![
                    (platform.group_label().to_string(), (*group).to_string()),
                    (platform.item_label().to_string(), record.item_id.to_string()),
                    ("author".to_string(), record.author.clone()),
                ],
                value: record.total_retests as f64,
            });
        }
    }

    observations
}

#[allow(clippy::cast_precision_loss)]
fn summary_observations(
    platform: Platform,
    group: &str,
    summary: &GroupSummary,
) -> Vec<Observation> {
    let prefix = format!("{}_flakiness", platform.slug());
    let noun = platform.item_noun();
    let labels = vec![(platform.group_label().to_string(), group.to_string())];

    let fields = [
        (
            format!("{noun}s_analyzed_total"),
            format!("Merged {noun}s analyzed"),
            summary.total_items as f64,
        ),
        (
            "commits_total".to_string(),
            "Commits across analyzed changes".to_string(),
            summary.total_commits as f64,
        ),
        (
            "retests_total".to_string(),
            "Retests across analyzed changes".to_string(),
            summary.total_retests as f64,
        ),
        (
            format!("{noun}s_with_retests"),
            format!("Merged {noun}s that needed at least one retest"),
            summary.items_with_retests as f64,
        ),
        (
            "retest_rate_percent".to_string(),
            format!("Percentage of merged {noun}s with retests"),
            summary.retest_rate,
        ),
        (
            format!("avg_retests_per_{noun}"),
            format!("Average retests per merged {noun}"),
            summary.avg_retests_per_item,
        ),
        (
            "avg_retests_per_commit".to_string(),
            "Average retests per commit".to_string(),
            summary.avg_retests_per_commit,
        ),
    ];

    fields
        .into_iter()
        .map(|(field, help, value)| Observation {
            name: format!("{prefix}_{field}"),
            help,
            labels: labels.clone(),
            value,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::aggregate::tests::create_record;
    use crate::history::MergeEngine;
    use crate::insights::{DateRange, GroupResult};
    use chrono::{TimeZone, Utc};
    use indexmap::IndexMap;

    fn batch(platform: Platform) -> BatchResult {
        let records = vec![
            create_record(12, "2024-05-02T00:00:00Z", 3),
            create_record(11, "2024-05-01T00:00:00Z", 0),
        ];
        let summary = aggregate(&records);
        let mut groups = IndexMap::new();
        groups.insert(
            "org/repo".to_string(),
            GroupResult {
                records,
                summary: summary.clone(),
            },
        );
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();

        BatchResult {
            platform,
            analysis_date: now,
            days_analyzed: 1,
            date_range: DateRange { from: now, to: now },
            groups,
            overall_summary: summary,
        }
    }

    fn find<'a>(observations: &'a [Observation], name: &str, label_value: &str) -> &'a Observation {
        observations
            .iter()
            .find(|o| o.name == name && o.labels[0].1 == label_value)
            .unwrap_or_else(|| panic!("missing {name}{{{label_value}}}"))
    }

    #[test]
    fn test_github_observation_names_and_labels() {
        let observations = observations(&batch(Platform::GitHub));

        // 7 fields per group, 7 for the aggregate, 2 changes
        assert_eq!(observations.len(), 16);

        let analyzed = find(&observations, "github_flakiness_prs_analyzed_total", "org/repo");
        assert_eq!(analyzed.labels[0].0, "repository");
        assert_eq!(analyzed.value, 2.0);

        let rate = find(&observations, "github_flakiness_retest_rate_percent", "all_repositories");
        assert_eq!(rate.value, 50.0);

        let change = find(&observations, "github_pr_retests", "org/repo");
        assert_eq!(
            change.labels,
            vec![
                ("repository".to_string(), "org/repo".to_string()),
                ("pr_number".to_string(), "12".to_string()),
                ("author".to_string(), "dev".to_string()),
            ]
        );
        assert_eq!(change.value, 3.0);
    }

    #[test]
    fn test_gitlab_observation_names() {
        let observations = observations(&batch(Platform::GitLab));

        let per_mr = find(&observations, "gitlab_flakiness_avg_retests_per_mr", "all_projects");
        assert_eq!(per_mr.value, 1.5);
        assert!(observations
            .iter()
            .any(|o| o.name == "gitlab_mr_retests" && o.labels[1].0 == "mr_number"));
    }

    #[test]
    fn test_store_observations_match_batch() {
        let increment = batch(Platform::GitHub);
        let store = MergeEngine::new(Platform::GitHub, 90)
            .merge(Some(&increment), None, increment.analysis_date)
            .unwrap()
            .unwrap();

        assert_eq!(observations(&store), observations(&increment));
    }
}
