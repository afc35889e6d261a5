use crate::insights::{ChangeRecord, GroupSummary, RetrySignals, SignalTotals};

#[allow(clippy::cast_precision_loss)]
fn calculate_rate(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn calculate_average(sum: u64, count: u64) -> f64 {
    if count > 0 {
        sum as f64 / count as f64
    } else {
        0.0
    }
}

/// Folds a record set into its summary.
///
/// Pure and order-independent. An empty set and a set without commits both
/// yield zero rates instead of dividing by zero.
pub fn aggregate<'a, I>(records: I) -> GroupSummary
where
    I: IntoIterator<Item = &'a ChangeRecord>,
{
    let mut total_items = 0;
    let mut total_commits = 0;
    let mut total_retests = 0;
    let mut items_with_retests = 0;
    let mut signal_totals = SignalTotals::default();

    for record in records {
        total_items += 1;
        total_commits += record.total_commits;
        total_retests += record.total_retests;
        if record.total_retests > 0 {
            items_with_retests += 1;
        }

        match record.signals {
            RetrySignals::CommentsAndBranchUpdates {
                retest_comments,
                update_branch_count,
            } => {
                signal_totals.retest_comments += retest_comments;
                signal_totals.update_branch_actions += update_branch_count;
            }
            RetrySignals::RerunInstances {
                total_instances, ..
            } => {
                signal_totals.total_instances += total_instances;
            }
        }
    }

    GroupSummary {
        total_items,
        total_commits,
        total_retests,
        items_with_retests,
        retest_rate: calculate_rate(items_with_retests, total_items),
        avg_retests_per_item: calculate_average(total_retests, total_items),
        avg_retests_per_commit: calculate_average(total_retests, total_commits),
        signal_totals,
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_record(item_id: u64, merged_at: &str, retests: u64) -> ChangeRecord {
        ChangeRecord {
            group_id: "org/repo".to_string(),
            item_id,
            title: format!("Change {item_id}"),
            merged_at: merged_at.to_string(),
            author: "dev".to_string(),
            total_commits: 2,
            total_retests: retests,
            url: None,
            signals: RetrySignals::CommentsAndBranchUpdates {
                retest_comments: retests,
                update_branch_count: 0,
            },
        }
    }

    mod calculate_rate {
        use super::*;

        #[test]
        fn returns_zero_when_total_is_zero() {
            assert_eq!(calculate_rate(5, 0), 0.0);
        }

        #[test]
        fn calculates_percentage_correctly() {
            assert_eq!(calculate_rate(25, 100), 25.0);
        }

        #[test]
        fn handles_fractional_percentages() {
            let result = calculate_rate(1, 3);
            assert!(
                (result - 33.333_333).abs() < 0.001,
                "Should handle fractional percentages, got {result}",
            );
        }
    }

    mod aggregate {
        use super::*;

        #[test]
        fn empty_set_yields_all_zero_summary() {
            let summary = aggregate(&Vec::<ChangeRecord>::new());
            assert_eq!(summary, GroupSummary::default());
            assert_eq!(summary.retest_rate, 0.0);
            assert!(!summary.avg_retests_per_commit.is_nan());
        }

        #[test]
        fn counts_items_with_retests() {
            let records = vec![
                create_record(1, "2024-05-03T00:00:00Z", 0),
                create_record(2, "2024-05-02T00:00:00Z", 3),
                create_record(3, "2024-05-01T00:00:00Z", 1),
                create_record(4, "2024-04-30T00:00:00Z", 0),
            ];

            let summary = aggregate(&records);

            assert_eq!(summary.total_items, 4);
            assert_eq!(summary.total_commits, 8);
            assert_eq!(summary.total_retests, 4);
            assert_eq!(summary.items_with_retests, 2);
            assert_eq!(summary.retest_rate, 50.0);
            assert_eq!(summary.avg_retests_per_item, 1.0);
            assert_eq!(summary.avg_retests_per_commit, 0.5);
            assert_eq!(summary.signal_totals.retest_comments, 4);
        }

        #[test]
        fn zero_commits_do_not_divide_by_zero() {
            let mut record = create_record(1, "2024-05-01T00:00:00Z", 2);
            record.total_commits = 0;

            let summary = aggregate(&[record]);

            assert_eq!(summary.avg_retests_per_commit, 0.0);
            assert_eq!(summary.avg_retests_per_item, 2.0);
        }

        #[test]
        fn rate_stays_within_bounds() {
            let records: Vec<_> = (1..=7)
                .map(|id| create_record(id, "2024-05-01T00:00:00Z", id % 3))
                .collect();

            let summary = aggregate(&records);

            assert!(summary.items_with_retests <= summary.total_items);
            assert!((0.0..=100.0).contains(&summary.retest_rate));
        }

        #[test]
        fn sums_rerun_instances() {
            let mut record = create_record(9, "2024-05-01T00:00:00Z", 2);
            record.signals = RetrySignals::RerunInstances {
                total_instances: 5,
                commits_with_retests: 1,
            };

            let summary = aggregate(&[record]);

            assert_eq!(summary.signal_totals.total_instances, 5);
            assert_eq!(summary.signal_totals.retest_comments, 0);
        }
    }
}
