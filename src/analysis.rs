use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use log::{error, info};

use crate::aggregate::aggregate;
use crate::insights::{BatchResult, DateRange, GroupResult};
use crate::output::GroupProgress;
use crate::providers::FlakinessProvider;

/// Scrapes every group over the trailing `days_back` window and rolls the
/// records up into one batch.
///
/// Groups are processed strictly one after another. A group whose change
/// listing fails is logged and left out of the batch; the remaining groups
/// still run.
pub async fn collect_batch<P: FlakinessProvider>(
    provider: &P,
    groups: &[String],
    days_back: u32,
    now: DateTime<Utc>,
) -> BatchResult {
    let since = now - Duration::days(i64::from(days_back));
    let platform = provider.platform();

    info!(
        "Collecting {platform} flakiness for {} group(s) since {since}",
        groups.len()
    );
    GroupProgress::heading(groups.len());

    let mut results = IndexMap::new();
    for (index, group) in groups.iter().enumerate() {
        let progress = GroupProgress::start(index + 1, groups.len(), group);

        match provider.analyze_group(group, since).await {
            Ok(records) => {
                progress.finish(records.len());
                let summary = aggregate(&records);
                results.insert(group.clone(), GroupResult { records, summary });
            }
            Err(e) => {
                progress.fail();
                error!("Failed to analyze {group}: {e}");
            }
        }
    }

    let overall_summary = aggregate(results.values().flat_map(|group| &group.records));

    BatchResult {
        platform,
        analysis_date: now,
        days_analyzed: days_back,
        date_range: DateRange {
            from: since,
            to: now,
        },
        groups: results,
        overall_summary,
    }
}
