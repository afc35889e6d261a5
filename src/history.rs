use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate;
use crate::error::{FlakeLensError, Result};
use crate::insights::{format_timestamp, BatchResult, ChangeRecord, GroupSummary, Platform};

/// Persisted rolling window of change records for one platform.
///
/// Only [`MergeEngine::merge`] mutates a store. Each group's records stay
/// sorted newest first and never contain two records with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStore {
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Same form as `merged_at`; records older than this were dropped.
    #[serde(default)]
    pub cutoff_date: Option<String>,
    pub retention_days: u32,
    #[serde(default)]
    pub groups: IndexMap<String, Vec<ChangeRecord>>,
    #[serde(default)]
    pub summary: GroupSummary,
}

impl HistoricalStore {
    pub fn new(platform: Platform, retention_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            platform,
            created_at: now,
            last_updated: None,
            cutoff_date: None,
            retention_days,
            groups: IndexMap::new(),
            summary: GroupSummary::default(),
        }
    }

    /// Loads a store from disk.
    ///
    /// A missing file yields `Ok(None)` so the first merge starts fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, is not a store, or belongs
    /// to a different platform.
    pub fn load(path: &Path, platform: Platform) -> Result<Option<Self>> {
        if !path.exists() {
            info!(
                "No historical store at {}, starting fresh",
                path.display()
            );
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)?;

        if store.platform != platform {
            return Err(FlakeLensError::PlatformMismatch {
                expected: platform.to_string(),
                found: store.platform.to_string(),
            });
        }

        debug!(
            "Loaded {} record(s) across {} group(s) from {}",
            store.total_records(),
            store.groups.len(),
            path.display()
        );
        Ok(Some(store))
    }

    /// Writes the store as pretty-printed JSON, replacing the file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved historical store to {}", path.display());
        Ok(())
    }

    pub fn total_records(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Folds incremental batches into a [`HistoricalStore`].
///
/// Records are keyed by `item_id` within their group. A record in the batch
/// replaces the stored one wholesale, whatever either `merged_at` says, so
/// batches must be fed in arrival order.
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine {
    platform: Platform,
    retention_days: u32,
}

impl MergeEngine {
    pub fn new(platform: Platform, retention_days: u32) -> Self {
        Self {
            platform,
            retention_days,
        }
    }

    /// Merges `increment` into `store` as of `now`.
    ///
    /// With no increment, or one without groups, the store comes back
    /// untouched (including `last_updated`). Retention is applied only to the
    /// groups the increment names; other groups are carried over as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the increment or the store was produced for a
    /// different platform.
    pub fn merge(
        &self,
        increment: Option<&BatchResult>,
        store: Option<HistoricalStore>,
        now: DateTime<Utc>,
    ) -> Result<Option<HistoricalStore>> {
        let Some(increment) = increment.filter(|batch| !batch.groups.is_empty()) else {
            info!("Empty increment, historical store left unchanged");
            return Ok(store);
        };

        self.check_platform(increment.platform)?;

        let mut store = match store {
            Some(store) => {
                self.check_platform(store.platform)?;
                if store.retention_days != self.retention_days {
                    warn!(
                        "Store keeps its retention of {} day(s); ignoring configured {}",
                        store.retention_days, self.retention_days
                    );
                }
                store
            }
            None => HistoricalStore::new(self.platform, self.retention_days, now),
        };

        let cutoff = format_timestamp(now - Duration::days(i64::from(store.retention_days)));

        for (group_id, group) in &increment.groups {
            let slot = store.groups.entry(group_id.clone()).or_default();
            let before = slot.len();
            *slot = merge_group(std::mem::take(slot), &group.records, &cutoff);
            debug!(
                "{group_id}: {before} stored + {} incoming -> {} kept",
                group.records.len(),
                slot.len()
            );
        }

        store.last_updated = Some(now);
        store.cutoff_date = Some(cutoff);
        store.summary = aggregate(store.groups.values().flatten());

        info!(
            "Merged {} incoming record(s); store now holds {} across {} group(s)",
            increment.total_records(),
            store.total_records(),
            store.groups.len()
        );
        Ok(Some(store))
    }

    fn check_platform(&self, found: Platform) -> Result<()> {
        if found == self.platform {
            Ok(())
        } else {
            Err(FlakeLensError::PlatformMismatch {
                expected: self.platform.to_string(),
                found: found.to_string(),
            })
        }
    }
}

fn merge_group(
    existing: Vec<ChangeRecord>,
    incoming: &[ChangeRecord],
    cutoff: &str,
) -> Vec<ChangeRecord> {
    let mut by_id: IndexMap<u64, ChangeRecord> = existing
        .into_iter()
        .map(|record| (record.item_id, record))
        .collect();

    for record in incoming {
        by_id.insert(record.item_id, record.clone());
    }

    let mut records: Vec<ChangeRecord> = by_id
        .into_values()
        .filter(|record| record.merged_at.as_str() >= cutoff)
        .collect();

    records.sort_by(|a, b| {
        b.merged_at
            .cmp(&a.merged_at)
            .then_with(|| b.item_id.cmp(&a.item_id))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::create_record;
    use crate::insights::{DateRange, GroupResult};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn record(group: &str, item_id: u64, merged_at: &str, retests: u64) -> ChangeRecord {
        let mut record = create_record(item_id, merged_at, retests);
        record.group_id = group.to_string();
        record
    }

    fn batch(records: Vec<ChangeRecord>) -> BatchResult {
        let mut groups: IndexMap<String, GroupResult> = IndexMap::new();
        for record in records {
            groups
                .entry(record.group_id.clone())
                .or_default()
                .records
                .push(record);
        }
        for group in groups.values_mut() {
            group.summary = aggregate(&group.records);
        }
        let overall_summary = aggregate(groups.values().flat_map(|group| &group.records));

        BatchResult {
            platform: Platform::GitHub,
            analysis_date: now(),
            days_analyzed: 1,
            date_range: DateRange {
                from: now() - Duration::days(1),
                to: now(),
            },
            groups,
            overall_summary,
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(Platform::GitHub, 90)
    }

    fn merged(batch: &BatchResult, store: Option<HistoricalStore>) -> HistoricalStore {
        engine().merge(Some(batch), store, now()).unwrap().unwrap()
    }

    #[test]
    fn test_first_merge_creates_store() {
        let increment = batch(vec![
            record("org/app", 1, "2024-05-09T00:00:00Z", 1),
            record("org/app", 2, "2024-05-10T00:00:00Z", 0),
        ]);

        let store = merged(&increment, None);

        assert_eq!(store.created_at, now());
        assert_eq!(store.last_updated, Some(now()));
        assert_eq!(store.retention_days, 90);
        assert_eq!(store.cutoff_date.as_deref(), Some("2024-02-10T12:00:00Z"));
        assert_eq!(store.summary.total_items, 2);
        assert_eq!(store.summary.total_retests, 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let increment = batch(vec![
            record("org/app", 1, "2024-05-09T00:00:00Z", 1),
            record("org/lib", 7, "2024-05-08T00:00:00Z", 4),
        ]);

        let once = merged(&increment, None);
        let twice = merged(&increment, Some(once.clone()));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let first = merged(&batch(vec![record("org/app", 42, "2024-05-01T00:00:00Z", 1)]), None);

        let mut replacement = record("org/app", 42, "2024-05-02T00:00:00Z", 3);
        replacement.title = "Retitled".to_string();
        let store = merged(&batch(vec![replacement]), Some(first));

        let records = &store.groups["org/app"];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_id, 42);
        assert_eq!(records[0].total_retests, 3);
        assert_eq!(records[0].title, "Retitled");
        assert_eq!(store.summary.total_retests, 3);
    }

    #[test]
    fn test_last_batch_wins_even_when_older() {
        let fresh = merged(&batch(vec![record("org/app", 5, "2024-05-09T00:00:00Z", 0)]), None);

        let stale = batch(vec![record("org/app", 5, "2024-05-01T00:00:00Z", 6)]);
        let store = merged(&stale, Some(fresh));

        assert_eq!(store.groups["org/app"][0].merged_at, "2024-05-01T00:00:00Z");
        assert_eq!(store.groups["org/app"][0].total_retests, 6);
    }

    #[test]
    fn test_retention_drops_records_before_cutoff() {
        let old = merged(
            &batch(vec![
                record("org/app", 1, "2024-01-01T00:00:00Z", 2),
                record("org/app", 2, "2024-02-10T12:00:00Z", 1),
            ]),
            Some(HistoricalStore::new(Platform::GitHub, 90, now())),
        );
        let store = merged(&batch(vec![record("org/app", 3, "2024-05-10T00:00:00Z", 0)]), Some(old));

        let cutoff = store.cutoff_date.clone().unwrap();
        let records = &store.groups["org/app"];
        assert!(records.iter().all(|r| r.merged_at >= cutoff));
        // A record exactly on the cutoff is kept
        let ids: Vec<u64> = records.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, [3, 2]);
    }

    #[test]
    fn test_records_sorted_newest_first() {
        let store = merged(
            &batch(vec![
                record("org/app", 1, "2024-05-01T00:00:00Z", 0),
                record("org/app", 3, "2024-05-03T00:00:00Z", 0),
                record("org/app", 2, "2024-05-03T00:00:00Z", 0),
                record("org/app", 4, "2024-04-20T00:00:00Z", 0),
            ]),
            None,
        );

        let records = &store.groups["org/app"];
        assert!(records
            .windows(2)
            .all(|pair| pair[0].merged_at >= pair[1].merged_at));
        let ids: Vec<u64> = records.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, [3, 2, 1, 4]);
    }

    #[test]
    fn test_empty_increment_leaves_store_unchanged() {
        let store = merged(&batch(vec![record("org/app", 1, "2024-05-09T00:00:00Z", 1)]), None);
        let later = now() + Duration::hours(6);

        let untouched = engine()
            .merge(None, Some(store.clone()), later)
            .unwrap()
            .unwrap();
        assert_eq!(untouched, store);

        let empty = batch(Vec::new());
        let untouched = engine()
            .merge(Some(&empty), Some(store.clone()), later)
            .unwrap()
            .unwrap();
        assert_eq!(untouched.last_updated, Some(now()));

        assert!(engine().merge(None, None, later).unwrap().is_none());
    }

    #[test]
    fn test_merge_does_not_touch_other_groups() {
        let store = merged(
            &batch(vec![
                record("org/app", 1, "2024-05-09T00:00:00Z", 1),
                // Already outside the window once time moves on, but only the
                // groups named by an increment are re-windowed.
                record("org/lib", 9, "2024-02-11T00:00:00Z", 2),
            ]),
            None,
        );
        let lib_before = store.groups["org/lib"].clone();
        let lib_summary_before = aggregate(&lib_before);

        let later = now() + Duration::days(5);
        let store = engine()
            .merge(
                Some(&batch(vec![record("org/app", 2, "2024-05-14T00:00:00Z", 0)])),
                Some(store),
                later,
            )
            .unwrap()
            .unwrap();

        assert_eq!(store.groups["org/lib"], lib_before);
        assert_eq!(aggregate(&store.groups["org/lib"]), lib_summary_before);
        assert_eq!(store.groups["org/app"].len(), 2);
    }

    #[test]
    fn test_existing_store_keeps_its_retention() {
        let store = HistoricalStore::new(Platform::GitHub, 30, now());
        let increment = batch(vec![
            record("org/app", 1, "2024-04-01T00:00:00Z", 0),
            record("org/app", 2, "2024-05-01T00:00:00Z", 0),
        ]);

        let store = merged(&increment, Some(store));

        assert_eq!(store.retention_days, 30);
        assert_eq!(store.cutoff_date.as_deref(), Some("2024-04-10T12:00:00Z"));
        assert_eq!(store.groups["org/app"].len(), 1);
    }

    #[test]
    fn test_platform_mismatch_is_rejected() {
        let mut increment = batch(vec![record("grp/proj", 1, "2024-05-09T00:00:00Z", 0)]);
        increment.platform = Platform::GitLab;

        let err = engine().merge(Some(&increment), None, now()).unwrap_err();

        assert!(matches!(err, FlakeLensError::PlatformMismatch { .. }));
    }

    #[test]
    fn test_save_creates_directory_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir
            .path()
            .join("history")
            .join("github_flakiness_historical.json");
        let store = merged(&batch(vec![record("org/app", 1, "2024-05-09T00:00:00Z", 1)]), None);

        store.save(&path).unwrap();
        let loaded = HistoricalStore::load(&path, Platform::GitHub).unwrap().unwrap();

        assert_eq!(loaded, store);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"platform\": \"github\""));
    }

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");

        assert!(HistoricalStore::load(&path, Platform::GitLab).unwrap().is_none());
    }

    #[test]
    fn test_load_rejects_other_platform() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        HistoricalStore::new(Platform::GitLab, 90, now())
            .save(&path)
            .unwrap();

        let err = HistoricalStore::load(&path, Platform::GitHub).unwrap_err();

        assert!(matches!(err, FlakeLensError::PlatformMismatch { .. }));
    }
}
