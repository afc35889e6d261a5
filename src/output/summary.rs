use std::fmt::Write;

use comfy_table::{Cell, Color as TableColor};

use crate::insights::{ChangeRecord, GroupSummary};
use crate::metrics::MetricsSource;

use super::styling::{bright, bright_yellow, cyan, dim, retest_rate};
use super::tables::{
    color_coded_retest_rate_cell, color_coded_retests_cell, create_cyan_header, create_table,
};

/// Prints a human-readable flakiness summary to stdout.
///
/// Displays color-coded tables showing:
/// - Overview: platform, group and change counts, overall retest rate
/// - Groups: per-group totals, retest rate and averages
/// - Top 10 Retested Changes: changes that needed the most retests
///
/// Color coding of retest rates:
/// - Green: below 10%
/// - Yellow: 10-25%
/// - Red: 25% and above
pub fn print_summary<S: MetricsSource + ?Sized>(source: &S, title: &str) {
    println!("{}", render_summary(source, title));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn group_row(name: &str, summary: &GroupSummary) -> Vec<Cell> {
    vec![
        Cell::new(name),
        Cell::new(summary.total_items),
        Cell::new(summary.total_commits),
        Cell::new(summary.total_retests),
        Cell::new(summary.items_with_retests),
        color_coded_retest_rate_cell(summary.retest_rate),
        Cell::new(format!("{:.2}", summary.avg_retests_per_item)),
        Cell::new(format!("{:.2}", summary.avg_retests_per_commit)),
    ]
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn most_retested<'a>(records: impl Iterator<Item = &'a ChangeRecord>) -> Vec<&'a ChangeRecord> {
    let mut retested: Vec<&ChangeRecord> = records.filter(|r| r.total_retests > 0).collect();
    retested.sort_by(|a, b| {
        b.total_retests
            .cmp(&a.total_retests)
            .then_with(|| b.merged_at.cmp(&a.merged_at))
    });
    retested.truncate(10);
    retested
}

fn render_summary<S: MetricsSource + ?Sized>(source: &S, title: &str) -> String {
    let platform = source.platform();
    let noun = platform.item_noun().to_uppercase();
    let groups = source.groups();
    let overall = source.overall_summary();
    let mut output = String::new();

    add_section_header(&mut output, "📊", title);
    let _ = write!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Platform:"),
        cyan(platform),
        dim("Groups analyzed:"),
        bright_yellow(groups.len()),
        dim(format!("Merged {noun}s:")),
        bright_yellow(overall.total_items),
        dim("Total retests:"),
        bright_yellow(overall.total_retests),
        dim("Retest rate:"),
        retest_rate(overall.retest_rate),
    );

    if overall.total_items == 0 {
        let _ = writeln!(
            output,
            "{}",
            bright_yellow(format!("No merged {noun}s found."))
        );
        return output;
    }

    add_section_header(&mut output, "📋", "Groups");
    let mut groups_table = create_table();
    let group_title = capitalize(platform.group_label());
    let items = format!("{noun}s");
    let items_with_retests = format!("{noun}s w/ Retests");
    let avg_per_item = format!("Avg / {noun}");
    groups_table.set_header(create_cyan_header(&[
        group_title.as_str(),
        items.as_str(),
        "Commits",
        "Retests",
        items_with_retests.as_str(),
        "Retest Rate",
        avg_per_item.as_str(),
        "Avg / Commit",
    ]));
    for (name, summary, _) in &groups {
        groups_table.add_row(group_row(name, summary));
    }
    if groups.len() > 1 {
        let mut total_row = group_row("All", &overall);
        total_row[0] = Cell::new("All").fg(TableColor::DarkGrey);
        groups_table.add_row(total_row);
    }
    let _ = write!(output, "{groups_table}\n\n");

    let retested = most_retested(groups.iter().flat_map(|(_, _, records)| records.iter()));
    if !retested.is_empty() {
        add_section_header(&mut output, "🔄", &format!("Top 10 Retested {noun}s"));
        let mut changes_table = create_table();
        changes_table.set_header(create_cyan_header(&[
            "#",
            noun.as_str(),
            "Title",
            "Author",
            "Merged",
            "Retests",
        ]));
        for (idx, record) in retested.iter().enumerate() {
            let reference = record.url.as_deref().map_or_else(
                || format!("{}#{}", record.group_id, record.item_id),
                str::to_string,
            );
            changes_table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(reference),
                Cell::new(&record.title),
                Cell::new(&record.author),
                Cell::new(&record.merged_at),
                color_coded_retests_cell(record.total_retests),
            ]);
        }
        let _ = write!(output, "{changes_table}\n\n");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::aggregate::tests::create_record;
    use crate::insights::{BatchResult, DateRange, GroupResult, Platform};
    use chrono::Utc;
    use indexmap::IndexMap;

    fn batch(groups: Vec<(&str, Vec<ChangeRecord>)>) -> BatchResult {
        let now = Utc::now();
        let mut results = IndexMap::new();
        for (name, records) in groups {
            let summary = aggregate(&records);
            results.insert(name.to_string(), GroupResult { records, summary });
        }
        let overall_summary = aggregate(results.values().flat_map(|g| &g.records));

        BatchResult {
            platform: Platform::GitHub,
            analysis_date: now,
            days_analyzed: 1,
            date_range: DateRange { from: now, to: now },
            groups: results,
            overall_summary,
        }
    }

    #[test]
    fn test_render_summary_empty_batch() {
        let output = render_summary(&batch(vec![("org/app", Vec::new())]), "Scrape");

        assert!(output.contains("Scrape"));
        assert!(output.contains("GitHub"));
        assert!(output.contains("Groups analyzed:"));
        assert!(output.contains("No merged PRs found"));
        assert!(!output.contains("Top 10"));
    }

    #[test]
    fn test_render_summary_lists_groups_and_total() {
        let mut lib = create_record(5, "2024-05-01T00:00:00Z", 0);
        lib.group_id = "org/lib".to_string();
        let output = render_summary(
            &batch(vec![
                (
                    "org/app",
                    vec![
                        create_record(1, "2024-05-02T00:00:00Z", 4),
                        create_record(2, "2024-05-01T00:00:00Z", 0),
                    ],
                ),
                ("org/lib", vec![lib]),
            ]),
            "Scrape",
        );

        assert!(output.contains("Repository"));
        assert!(output.contains("org/app"));
        assert!(output.contains("org/lib"));
        assert!(output.contains("All"));
        assert!(output.contains("33.3%"));
        assert!(output.contains("Top 10 Retested PRs"));
        assert!(output.contains("Change 1"));
        assert!(!output.contains("Change 2"));
    }

    #[test]
    fn test_most_retested_orders_by_retests() {
        let records = vec![
            create_record(1, "2024-05-01T00:00:00Z", 1),
            create_record(2, "2024-05-02T00:00:00Z", 5),
            create_record(3, "2024-05-03T00:00:00Z", 1),
            create_record(4, "2024-05-03T00:00:00Z", 0),
        ];

        let ids: Vec<u64> = most_retested(records.iter())
            .iter()
            .map(|r| r.item_id)
            .collect();

        assert_eq!(ids, [2, 3, 1]);
    }
}
