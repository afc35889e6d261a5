//! Retry-signal strategies shared by the platform providers.
//!
//! Each function is pure over already-fetched data so the counting rules can
//! be tested without a network.

/// Default retry command recognised in discussion comments.
pub const DEFAULT_RETEST_COMMAND: &str = "/retest";

/// Returns true if a comment body issues the retry command.
///
/// The body counts when, trimmed and lower-cased, it starts with the command
/// or any of its lines does.
pub fn is_retest_comment(body: &str, command: &str) -> bool {
    let command = command.to_lowercase();
    let body = body.trim().to_lowercase();

    body.starts_with(&command)
        || body
            .lines()
            .any(|line| line.trim_start().starts_with(&command))
}

/// Comment-command strategy: each qualifying comment counts once.
pub fn count_retest_comments<'a, I>(bodies: I, command: &str) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    bodies
        .into_iter()
        .filter(|body| is_retest_comment(body, command))
        .count() as u64
}

/// Returns true if a commit merged the base branch into the change's branch.
///
/// Only two-parent commits qualify; the message must start with one of the
/// messages git and the platforms' "update branch" buttons produce.
pub fn is_branch_update_commit(parent_count: usize, message: &str, base_ref: &str) -> bool {
    if parent_count != 2 {
        return false;
    }

    let message = message.trim_start().to_lowercase();
    let base_ref = base_ref.to_lowercase();

    [
        format!("merge branch '{base_ref}'"),
        format!("merge branch \"{base_ref}\""),
        "merge remote-tracking branch".to_string(),
    ]
    .iter()
    .any(|prefix| message.starts_with(prefix.as_str()))
}

/// Retries implied by the CI instances one commit received.
pub fn rerun_retries(instance_count: u64) -> u64 {
    instance_count.saturating_sub(1)
}

/// Rerun-instance strategy over per-commit instance counts.
///
/// Returns `(total_instances, total_retests, commits_with_retests)`.
pub fn tally_rerun_instances<I>(per_commit_instances: I) -> (u64, u64, u64)
where
    I: IntoIterator<Item = u64>,
{
    per_commit_instances
        .into_iter()
        .fold((0, 0, 0), |(instances, retests, commits), count| {
            let retries = rerun_retries(count);
            (
                instances + count,
                retests + retries,
                commits + u64::from(retries > 0),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_retest_comments_on_own_line() {
        let bodies = ["lgtm", "/retest", "please\n/retest\nthanks"];
        assert_eq!(count_retest_comments(bodies, DEFAULT_RETEST_COMMAND), 2);
    }

    #[test]
    fn test_retest_comment_is_case_insensitive_and_trimmed() {
        assert!(is_retest_comment("   /ReTest  \n", "/retest"));
        assert!(is_retest_comment("/retest-required", "/retest"));
    }

    #[test]
    fn test_retest_mentioned_mid_sentence_does_not_count() {
        assert!(!is_retest_comment("no need to /retest this", "/retest"));
    }

    #[test]
    fn test_multiple_commands_in_one_comment_count_once() {
        let bodies = ["/retest\n/retest"];
        assert_eq!(count_retest_comments(bodies, "/retest"), 1);
    }

    #[test]
    fn test_branch_update_requires_two_parents() {
        assert!(!is_branch_update_commit(1, "Merge branch 'main' into feature", "main"));
        assert!(is_branch_update_commit(2, "Merge branch 'main' into feature", "main"));
    }

    #[test]
    fn test_branch_update_recognizes_known_messages() {
        assert!(is_branch_update_commit(2, "Merge branch \"master\" into fix", "master"));
        assert!(is_branch_update_commit(
            2,
            "Merge remote-tracking branch 'origin/main' into topic",
            "main"
        ));
    }

    #[test]
    fn test_branch_update_ignores_other_merges() {
        assert!(!is_branch_update_commit(2, "Merge branch 'feature-x' into main", "main"));
        assert!(!is_branch_update_commit(2, "Merge pull request #12 from a/b", "main"));
    }

    #[test]
    fn test_rerun_retries_for_three_instances() {
        assert_eq!(rerun_retries(3), 2);
        assert_eq!(rerun_retries(1), 0);
        assert_eq!(rerun_retries(0), 0);
    }

    #[test]
    fn test_tally_rerun_instances_sums_over_commits() {
        let (instances, retests, commits) = tally_rerun_instances([3, 1, 0, 2]);
        assert_eq!(instances, 6);
        assert_eq!(retests, 3);
        assert_eq!(commits, 2);
    }
}
