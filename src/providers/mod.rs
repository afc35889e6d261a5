pub mod github;
pub mod gitlab;
pub mod signals;
pub mod transport;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::insights::{ChangeRecord, Platform};

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

/// Platform-specific retry-signal extraction.
///
/// One implementation per source platform; the run picks one up front and the
/// rest of the pipeline only sees [`ChangeRecord`]s.
#[allow(async_fn_in_trait)]
pub trait FlakinessProvider {
    fn platform(&self) -> Platform;

    /// Extracts a record for every change in `group` merged since `since`.
    ///
    /// Fails only when the change listing itself cannot be fetched; problems
    /// with a single change degrade that change instead.
    async fn analyze_group(&self, group: &str, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>>;
}
