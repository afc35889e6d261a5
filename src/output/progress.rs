use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_red, bright_yellow};

/// Spinner shown while one group is being scraped
pub struct GroupProgress {
    pb: ProgressBar,
    group: String,
}

impl GroupProgress {
    /// Prints the section heading once per run.
    pub fn heading(total_groups: usize) {
        eprintln!(
            "{}  {}",
            bright("⚙️"),
            bright(format!("Scraping {total_groups} group(s)")).underlined()
        );
    }

    pub fn start(position: usize, total: usize, group: &str) -> Self {
        let pb = create_spinner(
            bright_yellow(format!("[{position}/{total}] Analyzing {group}")).to_string(),
        );
        Self {
            pb,
            group: group.to_string(),
        }
    }

    pub fn finish(self, records: usize) {
        self.pb.finish_with_message(
            bright_green(format!("{}: {records} merged change(s) ✓", self.group)).to_string(),
        );
    }

    pub fn fail(self) {
        self.pb
            .finish_with_message(bright_red(format!("{}: skipped ✗", self.group)).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
