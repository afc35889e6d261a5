mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::GroupProgress;
pub use styling::{bright_green, bright_red, cyan, dim, magenta_bold};
pub use summary::print_summary;

/// Prints the flakelens banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🧪 flakelens"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI retest flakiness for GitHub and GitLab")
    );
}
