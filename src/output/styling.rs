use console::{style, StyledObject};
use std::fmt::Display;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Colors a retest rate: green below 10%, yellow below 25%, red above.
pub fn retest_rate(rate: f64) -> StyledObject<String> {
    let text = format!("{rate:.1}%");
    if rate >= 25.0 {
        bright_red(text)
    } else if rate >= 10.0 {
        bright_yellow(text)
    } else {
        bright_green(text)
    }
}
