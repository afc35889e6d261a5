use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn retest_rate_color(rate: f64) -> TableColor {
    if rate >= 25.0 {
        TableColor::Red
    } else if rate >= 10.0 {
        TableColor::Yellow
    } else {
        TableColor::Green
    }
}

pub fn color_coded_retest_rate_cell(rate: f64) -> Cell {
    Cell::new(format!("{rate:.1}%")).fg(retest_rate_color(rate))
}

pub fn color_coded_retests_cell(retests: u64) -> Cell {
    let color = match retests {
        0 => TableColor::Green,
        1..=2 => TableColor::Yellow,
        _ => TableColor::Red,
    };
    Cell::new(retests).fg(color)
}
