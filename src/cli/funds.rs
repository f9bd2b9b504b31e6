use super::ui;
use crate::core::store::SeriesStore;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Table};

/// Lists the series known to this session with their point counts and date
/// coverage.
pub fn run(store: &SeriesStore) -> Result<()> {
    if store.known_series_ids().is_empty() {
        println!("No fund series loaded. Configure a seed_file or fetch funds with `compare`.");
        return Ok(());
    }

    println!(
        "{}\n",
        ui::style_text("Known fund series", ui::StyleType::Title)
    );
    println!("{}", build_funds_table(store));
    println!(
        "\n{} {}",
        ui::style_text("Total points:", ui::StyleType::TotalLabel),
        ui::style_text(&store.len().to_string(), ui::StyleType::TotalValue)
    );

    Ok(())
}

fn build_funds_table(store: &SeriesStore) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("Points"),
        ui::header_cell("From"),
        ui::header_cell("To"),
    ]);

    for series_id in store.known_series_ids() {
        let points = store.points_for(series_id);
        let from = points.first().map(|p| p.date);
        let to = points.last().map(|p| p.date);

        table.add_row(vec![
            Cell::new(series_id),
            Cell::new(points.len()).set_alignment(CellAlignment::Right),
            ui::format_optional_cell(from, |d| d.format("%Y-%m-%d").to_string()),
            ui::format_optional_cell(to, |d| d.format("%Y-%m-%d").to_string()),
        ]);
    }

    table
}
