//! Bulk NAV history loader
//!
//! Reads the wide spreadsheet export the dashboard ships with: first column
//! holds the fund name, every other column header is a date, cells are NAV
//! values. The table is reshaped into one `SeriesPoint` per cell.

use crate::core::store::SeriesPoint;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{debug, warn};

/// Header date formats seen in the exports, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d-%m-%Y", "%d-%b-%y"];

pub fn load_nav_csv<P: AsRef<Path>>(path: P) -> Result<Vec<SeriesPoint>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open seed file: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read seed file header: {}", path.display()))?
        .clone();

    // Columns whose header is not a date in any accepted format are dropped
    // for the whole file.
    let columns: Vec<Option<NaiveDate>> = headers
        .iter()
        .skip(1)
        .map(|header| {
            let parsed = parse_header_date(header);
            if parsed.is_none() {
                warn!("Dropping seed column with unparseable date header: '{}'", header);
            }
            parsed
        })
        .collect();

    let mut points = Vec::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Failed to read seed file row: {}", path.display()))?;
        let Some(series_id) = row.get(0).map(str::trim) else {
            continue;
        };
        if series_id.is_empty() {
            continue;
        }

        for (i, date) in columns.iter().enumerate() {
            let Some(date) = date else { continue };
            let Some(cell) = row.get(i + 1).map(str::trim) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(value) => points.push(SeriesPoint {
                    series_id: series_id.to_string(),
                    date: *date,
                    value,
                }),
                Err(_) => debug!(
                    "Skipping unparseable NAV '{}' for '{}' on {}",
                    cell, series_id, date
                ),
            }
        }
    }

    debug!("Loaded {} seed points from {}", points.len(), path.display());
    Ok(points)
}

fn parse_header_date(header: &str) -> Option<NaiveDate> {
    let header = header.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(header, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes()).expect("Failed to write csv");
        file
    }

    #[test]
    fn reshapes_wide_rows_into_points() {
        let file = write_csv(
            "Fund Name,2018-10-31,2019-01-31\n\
             FundA,10.0,12.0\n\
             FundB,,5.0\n",
        );

        let points = load_nav_csv(file.path()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].series_id, "FundA");
        assert_eq!(points[0].date, date("2018-10-31"));
        assert_eq!(points[0].value, 10.0);
        assert_eq!(points[2].series_id, "FundB");
        assert_eq!(points[2].date, date("2019-01-31"));
        assert_eq!(points[2].value, 5.0);
    }

    #[test]
    fn accepts_all_header_date_formats() {
        let file = write_csv(
            "Fund Name,2018-10-31,30-11-2018,31-Dec-18\n\
             FundA,10.0,10.5,11.0\n",
        );

        let points = load_nav_csv(file.path()).unwrap();
        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date("2018-10-31"), date("2018-11-30"), date("2018-12-31")]
        );
    }

    #[test]
    fn drops_columns_with_unparseable_headers() {
        let file = write_csv(
            "Fund Name,2018-10-31,Remarks\n\
             FundA,10.0,looks fine\n",
        );

        let points = load_nav_csv(file.path()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, date("2018-10-31"));
    }

    #[test]
    fn skips_unparseable_cells() {
        let file = write_csv(
            "Fund Name,2018-10-31,2018-11-30\n\
             FundA,n/a,10.5\n",
        );

        let points = load_nav_csv(file.path()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 10.5);
    }

    #[test]
    fn tolerates_short_rows_and_blank_names() {
        let file = write_csv(
            "Fund Name,2018-10-31,2018-11-30\n\
             FundA,10.0\n\
             ,1.0,2.0\n",
        );

        let points = load_nav_csv(file.path()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].series_id, "FundA");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_nav_csv("/nonexistent/seed.csv");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to open seed file")
        );
    }
}
