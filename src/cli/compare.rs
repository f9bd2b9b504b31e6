use super::ui;
use crate::core::config::AppConfig;
use crate::core::rebase::{self, BASE_NAV, NormalizedPoint, NormalizedSeries, RebaseError};
use crate::core::record::{FundDetailProvider, FundRecord};
use crate::core::store::{MergeOutcome, SeriesStore};
use crate::providers::fund_api::FundApiProvider;
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::{Cell, CellAlignment, Table};
use futures::future::join_all;
use rust_decimal::{Decimal, prelude::*};
use rust_finprim::rate::cagr;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-fund line in the comparison summary. A row either carries stats or an
/// error; one fund's failure never blocks the others.
struct CompareRow {
    series_id: String,
    points: usize,
    first: Option<NormalizedPoint>,
    last: Option<NormalizedPoint>,
    change_pct: Option<f64>,
    cagr_pct: Option<f64>,
    error: Option<String>,
}

impl CompareRow {
    fn failed(series_id: String, error: String) -> Self {
        CompareRow {
            series_id,
            points: 0,
            first: None,
            last: None,
            change_pct: None,
            cagr_pct: None,
            error: Some(error),
        }
    }

    fn from_series(series: &NormalizedSeries) -> Self {
        let first = series.points.first().cloned();
        let last = series.points.last().cloned();
        let change_pct = match (&first, &last) {
            (Some(f), Some(l)) if f.value != 0.0 => Some((l.value / f.value - 1.0) * 100.0),
            _ => None,
        };
        let cagr_pct = match (&first, &last) {
            (Some(f), Some(l)) => annualized_return_pct(f, l),
            _ => None,
        };

        CompareRow {
            series_id: series.series_id.clone(),
            points: series.points.len(),
            first,
            last,
            change_pct,
            cagr_pct,
            error: None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: &mut SeriesStore,
    config: &AppConfig,
    requested: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    max_rows: usize,
    json: bool,
) -> Result<()> {
    if requested.is_empty() {
        println!("No funds selected for comparison.");
        return Ok(());
    }
    info!("Comparing {} fund series...", requested.len());

    // Duplicate arguments collapse; order is preserved.
    let mut selection: Vec<String> = Vec::new();
    for arg in requested {
        if !selection.contains(arg) {
            selection.push(arg.clone());
        }
    }

    // The codec and provider are only built when something actually needs
    // fetching, so seed-only sessions run without key material.
    let needs_fetch = selection
        .iter()
        .any(|id| !store.known_series_ids().contains(id));
    let provider = match (&config.provider, needs_fetch) {
        (Some(provider_config), true) => {
            let codec = Arc::new(config.build_codec()?);
            Some(FundApiProvider::new(provider_config, codec))
        }
        _ => None,
    };
    let provider_ref = provider
        .as_ref()
        .map(|p| p as &dyn FundDetailProvider);

    let resolutions = resolve_series(store, provider_ref, &selection).await;

    let mut rows: Vec<CompareRow> = Vec::new();
    let mut active: Vec<String> = Vec::new();
    for (arg, resolution) in resolutions {
        match resolution {
            Ok(series_id) => {
                if !active.contains(&series_id) {
                    active.push(series_id);
                }
            }
            Err(message) => rows.push(CompareRow::failed(arg, message)),
        }
    }

    let baseline = choose_baseline(store, &mut active, &mut rows);

    let mut normalized: Vec<NormalizedSeries> = Vec::new();
    if let Some(baseline) = baseline {
        for series_id in &active {
            match rebase::rebase(store, series_id, baseline) {
                Ok(series) => {
                    let windowed = rebase::window_filter(&series, start, end);
                    rows.push(CompareRow::from_series(&windowed));
                    normalized.push(windowed);
                }
                Err(err) => {
                    warn!("Excluding '{}' from the comparison: {}", series_id, err);
                    rows.push(CompareRow::failed(series_id.clone(), err.to_string()));
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&normalized)?);
        return Ok(());
    }

    match baseline {
        Some(baseline) => println!(
            "{}\n",
            ui::style_text(
                &format!("Baseline: {baseline} (every series rebased to {BASE_NAV:.1})"),
                ui::StyleType::Subtle
            )
        ),
        None => println!(
            "{}\n",
            ui::style_text("No series could be rebased.", ui::StyleType::Error)
        ),
    }

    println!("{}", build_summary_table(&rows));

    let failures: Vec<&CompareRow> = rows.iter().filter(|r| r.error.is_some()).collect();
    if !failures.is_empty() {
        println!();
        for row in &failures {
            if let Some(error) = &row.error {
                println!(
                    "{}",
                    ui::style_text(&format!("{}: {}", row.series_id, error), ui::StyleType::Error)
                );
            }
        }
    }

    if normalized.iter().any(|s| !s.points.is_empty()) {
        ui::print_separator();
        println!("{}", build_value_table(&normalized, max_rows));
    }

    Ok(())
}

/// Resolves each selected argument to a series id. Known ids pass through;
/// everything else is treated as a fund code, fetched concurrently and
/// merged into the store under the record's scheme name.
async fn resolve_series(
    store: &mut SeriesStore,
    provider: Option<&dyn FundDetailProvider>,
    selection: &[String],
) -> Vec<(String, Result<String, String>)> {
    let to_fetch: Vec<String> = selection
        .iter()
        .filter(|id| !store.known_series_ids().contains(*id))
        .cloned()
        .collect();

    let mut fetched: HashMap<String, Result<FundRecord>> = HashMap::new();
    if let Some(provider) = provider
        && !to_fetch.is_empty()
    {
        let pb = ui::new_progress_bar(to_fetch.len() as u64, true);
        pb.set_message("Fetching funds...");

        let futures = to_fetch.iter().map(|code| {
            let pb_clone = pb.clone();
            async move {
                let result = provider.fetch_detail(code).await;
                pb_clone.inc(1);
                (code.clone(), result)
            }
        });

        fetched = join_all(futures).await.into_iter().collect();
        pb.finish_and_clear();
    }

    selection
        .iter()
        .map(|arg| {
            if store.known_series_ids().contains(arg) {
                return (arg.clone(), Ok(arg.clone()));
            }
            match fetched.remove(arg) {
                Some(Ok(record)) => match store.merge(&record) {
                    MergeOutcome::Merged {
                        series_id,
                        added,
                        dropped,
                    } => {
                        debug!(
                            "Merged {} points ({} dropped) for '{}'",
                            added, dropped, series_id
                        );
                        (arg.clone(), Ok(series_id))
                    }
                    MergeOutcome::Skipped { reason } => (arg.clone(), Err(reason)),
                },
                Some(Err(error)) => (arg.clone(), Err(format!("{error:#}"))),
                None => (
                    arg.clone(),
                    Err("not in the dataset and no provider is configured".to_string()),
                ),
            }
        })
        .collect()
}

/// Picks the common baseline, excluding series with no data so one bad fund
/// never blocks the rest. Excluded series become error rows.
fn choose_baseline(
    store: &SeriesStore,
    active: &mut Vec<String>,
    rows: &mut Vec<CompareRow>,
) -> Option<NaiveDate> {
    while !active.is_empty() {
        match rebase::select_baseline(store, active) {
            Ok(date) => return Some(date),
            Err(RebaseError::NoData { series_id }) => {
                warn!(
                    "Excluding '{}' from the comparison: no data points",
                    series_id
                );
                active.retain(|id| *id != series_id);
                rows.push(CompareRow::failed(
                    series_id,
                    "no data points in this session".to_string(),
                ));
            }
            Err(_) => break,
        }
    }
    None
}

/// Annualized growth between the first and last windowed points, as a
/// percentage. `None` when the span is not positive or the annualized ratio
/// leaves `Decimal`'s range.
fn annualized_return_pct(first: &NormalizedPoint, last: &NormalizedPoint) -> Option<f64> {
    let days = (last.date - first.date).num_days();
    if days <= 0 || first.value <= 0.0 || last.value <= 0.0 {
        return None;
    }
    let duration_years = days as f64 / 365.0;

    // Steep moves over short windows overflow Decimal once cagr raises the
    // growth ratio to 1 / duration_years. Screen the result in f64 first.
    let annual_growth = (last.value / first.value).powf(1.0 / duration_years);
    if Decimal::from_f64(annual_growth * 100.0).is_none() {
        return None;
    }

    let begin_bal = Decimal::from_f64(first.value)?;
    let end_bal = Decimal::from_f64(last.value)?;
    let n_years = Decimal::from_f64(duration_years)?;
    if n_years.is_zero() {
        return None;
    }

    let rate = cagr(begin_bal, end_bal, n_years);
    let percentage = (rate * Decimal::from(100)).to_f64()?;
    debug!("cagr: {begin_bal}, {end_bal}, {n_years} = {rate}, {percentage}");
    Some(percentage)
}

fn build_summary_table(rows: &[CompareRow]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("Points"),
        ui::header_cell("First"),
        ui::header_cell("Last"),
        ui::header_cell("Change %"),
        ui::header_cell("CAGR %"),
    ]);

    for row in rows {
        let mut cells = vec![Cell::new(&row.series_id)];
        if row.error.is_some() {
            for _ in 0..5 {
                cells.push(ui::na_cell(true));
            }
        } else {
            cells.push(Cell::new(row.points).set_alignment(CellAlignment::Right));
            cells.push(ui::format_optional_cell(row.first.as_ref(), format_point));
            cells.push(ui::format_optional_cell(row.last.as_ref(), format_point));
            cells.push(match row.change_pct {
                Some(change) => ui::change_cell(change),
                None => ui::na_cell(false),
            });
            cells.push(match row.cagr_pct {
                Some(rate) => ui::change_cell(rate),
                None => ui::na_cell(false),
            });
        }
        table.add_row(cells);
    }

    table
}

/// Date by fund grid of rebased values, sampled down to `max_rows` rows.
fn build_value_table(normalized: &[NormalizedSeries], max_rows: usize) -> Table {
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    for series in normalized {
        for point in &series.points {
            dates.insert(point.date);
        }
    }
    let dates: Vec<NaiveDate> = dates.into_iter().collect();

    let by_series: Vec<(&str, HashMap<NaiveDate, f64>)> = normalized
        .iter()
        .map(|series| {
            (
                series.series_id.as_str(),
                series.points.iter().map(|p| (p.date, p.value)).collect(),
            )
        })
        .collect();

    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Date")];
    for (series_id, _) in &by_series {
        header.push(ui::header_cell(series_id));
    }
    table.set_header(header);

    for index in sample_indices(dates.len(), max_rows) {
        let date = dates[index];
        let mut cells = vec![ui::date_cell(date)];
        for (_, values) in &by_series {
            cells.push(ui::format_optional_cell(values.get(&date).copied(), |v| {
                format!("{v:.4}")
            }));
        }
        table.add_row(cells);
    }

    table
}

fn format_point(point: &NormalizedPoint) -> String {
    format!("{:.4} on {}", point.value, point.date)
}

/// Picks at most `max_rows` indices spread evenly across `len`, always
/// keeping the first and last. Zero means no limit.
fn sample_indices(len: usize, max_rows: usize) -> Vec<usize> {
    if max_rows == 0 || len <= max_rows {
        return (0..len).collect();
    }
    if max_rows == 1 {
        return vec![len - 1];
    }

    let step = (len - 1) as f64 / (max_rows - 1) as f64;
    let mut indices: Vec<usize> = (0..max_rows)
        .map(|i| (i as f64 * step).round() as usize)
        .collect();
    indices.dedup();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crate::core::store::SeriesPoint;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn point(series_id: &str, d: &str, value: f64) -> SeriesPoint {
        SeriesPoint {
            series_id: series_id.to_string(),
            date: date(d),
            value,
        }
    }

    fn example_store() -> SeriesStore {
        SeriesStore::from_points(vec![
            point("FundA", "2018-10-31", 10.0),
            point("FundA", "2019-01-31", 12.0),
            point("FundB", "2019-01-31", 5.0),
            point("FundB", "2019-06-30", 6.0),
        ])
    }

    struct MockProvider {
        records: HashMap<String, FundRecord>,
    }

    #[async_trait]
    impl FundDetailProvider for MockProvider {
        async fn fetch_detail(&self, fund_code: &str) -> Result<FundRecord> {
            self.records
                .get(fund_code)
                .cloned()
                .ok_or_else(|| anyhow!("unknown fund: {fund_code}"))
        }
    }

    #[tokio::test]
    async fn known_ids_resolve_without_a_provider() {
        let mut store = example_store();
        let selection = vec!["FundA".to_string(), "FundB".to_string()];

        let resolutions = resolve_series(&mut store, None, &selection).await;

        assert_eq!(resolutions.len(), 2);
        assert_eq!(resolutions[0].1, Ok("FundA".to_string()));
        assert_eq!(resolutions[1].1, Ok("FundB".to_string()));
    }

    #[tokio::test]
    async fn unknown_ids_are_fetched_and_merged() {
        let mut store = example_store();
        let provider = MockProvider {
            records: HashMap::from([(
                "120503".to_string(),
                FundRecord {
                    scheme_name: Some("Gamma Fund".to_string()),
                    total_return_index: Some(vec![
                        ("2019-01-31".to_string(), 20.0),
                        ("2019-06-30".to_string(), 25.0),
                    ]),
                },
            )]),
        };

        let selection = vec!["120503".to_string()];
        let resolutions = resolve_series(&mut store, Some(&provider), &selection).await;

        assert_eq!(resolutions[0].1, Ok("Gamma Fund".to_string()));
        assert_eq!(store.points_for("Gamma Fund").len(), 2);
        assert!(store.known_series_ids().contains(&"Gamma Fund".to_string()));
    }

    #[tokio::test]
    async fn fetch_failures_become_per_series_errors() {
        let mut store = example_store();
        let provider = MockProvider {
            records: HashMap::new(),
        };

        let selection = vec!["FundA".to_string(), "missing".to_string()];
        let resolutions = resolve_series(&mut store, Some(&provider), &selection).await;

        assert_eq!(resolutions[0].1, Ok("FundA".to_string()));
        let error = resolutions[1].1.as_ref().unwrap_err();
        assert!(error.contains("unknown fund"));
    }

    #[tokio::test]
    async fn skipped_merges_become_per_series_errors() {
        let mut store = SeriesStore::new();
        let provider = MockProvider {
            records: HashMap::from([(
                "120503".to_string(),
                FundRecord {
                    scheme_name: Some("Gamma Fund".to_string()),
                    total_return_index: None,
                },
            )]),
        };

        let resolutions =
            resolve_series(&mut store, Some(&provider), &["120503".to_string()]).await;

        let error = resolutions[0].1.as_ref().unwrap_err();
        assert!(error.contains("no total return index"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_without_a_provider_error_out() {
        let mut store = example_store();
        let resolutions =
            resolve_series(&mut store, None, &["mystery".to_string()]).await;

        let error = resolutions[0].1.as_ref().unwrap_err();
        assert!(error.contains("no provider is configured"));
    }

    #[test]
    fn baseline_exclusion_keeps_the_healthy_series() {
        let mut store = example_store();
        store.merge(&FundRecord {
            scheme_name: Some("Ghost".to_string()),
            total_return_index: Some(Vec::new()),
        });

        let mut active = vec![
            "Ghost".to_string(),
            "FundA".to_string(),
            "FundB".to_string(),
        ];
        let mut rows = Vec::new();

        let baseline = choose_baseline(&store, &mut active, &mut rows);

        assert_eq!(baseline, Some(date("2019-01-31")));
        assert_eq!(active, vec!["FundA".to_string(), "FundB".to_string()]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].series_id, "Ghost");
        assert!(rows[0].error.is_some());
    }

    #[test]
    fn baseline_with_no_survivors_is_none() {
        let mut store = SeriesStore::new();
        store.merge(&FundRecord {
            scheme_name: Some("Ghost".to_string()),
            total_return_index: Some(Vec::new()),
        });

        let mut active = vec!["Ghost".to_string()];
        let mut rows = Vec::new();

        assert_eq!(choose_baseline(&store, &mut active, &mut rows), None);
        assert!(active.is_empty());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn row_stats_cover_change_and_cagr() {
        let series = NormalizedSeries {
            series_id: "FundA".to_string(),
            points: vec![
                NormalizedPoint {
                    date: date("2019-01-31"),
                    value: 10.0,
                },
                NormalizedPoint {
                    date: date("2020-01-31"),
                    value: 12.0,
                },
            ],
        };

        let row = CompareRow::from_series(&series);
        assert_eq!(row.points, 2);
        assert!((row.change_pct.unwrap() - 20.0).abs() < 0.01);
        // 365 days at +20% is 20% annualized.
        assert!((row.cagr_pct.unwrap() - 20.0).abs() < 0.1);
        assert!(row.error.is_none());
    }

    #[test]
    fn row_stats_for_an_empty_window_are_all_none() {
        let series = NormalizedSeries {
            series_id: "FundA".to_string(),
            points: Vec::new(),
        };

        let row = CompareRow::from_series(&series);
        assert_eq!(row.points, 0);
        assert!(row.first.is_none());
        assert!(row.change_pct.is_none());
        assert!(row.cagr_pct.is_none());
        assert!(row.error.is_none());
    }

    #[test]
    fn cagr_needs_a_positive_time_span() {
        let first = NormalizedPoint {
            date: date("2019-01-31"),
            value: 10.0,
        };
        assert!(annualized_return_pct(&first, &first).is_none());
    }

    #[test]
    fn row_survives_a_move_too_steep_to_annualize() {
        let series = NormalizedSeries {
            series_id: "FundA".to_string(),
            points: vec![
                NormalizedPoint {
                    date: date("2019-01-31"),
                    value: 10.0,
                },
                NormalizedPoint {
                    date: date("2019-02-01"),
                    value: 20.0,
                },
            ],
        };

        // Doubling in a day annualizes to 2^365, past what Decimal holds.
        // The change still renders and only the CAGR cell goes empty.
        let row = CompareRow::from_series(&series);
        assert!((row.change_pct.unwrap() - 100.0).abs() < 0.01);
        assert!(row.cagr_pct.is_none());
        assert!(row.error.is_none());
    }

    #[test]
    fn cagr_still_annualizes_small_short_window_moves() {
        let first = NormalizedPoint {
            date: date("2019-01-31"),
            value: 10.0,
        };
        let last = NormalizedPoint {
            date: date("2019-02-01"),
            value: 10.5,
        };
        let pct = annualized_return_pct(&first, &last).unwrap();
        assert!(pct > 100.0);
    }

    #[test]
    fn sample_keeps_everything_when_it_fits() {
        assert_eq!(sample_indices(5, 12), vec![0, 1, 2, 3, 4]);
        assert_eq!(sample_indices(5, 0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn sample_spreads_rows_and_keeps_the_ends() {
        let indices = sample_indices(100, 12);
        assert_eq!(indices.len(), 12);
        assert_eq!(indices[0], 0);
        assert_eq!(*indices.last().unwrap(), 99);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sample_with_one_row_shows_the_latest() {
        assert_eq!(sample_indices(50, 1), vec![49]);
    }

    #[tokio::test]
    async fn run_renders_the_seeded_comparison() {
        let mut store = example_store();
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        let requested = vec!["FundA".to_string(), "FundB".to_string()];

        let result = run(&mut store, &config, &requested, None, None, 12, false).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_renders_json_output() {
        let mut store = example_store();
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        let requested = vec!["FundB".to_string()];

        let result = run(&mut store, &config, &requested, None, None, 0, true).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_with_a_window_outside_the_data_still_succeeds() {
        let mut store = example_store();
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        let requested = vec!["FundA".to_string()];

        let result = run(
            &mut store,
            &config,
            &requested,
            Some(date("2025-01-01")),
            None,
            12,
            false,
        )
        .await;
        assert!(result.is_ok());
    }
}
