//! Rebasing of NAV series onto a common baseline

use crate::core::store::SeriesStore;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Every series is rescaled so its value at the baseline date equals this.
pub const BASE_NAV: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum RebaseError {
    #[error("series '{series_id}' has no data points in the requested range")]
    NoData { series_id: String },
    #[error("series '{series_id}' has a non-finite value at {date}")]
    InvalidValue { series_id: String, date: NaiveDate },
    #[error("no series selected")]
    EmptySelection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// A derived view over the store; computed on demand, never written back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSeries {
    pub series_id: String,
    pub points: Vec<NormalizedPoint>,
}

/// Picks the common baseline date for a selection: the maximum of the
/// per-series earliest dates, so every selected series has data at or before
/// it. Fails naming the first series with zero points, letting the caller
/// exclude it and retry with the remainder.
pub fn select_baseline(
    store: &SeriesStore,
    series_ids: &[String],
) -> Result<NaiveDate, RebaseError> {
    let mut baseline: Option<NaiveDate> = None;
    for series_id in series_ids {
        let points = store.points_for(series_id);
        let Some(first) = points.first() else {
            return Err(RebaseError::NoData {
                series_id: series_id.clone(),
            });
        };
        baseline = Some(baseline.map_or(first.date, |b| b.max(first.date)));
    }
    baseline.ok_or(RebaseError::EmptySelection)
}

/// Rescales one series so its value at the baseline date equals `BASE_NAV`.
///
/// Points before the baseline are discarded. The base point is the earliest
/// remaining point; among points sharing that date, the first inserted wins.
/// A base value already equal to `BASE_NAV` uses a scale factor of exactly
/// 1.0 so the output carries no floating-point noise.
pub fn rebase(
    store: &SeriesStore,
    series_id: &str,
    baseline: NaiveDate,
) -> Result<NormalizedSeries, RebaseError> {
    let points: Vec<_> = store
        .points_for(series_id)
        .into_iter()
        .filter(|p| p.date >= baseline)
        .collect();

    let Some(base) = points.first() else {
        return Err(RebaseError::NoData {
            series_id: series_id.to_string(),
        });
    };
    if !base.value.is_finite() {
        return Err(RebaseError::InvalidValue {
            series_id: series_id.to_string(),
            date: base.date,
        });
    }

    let factor = if base.value == BASE_NAV {
        1.0
    } else {
        BASE_NAV / base.value
    };

    Ok(NormalizedSeries {
        series_id: series_id.to_string(),
        points: points
            .into_iter()
            .map(|p| NormalizedPoint {
                date: p.date,
                value: p.value * factor,
            })
            .collect(),
    })
}

/// Restricts a normalized series to `start <= date <= end`, inclusive on
/// both ends. An empty result is valid.
pub fn window_filter(
    series: &NormalizedSeries,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> NormalizedSeries {
    NormalizedSeries {
        series_id: series.series_id.clone(),
        points: series
            .points
            .iter()
            .filter(|p| start.is_none_or(|s| p.date >= s) && end.is_none_or(|e| p.date <= e))
            .cloned()
            .collect(),
    }
}
