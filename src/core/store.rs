//! Session-scoped NAV series storage

use crate::core::record::FundRecord;
use chrono::NaiveDate;
use tracing::{debug, warn};

/// Wire date format used by the fund API's return-index pairs.
const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub series_id: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// Result of merging a decoded record. `Skipped` is a success that carries
/// its diagnostic; the store is unchanged and the caller decides whether to
/// surface it.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged {
        series_id: String,
        added: usize,
        dropped: usize,
    },
    Skipped {
        reason: String,
    },
}

/// Append-only collection of NAV points for one session. Grows by bulk load
/// and incremental merge; never shrinks. Single writer, no internal
/// synchronization.
#[derive(Debug, Default)]
pub struct SeriesStore {
    points: Vec<SeriesPoint>,
    series_ids: Vec<String>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a bulk historical load. Series ids are registered
    /// in first-seen order of the points.
    pub fn from_points(points: Vec<SeriesPoint>) -> Self {
        let mut store = Self::new();
        for point in &points {
            store.register_series(&point.series_id);
        }
        store.points = points;
        store
    }

    /// Appends the record's return-index pairs to the store, tagged with the
    /// record's scheme name. Records missing either field are skipped with a
    /// warning and leave the store unchanged. Unparseable date strings are
    /// dropped and counted. No de-duplication: merging the same record twice
    /// doubles its points.
    pub fn merge(&mut self, record: &FundRecord) -> MergeOutcome {
        let Some(series_id) = record.scheme_name.as_deref() else {
            let reason = "record has no scheme name".to_string();
            warn!("Skipping merge: {}", reason);
            return MergeOutcome::Skipped { reason };
        };
        let Some(pairs) = record.total_return_index.as_deref() else {
            let reason = format!("record for '{series_id}' has no total return index");
            warn!("Skipping merge: {}", reason);
            return MergeOutcome::Skipped { reason };
        };

        // An empty index still registers the series id.
        self.register_series(series_id);

        let mut added = 0;
        let mut dropped = 0;
        for (date_str, value) in pairs {
            match NaiveDate::parse_from_str(date_str, WIRE_DATE_FORMAT) {
                Ok(date) => {
                    self.points.push(SeriesPoint {
                        series_id: series_id.to_string(),
                        date,
                        value: *value,
                    });
                    added += 1;
                }
                Err(_) => {
                    debug!(
                        "Dropping point with unparseable date '{}' for '{}'",
                        date_str, series_id
                    );
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {} unparseable dates while merging '{}'", dropped, series_id);
        }

        MergeOutcome::Merged {
            series_id: series_id.to_string(),
            added,
            dropped,
        }
    }

    /// Distinct series ids in first-seen order.
    pub fn known_series_ids(&self) -> &[String] {
        &self.series_ids
    }

    /// All points for a series, ascending by date. The sort is stable, so
    /// points sharing a date keep their insertion order.
    pub fn points_for(&self, series_id: &str) -> Vec<SeriesPoint> {
        let mut points: Vec<SeriesPoint> = self
            .points
            .iter()
            .filter(|p| p.series_id == series_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.date);
        points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn register_series(&mut self, series_id: &str) {
        if !self.series_ids.iter().any(|id| id == series_id) {
            self.series_ids.push(series_id.to_string());
        }
    }
}
