//! # Activity Atlas
//!
//! Derived aggregates from personal tracker exports, ready for charting and
//! time-lapse map rendering.
//!
//! This library provides two independent pipelines:
//! - **Metric path**: streaming extraction of energy, distance and stand time
//!   samples from a record stream, summed per metric and calendar day
//! - **Geo path**: quantization of workout route trackpoints onto a decimal
//!   grid, a cell to visited-dates index, and a per-day cumulative visitation
//!   series built by an event sweep
//!
//! ## Features
//!
//! - **`parallel`** - Ingest route files and run both pipelines in parallel with rayon
//! - **`serde`** - Serialize/deserialize the output tables
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use activity_atlas::{CellVisitIndex, DateWindow, Quantizer, project};
//! use chrono::NaiveDate;
//!
//! let day = |d: u32| NaiveDate::from_ymd_opt(2022, 1, d).unwrap();
//! let cell = Quantizer::default().quantize(-122.45, 37.75);
//!
//! let mut index = CellVisitIndex::new();
//! index.insert(cell, day(1));
//! index.insert(cell, day(3));
//!
//! let window = DateWindow::new(day(1), day(5)).unwrap();
//! let series = project(&index, window);
//! assert_eq!(series.count(day(2), &cell), 1);
//! assert_eq!(series.count(day(4), &cell), 2);
//! ```

use chrono::{Days, NaiveDate};

pub mod error;
pub use error::{ExtractError, PipelineError, RecordField, RouteError};

// Coordinate grid
pub mod quantize;
pub use quantize::{BoundingRegion, GeoCell, Quantizer, DEFAULT_PRECISION};

// Metric path
pub mod metrics;
pub use metrics::{ExtractorConfig, MetricExtractor, MetricSample, MetricType};

pub mod daily;
pub use daily::{accumulate, build_daily_table, DailyMetricTable};

// Geo path
pub mod routes;
pub use routes::{
    CellVisitIndex, FileIngest, IngestReport, RouteConfig, RouteFile, RouteIngestor, Trackpoint,
    WorkoutDateSource,
};

pub mod visitation;
pub use visitation::{
    project, project_all, project_sparse, CumulativeVisits, Snapshot, SparseSnapshotSeries,
    VisitationSnapshotSeries,
};

// Orchestration
pub mod pipeline;
pub use pipeline::{
    run_pipeline, run_pipeline_from_dir, PipelineConfig, PipelineOutput, SnapshotMode, VisitationSeries,
};

// ============================================================================
// Core Types
// ============================================================================

/// Half-open range of calendar days `[start, end)`.
///
/// # Example
/// ```
/// use activity_atlas::DateWindow;
/// use chrono::NaiveDate;
///
/// let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
/// let window = DateWindow::new(start, end).unwrap();
/// assert!(window.contains(start));
/// assert!(!window.contains(end));
/// assert_eq!(window.num_days(), 730);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "WindowBounds"))]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

/// Unchecked bounds, validated through [`DateWindow::new`] on deserialize.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct WindowBounds {
    start: NaiveDate,
    end: NaiveDate,
}

#[cfg(feature = "serde")]
impl TryFrom<WindowBounds> for DateWindow {
    type Error = String;

    fn try_from(bounds: WindowBounds) -> Result<Self, Self::Error> {
        DateWindow::new(bounds.start, bounds.end)
            .ok_or_else(|| format!("window end {} is before start {}", bounds.end, bounds.start))
    }
}

impl DateWindow {
    /// Create a window. Returns `None` if `end` is before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Smallest window containing every day from `first` to `last` inclusive.
    pub fn covering(first: NaiveDate, last: NaiveDate) -> Self {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        Self {
            start: first,
            end: last.checked_add_days(Days::new(1)).unwrap_or(last),
        }
    }

    /// First day in the window (inclusive).
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day after the window (exclusive).
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every day in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let window = DateWindow::new(date("2022-01-01"), date("2022-01-05")).unwrap();
        assert!(window.contains(date("2022-01-01")));
        assert!(window.contains(date("2022-01-04")));
        assert!(!window.contains(date("2022-01-05")));
        assert!(!window.contains(date("2021-12-31")));
        assert_eq!(window.num_days(), 4);
        assert_eq!(window.days().count(), 4);
        assert_eq!(window.days().last(), Some(date("2022-01-04")));
    }

    #[test]
    fn test_window_rejects_reversed_bounds() {
        assert!(DateWindow::new(date("2022-01-05"), date("2022-01-01")).is_none());
        let empty = DateWindow::new(date("2022-01-05"), date("2022-01-05")).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.days().count(), 0);
    }

    #[test]
    fn test_covering_includes_last_day() {
        let window = DateWindow::covering(date("2022-03-10"), date("2022-03-01"));
        assert_eq!(window.start(), date("2022-03-01"));
        assert_eq!(window.end(), date("2022-03-11"));
        assert!(window.contains(date("2022-03-10")));
        assert_eq!(window.to_string(), "[2022-03-01, 2022-03-11)");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_window_deserialize_validates_bounds() {
        let window = DateWindow::new(date("2022-01-01"), date("2022-01-05")).unwrap();
        let json = serde_json::to_string(&window).unwrap();
        assert_eq!(serde_json::from_str::<DateWindow>(&json).unwrap(), window);

        let reversed = r#"{"start":"2022-01-05","end":"2022-01-01"}"#;
        let err = serde_json::from_str::<DateWindow>(reversed).unwrap_err();
        assert!(err.to_string().contains("before start"));
    }
}
