//! # Visitation Projection
//!
//! Turns the sparse cell to visited-days index into per-day cumulative visit
//! counts for time-lapse rendering. For a window `[start, end)`, the count of
//! cell `c` on day `d` is the number of distinct visit days `v` of `c` with
//! `start <= v <= d`.
//!
//! ## Algorithm
//! Expanding every visit forward day by day costs
//! O(visits x remaining window length). Instead the visits inside the window
//! are flattened into one `(date, cell)` event stream sorted by date, and a
//! single sweep keeps one counter per cell that has been seen:
//!
//! - [`project`] emits the full counter map for every day in the window.
//! - [`project_sparse`] emits it only on days where some counter changed;
//!   readers forward-fill between those days.
//! - [`CumulativeVisits`] answers single (cell, day) queries by binary search
//!   over the cell's sorted visit days without materializing anything.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use log::info;

use crate::quantize::GeoCell;
use crate::routes::CellVisitIndex;
use crate::DateWindow;

/// Cumulative visit count per cell on one day. Cells not yet visited are absent.
pub type Snapshot = BTreeMap<GeoCell, u32>;

/// Serialized form of a snapshot series: each day with its (cell, count) pairs.
#[cfg(feature = "serde")]
type SeriesEntries = (DateWindow, Vec<(NaiveDate, Vec<(GeoCell, u32)>)>);

/// Visit events inside the window, ordered by date then cell.
fn window_events(index: &CellVisitIndex, window: DateWindow) -> Vec<(NaiveDate, GeoCell)> {
    let mut events: Vec<(NaiveDate, GeoCell)> = index
        .iter()
        .flat_map(|(cell, dates)| {
            dates
                .range(window.start()..window.end())
                .map(move |date| (*date, *cell))
        })
        .collect();
    events.sort_unstable();
    events
}

// ============================================================================
// Point Queries
// ============================================================================

/// Per-cell sorted visit days restricted to a window.
#[derive(Debug, Clone)]
pub struct CumulativeVisits {
    window: DateWindow,
    cells: HashMap<GeoCell, Vec<NaiveDate>>,
}

impl CumulativeVisits {
    pub fn new(index: &CellVisitIndex, window: DateWindow) -> Self {
        let cells = index
            .iter()
            .filter_map(|(cell, dates)| {
                let in_window: Vec<NaiveDate> = dates.range(window.start()..window.end()).copied().collect();
                (!in_window.is_empty()).then_some((*cell, in_window))
            })
            .collect();
        Self { window, cells }
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    /// Number of cells with at least one visit in the window.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Visit days of `cell` in the window on or before `date`.
    pub fn count_at(&self, cell: &GeoCell, date: NaiveDate) -> u32 {
        self.cells
            .get(cell)
            .map_or(0, |dates| dates.partition_point(|d| *d <= date) as u32)
    }

    /// Counts of every visited cell on `date`.
    pub fn snapshot_at(&self, date: NaiveDate) -> Snapshot {
        self.cells
            .iter()
            .filter_map(|(cell, dates)| {
                let count = dates.partition_point(|d| *d <= date) as u32;
                (count > 0).then_some((*cell, count))
            })
            .collect()
    }
}

// ============================================================================
// Dense Series
// ============================================================================

/// Cumulative snapshot for every day of a window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "SeriesEntries", from = "SeriesEntries")
)]
pub struct VisitationSnapshotSeries {
    window: DateWindow,
    days: BTreeMap<NaiveDate, Snapshot>,
}

impl VisitationSnapshotSeries {
    pub fn window(&self) -> DateWindow {
        self.window
    }

    /// Snapshot for a day, or `None` outside the window.
    pub fn get(&self, date: NaiveDate) -> Option<&Snapshot> {
        self.days.get(&date)
    }

    /// Cumulative count of `cell` on `date` (0 if unvisited or outside the window).
    pub fn count(&self, date: NaiveDate, cell: &GeoCell) -> u32 {
        self.days
            .get(&date)
            .and_then(|s| s.get(cell))
            .copied()
            .unwrap_or(0)
    }

    /// Highest count on a day, for colour normalisation.
    pub fn max_count(&self, date: NaiveDate) -> u32 {
        self.days
            .get(&date)
            .and_then(|s| s.values().max())
            .copied()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &Snapshot)> {
        self.days.iter()
    }

    /// Number of days in the series.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(feature = "serde")]
impl From<VisitationSnapshotSeries> for SeriesEntries {
    fn from(series: VisitationSnapshotSeries) -> Self {
        let days = series
            .days
            .into_iter()
            .map(|(date, snapshot)| (date, snapshot.into_iter().collect()))
            .collect();
        (series.window, days)
    }
}

#[cfg(feature = "serde")]
impl From<SeriesEntries> for VisitationSnapshotSeries {
    fn from((window, days): SeriesEntries) -> Self {
        Self {
            window,
            days: days
                .into_iter()
                .map(|(date, cells)| (date, cells.into_iter().collect()))
                .collect(),
        }
    }
}

/// Materialize the cumulative snapshot for every day of `window`.
///
/// One sweep over the date-sorted visit events; each day's snapshot is a copy
/// of the running counters after applying that day's events.
pub fn project(index: &CellVisitIndex, window: DateWindow) -> VisitationSnapshotSeries {
    let start = std::time::Instant::now();
    let events = window_events(index, window);
    let mut pending = events.iter().peekable();
    let mut counters = Snapshot::new();
    let mut days = BTreeMap::new();

    for day in window.days() {
        while let Some((_, cell)) = pending.next_if(|(date, _)| *date == day) {
            *counters.entry(*cell).or_insert(0) += 1;
        }
        days.insert(day, counters.clone());
    }

    info!(
        "[Visitation] Projected {} events onto {} cells over {} days in {:?}",
        events.len(),
        counters.len(),
        days.len(),
        start.elapsed()
    );
    VisitationSnapshotSeries { window, days }
}

/// Project over the index's own date span, first visit to last visit.
///
/// Returns `None` for an empty index.
pub fn project_all(index: &CellVisitIndex) -> Option<VisitationSnapshotSeries> {
    let (first, last) = index.date_span()?;
    Some(project(index, DateWindow::covering(first, last)))
}

// ============================================================================
// Sparse Series
// ============================================================================

/// Cumulative snapshots emitted only on days where a count changed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "SeriesEntries", from = "SeriesEntries")
)]
pub struct SparseSnapshotSeries {
    window: DateWindow,
    changes: BTreeMap<NaiveDate, Snapshot>,
}

impl SparseSnapshotSeries {
    pub fn window(&self) -> DateWindow {
        self.window
    }

    /// Days on which at least one count changed.
    pub fn change_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.changes.keys().copied()
    }

    /// Snapshot in effect on `date`: the latest emitted one on or before it.
    ///
    /// `None` before the first visit or outside the window.
    pub fn at(&self, date: NaiveDate) -> Option<&Snapshot> {
        if !self.window.contains(date) {
            return None;
        }
        self.changes.range(..=date).next_back().map(|(_, s)| s)
    }

    pub fn count(&self, date: NaiveDate, cell: &GeoCell) -> u32 {
        self.at(date).and_then(|s| s.get(cell)).copied().unwrap_or(0)
    }

    /// Number of emitted snapshots.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Forward-fill into a snapshot for every day of the window.
    pub fn densify(&self) -> VisitationSnapshotSeries {
        let mut current = Snapshot::new();
        let days = self
            .window
            .days()
            .map(|day| {
                if let Some(changed) = self.changes.get(&day) {
                    current = changed.clone();
                }
                (day, current.clone())
            })
            .collect();
        VisitationSnapshotSeries {
            window: self.window,
            days,
        }
    }
}

#[cfg(feature = "serde")]
impl From<SparseSnapshotSeries> for SeriesEntries {
    fn from(series: SparseSnapshotSeries) -> Self {
        VisitationSnapshotSeries {
            window: series.window,
            days: series.changes,
        }
        .into()
    }
}

#[cfg(feature = "serde")]
impl From<SeriesEntries> for SparseSnapshotSeries {
    fn from(entries: SeriesEntries) -> Self {
        let dense = VisitationSnapshotSeries::from(entries);
        Self {
            window: dense.window,
            changes: dense.days,
        }
    }
}

/// Emit a snapshot only on days where at least one visit falls.
pub fn project_sparse(index: &CellVisitIndex, window: DateWindow) -> SparseSnapshotSeries {
    let start = std::time::Instant::now();
    let events = window_events(index, window);
    let mut counters = Snapshot::new();
    let mut changes = BTreeMap::new();

    for chunk in events.chunk_by(|a, b| a.0 == b.0) {
        for (_, cell) in chunk {
            *counters.entry(*cell).or_insert(0) += 1;
        }
        changes.insert(chunk[0].0, counters.clone());
    }

    info!(
        "[Visitation] Sparse projection: {} snapshots for {} days in {:?}",
        changes.len(),
        window.num_days(),
        start.elapsed()
    );
    SparseSnapshotSeries { window, changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Quantizer;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn window(start: &str, end: &str) -> DateWindow {
        DateWindow::new(date(start), date(end)).unwrap()
    }

    /// Day-by-day forward expansion of every visit.
    fn naive_projection(index: &CellVisitIndex, window: DateWindow) -> BTreeMap<NaiveDate, Snapshot> {
        let mut days: BTreeMap<NaiveDate, Snapshot> = window.days().map(|d| (d, Snapshot::new())).collect();
        for (cell, dates) in index.iter() {
            for visit in dates.iter().filter(|d| window.contains(**d)) {
                for day in window.days().filter(|d| d >= visit) {
                    *days.get_mut(&day).unwrap().entry(*cell).or_insert(0) += 1;
                }
            }
        }
        days
    }

    fn sample_index() -> (CellVisitIndex, Vec<GeoCell>) {
        let q = Quantizer::default();
        let cells: Vec<GeoCell> = (0..6)
            .map(|i| q.quantize(-122.45 + 0.0003 * i as f64, 37.75 + 0.0002 * (i % 3) as f64))
            .collect();
        let mut index = CellVisitIndex::new();
        let mut day = date("2021-12-20");
        for step in 0..60u32 {
            let cell = cells[(step as usize * 7 + step as usize / 3) % cells.len()];
            index.insert(cell, day);
            if step % 4 != 0 {
                day = day.succ_opt().unwrap();
            }
        }
        (index, cells)
    }

    #[test]
    fn test_scenario_two_visits() {
        let cell = Quantizer::default().quantize(-122.4500, 37.7500);
        let mut index = CellVisitIndex::new();
        index.insert(cell, date("2022-01-01"));
        index.insert(cell, date("2022-01-03"));

        let series = project(&index, window("2022-01-01", "2022-01-05"));
        assert_eq!(series.len(), 4);
        assert_eq!(series.count(date("2022-01-01"), &cell), 1);
        assert_eq!(series.count(date("2022-01-02"), &cell), 1);
        assert_eq!(series.count(date("2022-01-03"), &cell), 2);
        assert_eq!(series.count(date("2022-01-04"), &cell), 2);
        assert!(series.get(date("2022-01-05")).is_none());
    }

    #[test]
    fn test_window_boundaries() {
        let cell = Quantizer::default().quantize(-122.45, 37.75);
        let mut index = CellVisitIndex::new();
        index.insert(cell, date("2021-12-31"));
        index.insert(cell, date("2022-01-01"));
        index.insert(cell, date("2022-01-05"));

        let w = window("2022-01-01", "2022-01-05");
        let series = project(&index, w);
        assert_eq!(series.count(date("2022-01-01"), &cell), 1);
        assert_eq!(series.count(date("2022-01-04"), &cell), 1);

        let visits = CumulativeVisits::new(&index, w);
        assert_eq!(visits.count_at(&cell, date("2022-01-05")), 1);
        assert_eq!(visits.count_at(&cell, date("2021-12-31")), 0);

        let sparse = project_sparse(&index, w);
        assert_eq!(sparse.change_dates().collect::<Vec<_>>(), vec![date("2022-01-01")]);
        assert!(sparse.at(date("2022-01-05")).is_none());
    }

    #[test]
    fn test_matches_naive_expansion() {
        let (index, _) = sample_index();
        let w = window("2021-12-25", "2022-02-01");
        let expected = naive_projection(&index, w);

        let dense = project(&index, w);
        let from_dense: BTreeMap<NaiveDate, Snapshot> = dense.iter().map(|(d, s)| (*d, s.clone())).collect();
        assert_eq!(from_dense, expected);

        let densified = project_sparse(&index, w).densify();
        assert_eq!(densified, dense);

        let visits = CumulativeVisits::new(&index, w);
        for (day, snapshot) in &expected {
            assert_eq!(&visits.snapshot_at(*day), snapshot);
        }
    }

    #[test]
    fn test_cumulative_definition() {
        let (index, cells) = sample_index();
        let w = window("2022-01-01", "2022-01-31");
        let series = project(&index, w);
        for day in w.days() {
            for cell in &cells {
                let expected = index
                    .visits(cell)
                    .map_or(0, |v| v.iter().filter(|d| **d >= w.start() && **d <= day).count());
                assert_eq!(series.count(day, cell) as usize, expected, "{} {}", day, cell);
            }
        }
    }

    #[test]
    fn test_sparse_emits_only_change_days() {
        let q = Quantizer::default();
        let a = q.quantize(-122.45, 37.75);
        let b = q.quantize(-122.44, 37.76);
        let mut index = CellVisitIndex::new();
        index.insert(a, date("2022-01-02"));
        index.insert(b, date("2022-01-02"));
        index.insert(a, date("2022-01-06"));

        let sparse = project_sparse(&index, window("2022-01-01", "2022-01-10"));
        assert_eq!(sparse.len(), 2);
        assert!(sparse.at(date("2022-01-01")).is_none());
        assert_eq!(sparse.count(date("2022-01-04"), &a), 1);
        assert_eq!(sparse.count(date("2022-01-04"), &b), 1);
        assert_eq!(sparse.count(date("2022-01-09"), &a), 2);
        assert_eq!(sparse.at(date("2022-01-09")).map(|s| s.len()), Some(2));

        let dense = sparse.densify();
        assert_eq!(dense.len(), 9);
        assert_eq!(dense.max_count(date("2022-01-07")), 2);
        assert_eq!(dense.max_count(date("2022-01-01")), 0);
    }

    #[test]
    fn test_project_all_covers_span() {
        assert!(project_all(&CellVisitIndex::new()).is_none());

        let cell = Quantizer::default().quantize(-122.45, 37.75);
        let mut index = CellVisitIndex::new();
        index.insert(cell, date("2022-05-01"));
        index.insert(cell, date("2022-05-10"));

        let series = project_all(&index).unwrap();
        assert_eq!(series.window(), window("2022-05-01", "2022-05-11"));
        assert_eq!(series.count(date("2022-05-10"), &cell), 2);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_series_serde_round_trip() {
        let (index, _) = sample_index();
        let w = window("2022-01-01", "2022-01-08");

        let dense = project(&index, w);
        let json = serde_json::to_string(&dense).unwrap();
        assert_eq!(serde_json::from_str::<VisitationSnapshotSeries>(&json).unwrap(), dense);

        let sparse = project_sparse(&index, w);
        let json = serde_json::to_string(&sparse).unwrap();
        assert_eq!(serde_json::from_str::<SparseSnapshotSeries>(&json).unwrap(), sparse);
    }
}
