//! Per-metric, per-day sums of extracted samples.

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::NaiveDate;
use log::info;

use crate::error::ExtractError;
use crate::metrics::{ExtractorConfig, MetricExtractor, MetricSample, MetricType};

/// Daily totals for each metric type.
///
/// An entry exists only for days with at least one sample, and its value is
/// the sum of every sample sharing the (metric, date) key.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DailyMetricTable {
    tables: BTreeMap<MetricType, BTreeMap<NaiveDate, f64>>,
}

impl DailyMetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample's value to its (metric, date) total.
    pub fn accumulate(&mut self, sample: &MetricSample) {
        *self
            .tables
            .entry(sample.metric)
            .or_default()
            .entry(sample.date)
            .or_insert(0.0) += sample.value;
    }

    /// Total for one metric on one day.
    pub fn get(&self, metric: MetricType, date: NaiveDate) -> Option<f64> {
        self.tables.get(&metric)?.get(&date).copied()
    }

    /// All daily totals of one metric, ordered by date.
    pub fn series(&self, metric: MetricType) -> Option<&BTreeMap<NaiveDate, f64>> {
        self.tables.get(&metric)
    }

    /// Sum over every day of one metric.
    pub fn total(&self, metric: MetricType) -> f64 {
        self.series(metric).map_or(0.0, |s| s.values().sum())
    }

    /// Metric types with at least one sample.
    pub fn metrics(&self) -> impl Iterator<Item = MetricType> + '_ {
        self.tables.keys().copied()
    }

    /// Number of (metric, date) entries.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Fold another partial table into this one.
    pub fn merge(&mut self, other: DailyMetricTable) {
        for (metric, days) in other.tables {
            let target = self.tables.entry(metric).or_default();
            for (date, value) in days {
                *target.entry(date).or_insert(0.0) += value;
            }
        }
    }
}

/// Add `sample` into `table`.
pub fn accumulate(table: &mut DailyMetricTable, sample: &MetricSample) {
    table.accumulate(sample);
}

impl Extend<MetricSample> for DailyMetricTable {
    fn extend<I: IntoIterator<Item = MetricSample>>(&mut self, iter: I) {
        for sample in iter {
            self.accumulate(&sample);
        }
    }
}

impl FromIterator<MetricSample> for DailyMetricTable {
    fn from_iter<I: IntoIterator<Item = MetricSample>>(iter: I) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}

/// Extract every sample from `reader` and sum it into a fresh table.
///
/// In strict mode the first malformed record aborts the pass and no table is
/// returned.
pub fn build_daily_table<R: BufRead>(
    reader: R,
    config: &ExtractorConfig,
) -> Result<DailyMetricTable, ExtractError> {
    let start = std::time::Instant::now();
    let mut table = DailyMetricTable::new();
    for sample in MetricExtractor::new(reader, config) {
        table.accumulate(&sample?);
    }
    info!(
        "[Metrics] Daily table: {} entries across {} metrics in {:?}",
        table.len(),
        table.tables.len(),
        start.elapsed()
    );
    Ok(table)
}
