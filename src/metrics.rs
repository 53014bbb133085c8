//! # Metric Extraction
//!
//! Streams typed samples out of a health export record stream without building
//! a parse tree. Each line holds at most one record; a record is recognised by
//! a metric marker (the HealthKit quantity type identifier) and its date and
//! value are cut out of the `startDate=` and `value=` attributes.
//!
//! ```text
//! <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" ... startDate="2022-01-01 08:10:00 -0800" ... value="0.52"/>
//! ```
//!
//! Lines carrying an excluded marker (workout summaries that would double
//! count) are skipped before metric matching, and lines with no metric marker
//! at all (XML prolog, closing tags) are ignored.
//!
//! A record that matches a metric but whose date or value cannot be parsed
//! ends the pass in strict mode. The error carries the 1-based record index.

use std::io::{BufRead, Lines};

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::error::{ExtractError, RecordField};

/// Marker preceding the record's start date.
pub const START_DATE_MARKER: &str = "startDate=";

/// Marker preceding the record's numeric value.
pub const VALUE_MARKER: &str = "value=";

/// Records between progress log lines.
const PROGRESS_INTERVAL: usize = 10_000;

/// Length of an ISO `YYYY-MM-DD` date.
const ISO_DATE_LEN: usize = 10;

/// Kind of quantity a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricType {
    /// Active energy burned (kcal)
    Energy,
    /// Distance walked or run (km)
    Distance,
    /// Time spent standing (min)
    StandTime,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Energy, MetricType::Distance, MetricType::StandTime];

    /// HealthKit identifier that marks records of this type.
    pub fn default_marker(&self) -> &'static str {
        match self {
            MetricType::Energy => "HKQuantityTypeIdentifierActiveEnergyBurned",
            MetricType::Distance => "HKQuantityTypeIdentifierDistanceWalkingRunning",
            MetricType::StandTime => "HKQuantityTypeIdentifierAppleStandTime",
        }
    }

    /// Short name used as a key by downstream consumers.
    pub fn name(&self) -> &'static str {
        match self {
            MetricType::Energy => "energy",
            MetricType::Distance => "distance",
            MetricType::StandTime => "stand",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One dated quantity extracted from a record.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricSample {
    pub metric: MetricType,
    pub date: NaiveDate,
    pub value: f64,
}

impl MetricSample {
    pub fn new(metric: MetricType, date: NaiveDate, value: f64) -> Self {
        Self { metric, date, value }
    }
}

/// Configuration for metric extraction.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Substring identifying each metric type in a record line.
    /// Checked in order; the first match wins.
    pub metric_markers: Vec<(MetricType, String)>,
    /// Lines containing any of these are skipped entirely.
    pub excluded_markers: Vec<String>,
    /// Stop at the first malformed record (true) or skip and count it (false).
    /// Default: true
    pub strict: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            metric_markers: MetricType::ALL
                .iter()
                .map(|m| (*m, m.default_marker().to_string()))
                .collect(),
            excluded_markers: vec!["WorkoutStatistics".to_string()],
            strict: true,
        }
    }
}

impl ExtractorConfig {
    /// Default markers, skipping malformed records instead of failing.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    fn is_excluded(&self, line: &str) -> bool {
        self.excluded_markers.iter().any(|m| line.contains(m.as_str()))
    }

    fn match_metric(&self, line: &str) -> Option<MetricType> {
        let mut matches = self
            .metric_markers
            .iter()
            .filter(|(_, marker)| line.contains(marker.as_str()))
            .map(|(metric, _)| *metric);
        let first = matches.next()?;
        if let Some(other) = matches.next() {
            debug!("[Metrics] Record matches both {} and {}, using {}", first, other, first);
        }
        Some(first)
    }
}

/// Why a single record failed to parse.
pub type FieldError = (RecordField, String);

/// Parse one record line.
///
/// Returns `Ok(None)` for excluded lines and lines that name no metric.
pub fn parse_record(line: &str, config: &ExtractorConfig) -> Result<Option<MetricSample>, FieldError> {
    if config.is_excluded(line) {
        return Ok(None);
    }
    let Some(metric) = config.match_metric(line) else {
        return Ok(None);
    };

    let date = parse_start_date(line)?;
    let value = parse_value(line)?;
    Ok(Some(MetricSample::new(metric, date, value)))
}

fn parse_start_date(line: &str) -> Result<NaiveDate, FieldError> {
    let field = |reason: String| (RecordField::StartDate, reason);

    let rest = after_marker(line, START_DATE_MARKER).ok_or_else(|| field("marker missing".to_string()))?;
    let rest = rest.strip_prefix(&['"', '\''][..]).unwrap_or(rest);
    let text = rest
        .get(..ISO_DATE_LEN)
        .ok_or_else(|| field(format!("too short: {:?}", rest)))?;
    text.parse::<NaiveDate>()
        .map_err(|e| field(format!("{:?}: {}", text, e)))
}

fn parse_value(line: &str) -> Result<f64, FieldError> {
    let field = |reason: String| (RecordField::Value, reason);

    let rest = after_marker(line, VALUE_MARKER).ok_or_else(|| field("marker missing".to_string()))?;
    let literal = match rest.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &rest[1..];
            let end = inner
                .find(quote)
                .ok_or_else(|| field("unterminated literal".to_string()))?;
            &inner[..end]
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
                .unwrap_or(rest.len());
            &rest[..end]
        }
    };
    let value = literal
        .trim()
        .parse::<f64>()
        .map_err(|e| field(format!("{:?}: {}", literal, e)))?;
    if !value.is_finite() {
        return Err(field(format!("{:?}: not a finite number", literal)));
    }
    Ok(value)
}

fn after_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}

/// Streaming, single-pass extractor over a record stream.
///
/// Yields one sample per matching record. After a fatal error the iterator
/// is exhausted.
pub struct MetricExtractor<R> {
    lines: Lines<R>,
    config: ExtractorConfig,
    record: usize,
    samples: usize,
    skipped: usize,
    finished: bool,
}

impl<R: BufRead> MetricExtractor<R> {
    pub fn new(reader: R, config: &ExtractorConfig) -> Self {
        Self {
            lines: reader.lines(),
            config: config.clone(),
            record: 0,
            samples: 0,
            skipped: 0,
            finished: false,
        }
    }

    /// Records read so far.
    pub fn records_read(&self) -> usize {
        self.record
    }

    /// Samples produced so far.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Malformed records skipped in lenient mode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn finish(&mut self) {
        self.finished = true;
        info!(
            "[Metrics] Read {} records: {} samples, {} skipped",
            self.record, self.samples, self.skipped
        );
    }
}

impl<R: BufRead> Iterator for MetricExtractor<R> {
    type Item = Result<MetricSample, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next() {
                None => {
                    self.finish();
                    return None;
                }
                Some(Err(source)) => {
                    self.finished = true;
                    return Some(Err(ExtractError::Io {
                        record: self.record + 1,
                        source,
                    }));
                }
                Some(Ok(line)) => line,
            };

            self.record += 1;
            if self.record % PROGRESS_INTERVAL == 0 {
                debug!("[Metrics] Records read: {}", self.record);
            }

            match parse_record(&line, &self.config) {
                Ok(Some(sample)) => {
                    self.samples += 1;
                    return Some(Ok(sample));
                }
                Ok(None) => {}
                Err((field, reason)) if self.config.strict => {
                    self.finished = true;
                    warn!("[Metrics] Halting at record {}: bad {} ({})", self.record, field, reason);
                    return Some(Err(ExtractError::MalformedRecord {
                        record: self.record,
                        field,
                        reason,
                    }));
                }
                Err((field, reason)) => {
                    self.skipped += 1;
                    warn!("[Metrics] Skipping record {}: bad {} ({})", self.record, field, reason);
                }
            }
        }
        None
    }
}
