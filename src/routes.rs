//! # Route Ingestion
//!
//! Builds a sparse index of grid cells to the days they were visited from a
//! set of per-workout GPX route files.
//!
//! Each file is parsed with a streaming XML reader, every trackpoint is
//! quantized onto the grid, and the workout's date is added to the visited
//! set of each retained cell. Files are independent: each produces its own
//! partial [`CellVisitIndex`], and partial indices merge by set union, so the
//! merged index is the same whatever order (or thread) files are ingested in.
//!
//! ## Failure policy
//! - A trackpoint with an unparsable coordinate or elevation is dropped and
//!   counted; the rest of the file is still used.
//! - A file that cannot be opened, is not well-formed GPX, or has no usable
//!   workout date is reported in [`IngestReport::failed`]; other files still
//!   complete.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, info, warn};
use xml::reader::{ParserConfig, XmlEvent};

use crate::error::RouteError;
use crate::quantize::{BoundingRegion, GeoCell, Quantizer, DEFAULT_PRECISION};
use crate::DateWindow;

/// Extension of route files picked up from a directory.
const ROUTE_EXTENSION: &str = "gpx";

/// Length of an ISO `YYYY-MM-DD` date.
const ISO_DATE_LEN: usize = 10;

/// Where a workout's date is taken from when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkoutDateSource {
    /// Date embedded in the file name (`route_2022-01-03_7.41pm.gpx`), which
    /// is the local calendar day. Falls back to the metadata timestamp.
    #[default]
    FileNameFirst,
    /// `<metadata><time>` (UTC), falling back to the file name.
    MetadataFirst,
}

/// Configuration for route ingestion.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Decimal digits kept per axis. Default: 4
    pub precision: u32,
    /// Keep only cells inside this box (inclusive).
    pub region: Option<BoundingRegion>,
    /// Keep only workouts dated inside this window (half-open).
    pub window: Option<DateWindow>,
    /// Preferred source for the workout date.
    pub date_source: WorkoutDateSource,
    /// Treat any failed file as fatal for a pipeline run.
    /// Default: false (failed files are reported, the rest is kept)
    pub strict: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            region: None,
            window: None,
            date_source: WorkoutDateSource::default(),
            strict: false,
        }
    }
}

// ============================================================================
// Visit Index
// ============================================================================

/// Grid cell to the set of distinct days it was visited.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "Vec<(GeoCell, BTreeSet<NaiveDate>)>", from = "Vec<(GeoCell, BTreeSet<NaiveDate>)>")
)]
pub struct CellVisitIndex {
    cells: HashMap<GeoCell, BTreeSet<NaiveDate>>,
}

impl CellVisitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit. Returns false if the cell already had this date.
    pub fn insert(&mut self, cell: GeoCell, date: NaiveDate) -> bool {
        self.cells.entry(cell).or_default().insert(date)
    }

    /// Union another index into this one.
    pub fn merge(&mut self, other: CellVisitIndex) {
        if self.cells.is_empty() {
            self.cells = other.cells;
            return;
        }
        for (cell, dates) in other.cells {
            self.cells.entry(cell).or_default().extend(dates);
        }
    }

    /// Visited days of one cell, in order.
    pub fn visits(&self, cell: &GeoCell) -> Option<&BTreeSet<NaiveDate>> {
        self.cells.get(cell)
    }

    /// Number of distinct days a cell was visited.
    pub fn visit_count(&self, cell: &GeoCell) -> usize {
        self.cells.get(cell).map_or(0, BTreeSet::len)
    }

    pub fn first_visit(&self, cell: &GeoCell) -> Option<NaiveDate> {
        self.cells.get(cell)?.first().copied()
    }

    pub fn last_visit(&self, cell: &GeoCell) -> Option<NaiveDate> {
        self.cells.get(cell)?.last().copied()
    }

    /// Earliest and latest visit over all cells.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.cells.values().filter_map(|d| d.first()).min()?;
        let last = self.cells.values().filter_map(|d| d.last()).max()?;
        Some((*first, *last))
    }

    /// Number of visited cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of visited-day counts over all cells.
    pub fn total_visits(&self) -> usize {
        self.cells.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GeoCell, &BTreeSet<NaiveDate>)> {
        self.cells.iter()
    }
}

impl From<CellVisitIndex> for Vec<(GeoCell, BTreeSet<NaiveDate>)> {
    fn from(index: CellVisitIndex) -> Self {
        let mut entries: Vec<_> = index.cells.into_iter().collect();
        entries.sort_by_key(|(cell, _)| *cell);
        entries
    }
}

impl From<Vec<(GeoCell, BTreeSet<NaiveDate>)>> for CellVisitIndex {
    fn from(entries: Vec<(GeoCell, BTreeSet<NaiveDate>)>) -> Self {
        let mut index = Self::new();
        for (cell, dates) in entries {
            index.cells.entry(cell).or_default().extend(dates);
        }
        index
    }
}

// ============================================================================
// GPX Parsing
// ============================================================================

/// A parsed trackpoint. Elevation is kept for consumers but unused here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trackpoint {
    pub lon: f64,
    pub lat: f64,
    pub elevation: f64,
}

/// One workout route with its well-formed trackpoints.
#[derive(Debug, Clone)]
pub struct RouteFile {
    pub name: String,
    pub date: NaiveDate,
    pub points: Vec<Trackpoint>,
    /// Trackpoints dropped for an unparsable coordinate or elevation
    pub malformed_points: usize,
}

/// Trackpoint fields as read, before validation.
#[derive(Debug, Default)]
struct RawTrackpoint {
    lon: Option<String>,
    lat: Option<String>,
    elevation: Option<String>,
}

impl RawTrackpoint {
    fn validate(&self) -> Result<Trackpoint, String> {
        let number = |name: &str, raw: &Option<String>| -> Result<f64, String> {
            let raw = raw.as_deref().map(str::trim).filter(|r| !r.is_empty());
            let raw = raw.ok_or_else(|| format!("missing {}", name))?;
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ => Err(format!("bad {} {:?}", name, raw)),
            }
        };
        let lon = number("lon", &self.lon)?;
        let lat = number("lat", &self.lat)?;
        let elevation = number("elevation", &self.elevation)?;
        Ok(Trackpoint { lon, lat, elevation })
    }
}

/// Parse a GPX route and resolve its workout date.
pub fn parse_route<R: Read>(
    name: &str,
    reader: R,
    date_source: WorkoutDateSource,
) -> Result<RouteFile, RouteError> {
    let parser = ParserConfig::new()
        .trim_whitespace(true)
        .create_reader(BufReader::new(reader));

    let mut path: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut metadata_time: Option<String> = None;
    let mut current: Option<RawTrackpoint> = None;
    let mut points = Vec::new();
    let mut malformed_points = 0;

    for event in parser {
        let event = event.map_err(|e| RouteError::unreadable(name, e.to_string()))?;
        match event {
            XmlEvent::StartElement { name: tag, attributes, .. } => {
                let tag = tag.local_name;
                if !seen_root {
                    if tag != "gpx" {
                        return Err(RouteError::unreadable(name, format!("expected <gpx> root, found <{}>", tag)));
                    }
                    seen_root = true;
                }
                if tag == "trkpt" {
                    let mut raw = RawTrackpoint::default();
                    for attr in attributes {
                        match attr.name.local_name.as_str() {
                            "lon" => raw.lon = Some(attr.value),
                            "lat" => raw.lat = Some(attr.value),
                            _ => {}
                        }
                    }
                    current = Some(raw);
                }
                path.push(tag);
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                match path_tail(&path) {
                    ["metadata", "time"] if metadata_time.is_none() => metadata_time = Some(text),
                    ["trkpt", "ele"] => {
                        if let Some(raw) = current.as_mut() {
                            raw.elevation.get_or_insert_with(String::new).push_str(&text);
                        }
                    }
                    _ => {}
                }
            }
            XmlEvent::EndElement { .. } => {
                if path.pop().as_deref() == Some("trkpt") {
                    if let Some(raw) = current.take() {
                        match raw.validate() {
                            Ok(point) => points.push(point),
                            Err(reason) => {
                                malformed_points += 1;
                                warn!("[Routes] {}: dropping trackpoint {}: {}", name, points.len() + malformed_points, reason);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let date = resolve_date(name, metadata_time.as_deref(), date_source)
        .ok_or_else(|| RouteError::unreadable(name, "no workout date in metadata or file name"))?;

    Ok(RouteFile {
        name: name.to_string(),
        date,
        points,
        malformed_points,
    })
}

fn path_tail(path: &[String]) -> [&str; 2] {
    match path {
        [.., parent, child] => [parent.as_str(), child.as_str()],
        [only] => ["", only.as_str()],
        [] => ["", ""],
    }
}

fn resolve_date(name: &str, metadata_time: Option<&str>, source: WorkoutDateSource) -> Option<NaiveDate> {
    let from_metadata = || metadata_time.and_then(|t| t.trim().get(..ISO_DATE_LEN)?.parse().ok());
    match source {
        WorkoutDateSource::FileNameFirst => date_from_file_name(name).or_else(from_metadata),
        WorkoutDateSource::MetadataFirst => from_metadata().or_else(|| date_from_file_name(name)),
    }
}

/// First `YYYY-MM-DD` run inside a file name.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let bytes = name.as_bytes();
    (0..bytes.len().saturating_sub(ISO_DATE_LEN - 1))
        .filter(|&i| bytes[i].is_ascii_digit())
        .filter_map(|i| name.get(i..i + ISO_DATE_LEN))
        .find_map(|s| s.parse::<NaiveDate>().ok())
}

// ============================================================================
// Ingestion
// ============================================================================

/// Statistics for one ingested file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileIngest {
    pub file: String,
    pub date: NaiveDate,
    /// Well-formed trackpoints in the file
    pub points: usize,
    /// Points that made it into the index
    pub retained: usize,
    /// Malformed trackpoints dropped while parsing
    pub dropped_points: usize,
    /// Points whose cell fell outside the region
    pub out_of_region: usize,
    /// Whole workout skipped because its date is outside the window
    pub out_of_window: bool,
    /// Distinct cells this file touched
    pub cells: usize,
}

/// Result of ingesting many route files.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub index: CellVisitIndex,
    /// Per-file statistics, in input order
    pub files: Vec<FileIngest>,
    /// Files that could not be ingested
    pub failed: Vec<(String, RouteError)>,
}

impl IngestReport {
    pub fn dropped_points(&self) -> usize {
        self.files.iter().map(|f| f.dropped_points).sum()
    }

    pub fn failed_files(&self) -> Vec<String> {
        self.failed.iter().map(|(file, _)| file.clone()).collect()
    }
}

/// Quantizes route files into a [`CellVisitIndex`].
#[derive(Debug, Clone)]
pub struct RouteIngestor {
    config: RouteConfig,
    quantizer: Quantizer,
}

impl Default for RouteIngestor {
    fn default() -> Self {
        Self::new(RouteConfig::default())
    }
}

impl RouteIngestor {
    pub fn new(config: RouteConfig) -> Self {
        let quantizer = Quantizer::new(config.precision);
        Self { config, quantizer }
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Add one parsed route to a fresh partial index.
    pub fn ingest_route(&self, route: &RouteFile) -> (CellVisitIndex, FileIngest) {
        let mut index = CellVisitIndex::new();
        let mut stats = FileIngest {
            file: route.name.clone(),
            date: route.date,
            points: route.points.len(),
            retained: 0,
            dropped_points: route.malformed_points,
            out_of_region: 0,
            out_of_window: false,
            cells: 0,
        };

        if let Some(window) = &self.config.window {
            if !window.contains(route.date) {
                debug!("[Routes] {}: {} outside window {}, skipping", route.name, route.date, window);
                stats.out_of_window = true;
                return (index, stats);
            }
        }

        for point in &route.points {
            let cell = self.quantizer.quantize(point.lon, point.lat);
            if let Some(region) = &self.config.region {
                if !region.contains(&cell) {
                    stats.out_of_region += 1;
                    continue;
                }
            }
            index.insert(cell, route.date);
            stats.retained += 1;
        }

        if stats.out_of_region > 0 {
            debug!("[Routes] {}: {} points outside region", route.name, stats.out_of_region);
        }
        stats.cells = index.len();
        (index, stats)
    }

    /// Parse and ingest a route from any reader.
    pub fn ingest_reader<R: Read>(&self, name: &str, reader: R) -> Result<(CellVisitIndex, FileIngest), RouteError> {
        let route = parse_route(name, reader, self.config.date_source)?;
        Ok(self.ingest_route(&route))
    }

    /// Parse and ingest a route file.
    pub fn ingest_file(&self, path: &Path) -> Result<(CellVisitIndex, FileIngest), RouteError> {
        let name = file_label(path);
        let file = File::open(path).map_err(|e| RouteError::unreadable(&name, format!("cannot open: {}", e)))?;
        self.ingest_reader(&name, file)
    }

    /// Ingest files one after another.
    pub fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> IngestReport {
        let start = std::time::Instant::now();
        let results = paths
            .iter()
            .map(|p| (file_label(p.as_ref()), self.ingest_file(p.as_ref())));
        let report = collect_report(results);
        log_summary(&report, start.elapsed());
        report
    }

    /// Ingest files in parallel, merging partial indices at the end.
    ///
    /// Produces the same index as [`RouteIngestor::ingest_files`].
    #[cfg(feature = "parallel")]
    pub fn ingest_files_parallel<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> IngestReport {
        use rayon::prelude::*;

        let start = std::time::Instant::now();
        info!("[Routes] Using PARALLEL ingestion (rayon) for {} files", paths.len());
        let results: Vec<_> = paths
            .par_iter()
            .map(|p| (file_label(p.as_ref()), self.ingest_file(p.as_ref())))
            .collect();
        let report = collect_report(results);
        log_summary(&report, start.elapsed());
        report
    }

    /// Route files in a directory, sorted by name.
    pub fn list_route_files(dir: &Path) -> Result<Vec<PathBuf>, RouteError> {
        let io_err = |source| RouteError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_route = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(ROUTE_EXTENSION));
            if path.is_file() && is_route {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Ingest every route file in a directory.
    pub fn ingest_dir(&self, dir: &Path) -> Result<IngestReport, RouteError> {
        let files = Self::list_route_files(dir)?;
        #[cfg(feature = "parallel")]
        let report = self.ingest_files_parallel(&files);
        #[cfg(not(feature = "parallel"))]
        let report = self.ingest_files(&files);
        Ok(report)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Merge per-file results in input order. The merged index is the only
/// structure written here.
fn collect_report<I>(results: I) -> IngestReport
where
    I: IntoIterator<Item = (String, Result<(CellVisitIndex, FileIngest), RouteError>)>,
{
    let mut report = IngestReport::default();
    for (file, result) in results {
        match result {
            Ok((partial, stats)) => {
                report.index.merge(partial);
                info!("[Routes] {}\tTotal cells: {}", file, report.index.len());
                report.files.push(stats);
            }
            Err(e) => {
                warn!("[Routes] {}", e);
                report.failed.push((file, e));
            }
        }
    }
    report
}

fn log_summary(report: &IngestReport, elapsed: std::time::Duration) {
    info!(
        "[Routes] Ingested {} files ({} failed, {} points dropped): {} cells, {} visits in {:?}",
        report.files.len(),
        report.failed.len(),
        report.dropped_points(),
        report.index.len(),
        report.index.total_visits(),
        elapsed
    );
}
