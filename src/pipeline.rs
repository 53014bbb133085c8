//! One end-to-end run over an export: the metric path and the geo path.
//!
//! The two paths share no state. With the `parallel` feature they run on
//! separate rayon workers and their results are joined at the end; either
//! path failing fails the run and nothing is returned.

use std::io::BufRead;
use std::path::Path;

use chrono::NaiveDate;
use log::info;

use crate::daily::{build_daily_table, DailyMetricTable};
use crate::error::{PipelineError, Result};
use crate::metrics::ExtractorConfig;
use crate::routes::{IngestReport, RouteConfig, RouteIngestor};
use crate::quantize::GeoCell;
use crate::visitation::{project, project_sparse, SparseSnapshotSeries, VisitationSnapshotSeries};
use crate::DateWindow;

/// How the visitation series of a run is materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// One snapshot per day of the window.
    #[default]
    Dense,
    /// Snapshots on change days only, forward-filled on lookup.
    Sparse,
}

/// Configuration for a full run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub extractor: ExtractorConfig,
    pub routes: RouteConfig,
    /// Window for the visitation series. Falls back to the route window,
    /// then to the span of visited days.
    pub projection_window: Option<DateWindow>,
    /// Dense by default. Sparse keeps long windows cheap.
    pub snapshot_mode: SnapshotMode,
}

impl PipelineConfig {
    fn resolve_projection_window(&self, report: &IngestReport) -> Option<DateWindow> {
        self.projection_window.or(self.routes.window).or_else(|| {
            report
                .index
                .date_span()
                .map(|(first, last)| DateWindow::covering(first, last))
        })
    }
}

/// Everything a run hands to downstream consumers.
#[derive(Debug)]
pub struct PipelineOutput {
    pub daily: DailyMetricTable,
    pub routes: IngestReport,
    /// `None` when no cell was visited and no window was configured
    pub snapshots: Option<VisitationSeries>,
}

/// Visitation series in the representation picked by [`SnapshotMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum VisitationSeries {
    Dense(VisitationSnapshotSeries),
    Sparse(SparseSnapshotSeries),
}

impl VisitationSeries {
    pub fn window(&self) -> DateWindow {
        match self {
            Self::Dense(series) => series.window(),
            Self::Sparse(series) => series.window(),
        }
    }

    /// Cumulative visit count of a cell on a day (0 outside the window).
    pub fn count(&self, date: NaiveDate, cell: &GeoCell) -> u32 {
        match self {
            Self::Dense(series) => series.count(date, cell),
            Self::Sparse(series) => series.count(date, cell),
        }
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(series) => series.len(),
            Self::Sparse(series) => series.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_dense(&self) -> Option<&VisitationSnapshotSeries> {
        match self {
            Self::Dense(series) => Some(series),
            Self::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseSnapshotSeries> {
        match self {
            Self::Sparse(series) => Some(series),
            Self::Dense(_) => None,
        }
    }

    /// Dense form, expanding a sparse series day by day.
    pub fn into_dense(self) -> VisitationSnapshotSeries {
        match self {
            Self::Dense(series) => series,
            Self::Sparse(series) => series.densify(),
        }
    }
}

/// Run both pipelines over a record stream and a list of route files.
pub fn run_pipeline<R, P>(records: R, route_files: &[P], config: &PipelineConfig) -> Result<PipelineOutput>
where
    R: BufRead + Send,
    P: AsRef<Path> + Sync,
{
    let start = std::time::Instant::now();
    let ingestor = RouteIngestor::new(config.routes.clone());

    #[cfg(feature = "parallel")]
    let (daily, geo) = rayon::join(
        || build_daily_table(records, &config.extractor),
        || geo_path(ingestor.ingest_files_parallel(route_files), config),
    );
    #[cfg(not(feature = "parallel"))]
    let (daily, geo) = (
        build_daily_table(records, &config.extractor),
        geo_path(ingestor.ingest_files(route_files), config),
    );

    let daily = daily?;
    let (routes, snapshots) = geo?;

    info!(
        "[Pipeline] Done in {:?}: {} daily entries, {} cells, {} snapshots",
        start.elapsed(),
        daily.len(),
        routes.index.len(),
        snapshots.as_ref().map_or(0, |s| s.len())
    );
    Ok(PipelineOutput {
        daily,
        routes,
        snapshots,
    })
}

/// Run both pipelines, taking every route file from a directory.
pub fn run_pipeline_from_dir<R>(records: R, routes_dir: &Path, config: &PipelineConfig) -> Result<PipelineOutput>
where
    R: BufRead + Send,
{
    let files = RouteIngestor::list_route_files(routes_dir)?;
    info!("[Pipeline] {} route files in {}", files.len(), routes_dir.display());
    run_pipeline(records, &files, config)
}

fn geo_path(
    report: IngestReport,
    config: &PipelineConfig,
) -> Result<(IngestReport, Option<VisitationSeries>)> {
    if config.routes.strict && !report.failed.is_empty() {
        return Err(PipelineError::RouteFiles(report.failed_files()));
    }
    let snapshots = config
        .resolve_projection_window(&report)
        .map(|window| match config.snapshot_mode {
            SnapshotMode::Dense => VisitationSeries::Dense(project(&report.index, window)),
            SnapshotMode::Sparse => VisitationSeries::Sparse(project_sparse(&report.index, window)),
        });
    Ok((report, snapshots))
}
