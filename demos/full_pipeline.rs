//! Running both pipelines over an export directory.
//!
//! Run with: cargo run --example full_pipeline --features parallel -- <export.xml> <workout-routes dir>

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

use activity_atlas::{
    run_pipeline_from_dir, BoundingRegion, DateWindow, MetricType, PipelineConfig, RouteConfig,
    SnapshotMode,
};
use chrono::NaiveDate;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: full_pipeline <export.xml> <workout-routes dir>");
        std::process::exit(2);
    }

    let records = match File::open(&args[1]) {
        Ok(file) => BufReader::new(file),
        Err(e) => {
            eprintln!("Cannot open {}: {}", args[1], e);
            std::process::exit(1);
        }
    };

    let window = NaiveDate::from_ymd_opt(2021, 1, 1)
        .zip(NaiveDate::from_ymd_opt(2023, 1, 1))
        .and_then(|(start, end)| DateWindow::new(start, end));

    let config = PipelineConfig {
        routes: RouteConfig {
            region: Some(BoundingRegion::san_francisco()),
            window,
            ..RouteConfig::default()
        },
        snapshot_mode: SnapshotMode::Sparse,
        ..PipelineConfig::default()
    };

    println!("Full Pipeline Example\n");
    let start = Instant::now();
    let output = match run_pipeline_from_dir(records, Path::new(&args[2]), &config) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Run failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("Completed in {:?}\n", start.elapsed());

    for metric in MetricType::ALL {
        println!("{:>9}: {} days, total {:.1}", metric, output.daily.series(metric).map_or(0, |s| s.len()), output.daily.total(metric));
    }

    let report = &output.routes;
    println!("\nRoutes: {} ingested, {} failed, {} points dropped", report.files.len(), report.failed.len(), report.dropped_points());
    for (file, error) in &report.failed {
        println!("  {}: {}", file, error);
    }
    println!("Cells: {}, cell-days: {}", report.index.len(), report.index.total_visits());

    if let Some(series) = output.snapshots.as_ref().and_then(|s| s.as_sparse()) {
        if let Some(last_day) = series.change_dates().last() {
            let last = series.at(last_day).map_or(0, |s| s.len());
            let busiest = series.at(last_day).and_then(|s| s.values().max().copied()).unwrap_or(0);
            println!("Series {}: {} change days, {} cells visited by {}, busiest cell {} days", series.window(), series.len(), last, last_day, busiest);
        }
    }
}
