//! End-to-end runs over a small synthetic export.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use activity_atlas::{
    run_pipeline_from_dir, BoundingRegion, DateWindow, ExtractError, ExtractorConfig, MetricType,
    PipelineConfig, PipelineError, Quantizer, RouteConfig,
};
use chrono::NaiveDate;
use tempfile::TempDir;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn export_xml() -> String {
    let lines = [
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<HealthData locale="en_US">"#,
        r#" <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" sourceName="Watch" unit="kcal" creationDate="2022-01-01 09:00:00 -0800" startDate="2022-01-01 08:10:00 -0800" endDate="2022-01-01 08:11:00 -0800" value="500"/>"#,
        r#" <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" sourceName="Watch" unit="kcal" creationDate="2022-01-01 19:00:00 -0800" startDate="2022-01-01 18:10:00 -0800" endDate="2022-01-01 18:11:00 -0800" value="300"/>"#,
        r#" <Record type="HKQuantityTypeIdentifierDistanceWalkingRunning" sourceName="Watch" unit="km" creationDate="2022-01-01 19:00:00 -0800" startDate="2022-01-01 18:10:00 -0800" endDate="2022-01-01 18:40:00 -0800" value="2.5"/>"#,
        r#" <Record type="HKQuantityTypeIdentifierAppleStandTime" sourceName="Watch" unit="min" creationDate="2022-01-02 10:00:00 -0800" startDate="2022-01-02 09:00:00 -0800" endDate="2022-01-02 09:05:00 -0800" value="5"/>"#,
        r#"  <WorkoutStatistics type="HKQuantityTypeIdentifierActiveEnergyBurned" startDate="2022-01-01 18:10:00 -0800" endDate="2022-01-01 18:40:00 -0800" sum="250" unit="kcal"/>"#,
        r#"</HealthData>"#,
    ];
    lines.join("\n")
}

fn write_route(dir: &Path, name: &str, time: &str, points: &[(f64, f64)]) -> PathBuf {
    let trkpts: String = points
        .iter()
        .map(|(lon, lat)| {
            format!(
                r#"<trkpt lon="{lon:.6}" lat="{lat:.6}"><ele>10.0</ele><time>{time}</time><extensions><speed>2.5</speed></extensions></trkpt>"#
            )
        })
        .collect();
    let path = dir.join(name);
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Apple Health Export" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata>
    <time>{time}</time>
  </metadata>
  <trk>
    <name>Route 2022</name>
    <trkseg>{trkpts}</trkseg>
  </trk>
</gpx>"#
    );
    std::fs::write(&path, xml).unwrap();
    path
}

#[test]
fn daily_totals_and_visitation_from_export() {
    let dir = TempDir::new().unwrap();
    write_route(dir.path(), "route_2022-01-01_4.00pm.gpx", "2022-01-02T00:00:00Z", &[(-122.45, 37.75), (-122.45001, 37.75001)]);
    write_route(dir.path(), "route_2022-01-03_9.00am.gpx", "2022-01-03T17:00:00Z", &[(-122.45, 37.75), (-122.40, 37.78)]);
    write_route(dir.path(), "route_2022-01-03_6.00pm.gpx", "2022-01-04T02:00:00Z", &[(-122.40, 37.78), (-121.00, 38.00)]);

    let config = PipelineConfig {
        routes: RouteConfig {
            region: Some(BoundingRegion::san_francisco()),
            ..RouteConfig::default()
        },
        projection_window: DateWindow::new(date("2022-01-01"), date("2022-01-05")),
        ..PipelineConfig::default()
    };
    let out = run_pipeline_from_dir(Cursor::new(export_xml()), dir.path(), &config).unwrap();

    assert_eq!(out.daily.get(MetricType::Energy, date("2022-01-01")), Some(800.0));
    assert_eq!(out.daily.get(MetricType::Distance, date("2022-01-01")), Some(2.5));
    assert_eq!(out.daily.get(MetricType::StandTime, date("2022-01-02")), Some(5.0));
    assert_eq!(out.daily.len(), 3);

    let q = Quantizer::default();
    let home = q.quantize(-122.45, 37.75);
    let park = q.quantize(-122.40, 37.78);
    assert_eq!(out.routes.index.len(), 2);
    assert_eq!(out.routes.index.visit_count(&home), 2);
    assert_eq!(out.routes.index.visit_count(&park), 1);
    assert_eq!(out.routes.files.iter().map(|f| f.out_of_region).sum::<usize>(), 1);

    let series = out.snapshots.unwrap();
    assert_eq!(series.count(date("2022-01-01"), &home), 1);
    assert_eq!(series.count(date("2022-01-02"), &home), 1);
    assert_eq!(series.count(date("2022-01-03"), &home), 2);
    assert_eq!(series.count(date("2022-01-04"), &park), 1);
    assert_eq!(series.count(date("2022-01-02"), &park), 0);
}

#[test]
fn malformed_record_aborts_with_index() {
    let dir = TempDir::new().unwrap();
    let mut lines: Vec<String> = export_xml().lines().map(str::to_string).collect();
    lines.truncate(2);
    let good = r#" <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" startDate="2022-01-01 08:10:00 -0800" value="1"/>"#;
    while lines.len() < 41 {
        lines.push(good.to_string());
    }
    lines.push(r#" <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" startDate="2022-01-01 08:10:00 -0800" value="n/a"/>"#.to_string());
    lines.push(good.to_string());

    let err = run_pipeline_from_dir(Cursor::new(lines.join("\n")), dir.path(), &PipelineConfig::default()).unwrap_err();
    match err {
        PipelineError::Extract(ExtractError::MalformedRecord { record, .. }) => assert_eq!(record, 42),
        other => panic!("unexpected error: {other}"),
    }

    let lenient = PipelineConfig {
        extractor: ExtractorConfig::lenient(),
        ..PipelineConfig::default()
    };
    let out = run_pipeline_from_dir(Cursor::new(lines.join("\n")), dir.path(), &lenient).unwrap();
    assert_eq!(out.daily.get(MetricType::Energy, date("2022-01-01")), Some(40.0));
}
