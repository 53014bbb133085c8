//! Summing daily activity totals from a health export record stream.
//!
//! Run with: cargo run --example daily_totals [path/to/export.xml]
//!
//! Without a path, a small built-in export is used.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};

use activity_atlas::{build_daily_table, ExtractorConfig, MetricType};

const SAMPLE_EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" unit="kcal" startDate="2022-12-30 08:10:00 -0800" value="412.7"/>
 <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" unit="kcal" startDate="2022-12-31 07:55:00 -0800" value="500"/>
 <Record type="HKQuantityTypeIdentifierActiveEnergyBurned" unit="kcal" startDate="2022-12-31 18:02:00 -0800" value="300"/>
 <Record type="HKQuantityTypeIdentifierDistanceWalkingRunning" unit="km" startDate="2022-12-31 18:02:00 -0800" value="2.5"/>
 <Record type="HKQuantityTypeIdentifierAppleStandTime" unit="min" startDate="2022-12-31 11:00:00 -0800" value="7"/>
 <WorkoutStatistics type="HKQuantityTypeIdentifierActiveEnergyBurned" startDate="2022-12-31 18:02:00 -0800" sum="300"/>
</HealthData>
"#;

fn main() {
    println!("Daily Totals Example\n");

    let reader: Box<dyn BufRead> = match std::env::args().nth(1) {
        Some(path) => match File::open(&path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                eprintln!("Cannot open {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Box::new(Cursor::new(SAMPLE_EXPORT)),
    };

    let start = std::time::Instant::now();
    let table = match build_daily_table(reader, &ExtractorConfig::default()) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Extraction stopped: {}", e);
            std::process::exit(1);
        }
    };
    println!("Built {} daily entries in {:?}\n", table.len(), start.elapsed());

    for metric in MetricType::ALL {
        let Some(series) = table.series(metric) else {
            println!("{}: no samples", metric);
            continue;
        };
        println!("{} ({} days, total {:.1}):", metric, series.len(), table.total(metric));
        for (date, value) in series.iter().rev().take(5) {
            println!("  {}  {:>10.2}", date, value);
        }
    }
}
