//! Building a visited-cell index and a cumulative visitation series.
//!
//! Run with: cargo run --example visited_cells

use activity_atlas::{
    project, project_sparse, BoundingRegion, CellVisitIndex, DateWindow, Quantizer,
};
use chrono::NaiveDate;

fn main() {
    println!("Visited Cells Example\n");

    let quantizer = Quantizer::default();
    let region = BoundingRegion::san_francisco();
    let day = |d: u32| NaiveDate::from_ymd_opt(2022, 1, d).unwrap();

    // Three short walks along the same street, and one outside the city
    let walks = [
        (day(1), vec![(-122.4500, 37.7500), (-122.4501, 37.7502), (-122.4503, 37.7504)]),
        (day(3), vec![(-122.4500, 37.7500), (-122.4498, 37.7499)]),
        (day(3), vec![(-122.4501, 37.7502), (-122.4500, 37.7500)]),
        (day(6), vec![(-121.8863, 37.3382)]),
    ];

    let mut index = CellVisitIndex::new();
    for (date, points) in &walks {
        for (lon, lat) in points {
            let cell = quantizer.quantize(*lon, *lat);
            if region.contains(&cell) {
                index.insert(cell, *date);
            }
        }
    }
    println!("{} cells, {} cell-days\n", index.len(), index.total_visits());

    let window = DateWindow::new(day(1), day(8)).unwrap();
    let series = project(&index, window);
    let sparse = project_sparse(&index, window);

    println!("Dense series over {} ({} days):", window, series.len());
    for (date, snapshot) in series.iter() {
        println!("  {}  {} cells, max count {}", date, snapshot.len(), series.max_count(*date));
    }

    println!("\nSparse series: {} snapshots", sparse.len());
    for date in sparse.change_dates() {
        println!("  changed on {}", date);
    }

    let home = quantizer.quantize(-122.4500, 37.7500);
    println!("\nCell {} visited {} times by {}", home, series.count(day(7), &home), day(7));
}
