//! # Coordinate Quantization
//!
//! Maps raw GPS coordinates onto a fixed decimal grid. A cell is identified by
//! the integer tick counts of its rounded longitude and latitude, so cells are
//! exact, hashable and totally ordered map keys.
//!
//! ## Grid
//!
//! At precision `P` one tick is `10^-P` degrees. A raw coordinate is rounded to
//! the nearest tick; the cell is then *labelled* with the rounded value plus a
//! half-bin offset of `10^-P / 2`, which places the label on the tick marks
//! used when rendering.
//!
//! Labels sit exactly half a tick from a rounding boundary, so a value within
//! a tiny tolerance of a half tick is treated as a label and resolves to the
//! cell it labels. This makes quantizing a cell label a no-op.
//!
//! ```rust
//! use activity_atlas::Quantizer;
//!
//! let q = Quantizer::default();
//! let cell = q.quantize(-122.45003, 37.74996);
//! assert_eq!(cell.grid_lon(), -122.45);
//! assert_eq!(cell.grid_lat(), 37.75);
//! assert_eq!(q.quantize(cell.lon(), cell.lat()), cell);
//! ```

use geo::{Coord, Rect};

/// Default number of decimal digits kept per axis (~11m at the equator).
pub const DEFAULT_PRECISION: u32 = 4;

/// Largest precision whose tick counts stay well inside `i64`.
pub const MAX_PRECISION: u32 = 9;

/// Distance (in ticks) from a half tick within which a value counts as a label.
///
/// Widened at large tick counts to the rounding error of `value * scale`.
const LABEL_TOLERANCE: f64 = 1e-6;

/// Float steps of slack allowed when rebuilding ticks from a label.
const LABEL_ULPS: f64 = 8.0;

/// A quantized grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoCell {
    lon_ticks: i64,
    lat_ticks: i64,
    precision: u32,
}

impl GeoCell {
    pub fn lon_ticks(&self) -> i64 {
        self.lon_ticks
    }

    pub fn lat_ticks(&self) -> i64 {
        self.lat_ticks
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Rounded longitude, without the half-bin offset.
    pub fn grid_lon(&self) -> f64 {
        self.lon_ticks as f64 / scale(self.precision)
    }

    /// Rounded latitude, without the half-bin offset.
    pub fn grid_lat(&self) -> f64 {
        self.lat_ticks as f64 / scale(self.precision)
    }

    /// Cell label longitude (rounded value plus half a tick).
    pub fn lon(&self) -> f64 {
        self.grid_lon() + half_bin(self.precision)
    }

    /// Cell label latitude (rounded value plus half a tick).
    pub fn lat(&self) -> f64 {
        self.grid_lat() + half_bin(self.precision)
    }

    /// Label position as a `geo` coordinate (x = longitude, y = latitude).
    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: self.lon(),
            y: self.lat(),
        }
    }
}

impl std::fmt::Display for GeoCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits = self.precision as usize + 1;
        write!(f, "({:.*}, {:.*})", digits, self.lon(), digits, self.lat())
    }
}

/// Rounds coordinates onto the grid at a fixed precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    precision: u32,
    scale: f64,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl Quantizer {
    /// Create a quantizer keeping `precision` decimal digits.
    ///
    /// Precisions above [`MAX_PRECISION`] are clamped.
    pub fn new(precision: u32) -> Self {
        let precision = if precision > MAX_PRECISION {
            log::warn!(
                "[Quantize] Precision {} exceeds maximum, clamping to {}",
                precision,
                MAX_PRECISION
            );
            MAX_PRECISION
        } else {
            precision
        };
        Self {
            precision,
            scale: scale(precision),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Size of one grid step in degrees.
    pub fn tick(&self) -> f64 {
        1.0 / self.scale
    }

    /// Map a raw (longitude, latitude) pair to its grid cell.
    ///
    /// Callers are expected to pass finite coordinates.
    pub fn quantize(&self, lon: f64, lat: f64) -> GeoCell {
        GeoCell {
            lon_ticks: self.to_ticks(lon),
            lat_ticks: self.to_ticks(lat),
            precision: self.precision,
        }
    }

    fn to_ticks(&self, value: f64) -> i64 {
        let scaled = value * self.scale;
        let below = scaled.floor();
        let tolerance = LABEL_TOLERANCE.max(scaled.abs() * LABEL_ULPS * f64::EPSILON);
        if (scaled - below - 0.5).abs() < tolerance {
            below as i64
        } else {
            scaled.round() as i64
        }
    }
}

fn scale(precision: u32) -> f64 {
    10f64.powi(precision as i32)
}

fn half_bin(precision: u32) -> f64 {
    0.5 / scale(precision)
}

/// Inclusive longitude/latitude box used to keep only cells inside an area.
///
/// Containment is tested on a cell's rounded grid coordinates, so a point
/// rounding exactly onto `lon_max` is kept and one a tick further is not.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingRegion {
    rect: Rect<f64>,
}

impl BoundingRegion {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            rect: Rect::new(
                Coord { x: lon_min, y: lat_min },
                Coord { x: lon_max, y: lat_max },
            ),
        }
    }

    /// Central San Francisco, the default area for the time-lapse maps.
    pub fn san_francisco() -> Self {
        Self::new(-122.52, -122.37, 37.72, 37.83)
    }

    pub fn lon_min(&self) -> f64 {
        self.rect.min().x
    }

    pub fn lon_max(&self) -> f64 {
        self.rect.max().x
    }

    pub fn lat_min(&self) -> f64 {
        self.rect.min().y
    }

    pub fn lat_max(&self) -> f64 {
        self.rect.max().y
    }

    /// Whether the cell's grid coordinate lies inside the box (bounds inclusive).
    pub fn contains(&self, cell: &GeoCell) -> bool {
        let (lon, lat) = (cell.grid_lon(), cell.grid_lat());
        let (min, max) = (self.rect.min(), self.rect.max());
        lon >= min.x && lon <= max.x && lat >= min.y && lat <= max.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_to_nearest_tick() {
        let q = Quantizer::default();
        let cell = q.quantize(-122.45004, 37.75004);
        assert_eq!(cell.lon_ticks(), -1_224_500);
        assert_eq!(cell.lat_ticks(), 377_500);
        assert_eq!(cell.grid_lon(), -122.45);
        assert_eq!(cell.grid_lat(), 37.75);

        let neighbour = q.quantize(-122.45006, 37.75006);
        assert_eq!(neighbour.lon_ticks(), -1_224_501);
        assert_eq!(neighbour.lat_ticks(), 377_501);
    }

    #[test]
    fn test_label_has_half_bin_offset() {
        let q = Quantizer::default();
        let cell = q.quantize(-122.45, 37.75);
        assert!((cell.lon() - (-122.44995)).abs() < 1e-12);
        assert!((cell.lat() - 37.75005).abs() < 1e-12);
        assert_eq!(cell.center().x, cell.lon());
        assert_eq!(cell.center().y, cell.lat());
    }

    #[test]
    fn test_quantize_is_idempotent() {
        let q = Quantizer::default();
        let samples = [
            (-122.45004, 37.75004),
            (-122.419_416, 37.774_929),
            (0.0, 0.0),
            (-0.00004, 0.00006),
            (179.99994, -89.99996),
            (2.352_222, 48.856_613),
        ];
        for (lon, lat) in samples {
            let once = q.quantize(lon, lat);
            let twice = q.quantize(once.lon(), once.lat());
            assert_eq!(once, twice, "not idempotent for ({lon}, {lat})");
        }
    }

    #[test]
    fn test_idempotent_at_other_precisions() {
        for precision in [0, 2, 3, 5, 6] {
            let q = Quantizer::new(precision);
            let once = q.quantize(-122.419_416, 37.774_929);
            assert_eq!(q.quantize(once.lon(), once.lat()), once);
        }
    }

    #[test]
    fn test_idempotent_at_high_precisions() {
        for precision in 7..=MAX_PRECISION {
            let q = Quantizer::new(precision);
            for i in 0..1000 {
                let lon = -122.52 + 0.15 * (i as f64) / 1000.0 + 1.3e-7 * (i % 7) as f64;
                let lat = 37.72 + 0.11 * ((i * 37) % 1000) as f64 / 1000.0 + 2.9e-8 * (i % 11) as f64;
                let once = q.quantize(lon, lat);
                assert_eq!(q.quantize(once.lon(), once.lat()), once, "precision {precision}, point {i}");
            }
        }
    }

    #[test]
    fn test_precision_is_clamped() {
        assert_eq!(Quantizer::new(20).precision(), MAX_PRECISION);
        assert!((Quantizer::new(3).tick() - 0.001).abs() < 1e-15);
    }

    #[test]
    fn test_region_bounds_are_inclusive() {
        let q = Quantizer::default();
        let region = BoundingRegion::san_francisco();

        assert!(region.contains(&q.quantize(-122.37, 37.80)));
        assert!(region.contains(&q.quantize(-122.52, 37.72)));
        assert!(region.contains(&q.quantize(-122.45, 37.83)));

        assert!(!region.contains(&q.quantize(-122.37 + 1e-4, 37.80)));
        assert!(!region.contains(&q.quantize(-122.52 - 1e-4, 37.80)));
        assert!(!region.contains(&q.quantize(-122.45, 37.83 + 1e-4)));
    }

    #[test]
    fn test_region_normalizes_corners() {
        let region = BoundingRegion::new(-122.37, -122.52, 37.83, 37.72);
        assert_eq!(region.lon_min(), -122.52);
        assert_eq!(region.lat_max(), 37.83);
    }

    #[test]
    fn test_cells_order_and_display() {
        let q = Quantizer::default();
        let a = q.quantize(-122.4500, 37.7500);
        let b = q.quantize(-122.4499, 37.7500);
        assert!(a < b);
        assert_eq!(a.to_string(), "(-122.44995, 37.75005)");
    }
}
