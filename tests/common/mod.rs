//! Synthetic scenes shared by the integration tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;
use sarlia::core::projection::{geodetic_north, geodetic_to_ecef, geodetic_up, to_geographic};
use sarlia::io::orbit::{Acquisition, OrbitSource};
use sarlia::types::{
    Crs, GeoTransform, LiaError, LiaResult, OrbitSamples, RelativeOrbit, StateVector, TerrainGrid,
    Vector3,
};
use std::collections::HashMap;
use std::path::Path;

pub const ALTITUDE: f64 = 700_000.0;
pub const SPEED: f64 = 7_000.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Flat terrain in UTM 31N, centre cell on the central meridian (lon 3) near lat 0.5
///
/// `rows` and `cols` should be odd so a centre cell exists.
pub fn flat_terrain(rows: usize, cols: usize, spacing: f64, height: f32) -> TerrainGrid {
    let centre_e = 500_000.0;
    let centre_n = 55_300.0;
    let transform = GeoTransform::north_up(
        centre_e - (cols as f64 / 2.0) * spacing,
        centre_n + (rows as f64 / 2.0) * spacing,
        spacing,
        spacing,
    );
    TerrainGrid::new(
        Array2::from_elem((rows, cols), height),
        transform,
        Crs::Utm { zone: 31, north: true },
    )
    .expect("valid terrain")
}

/// (lat, lon) of the centre cell
pub fn centre_geodetic(terrain: &TerrainGrid) -> (f64, f64) {
    let (rows, cols) = terrain.dim();
    let (x, y) = terrain.grid().transform.cell_center(rows / 2, cols / 2);
    let (lon, lat) = to_geographic(terrain.crs(), x, y);
    (lat, lon)
}

pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 27).unwrap()
}

/// Straight pass heading north, `ALTITUDE` above (lat, lon) at `reference_time`,
/// shifted `cross_track_west` metres to the west, one sample every 10 s
pub fn straight_pass(
    lat: f64,
    lon: f64,
    cross_track_west: f64,
    along_track_offset: f64,
    sample_range: std::ops::RangeInclusive<i64>,
) -> OrbitSamples {
    let up = geodetic_up(lat, lon);
    let north = geodetic_north(lat, lon);
    let east = north.cross(up);
    let centre = geodetic_to_ecef(lat, lon, 0.0) + up * ALTITUDE - east * cross_track_west + north * along_track_offset;
    let velocity = north * SPEED;

    let t0 = reference_time();
    let svs = sample_range
        .map(|i| {
            let t = 10.0 * i as f64;
            StateVector {
                time: t0 + Duration::seconds(10 * i),
                position: (centre + velocity * t).to_array(),
                velocity: velocity.to_array(),
            }
        })
        .collect();
    OrbitSamples::new(svs).expect("valid orbit samples")
}

pub fn acquisition(product_id: &str, relative_orbit: RelativeOrbit, orbit: OrbitSamples) -> Acquisition {
    Acquisition {
        product_id: product_id.to_string(),
        relative_orbit,
        start: reference_time() - Duration::seconds(5),
        stop: reference_time() + Duration::seconds(5),
        orbit,
    }
}

/// Orbit source backed by a map; unknown products are unavailable
#[derive(Default)]
pub struct SyntheticOrbitSource {
    pub acquisitions: HashMap<String, Acquisition>,
    /// Products that fail with an internal error
    pub broken: Vec<String>,
}

impl SyntheticOrbitSource {
    pub fn with(mut self, acquisition: Acquisition) -> Self {
        self.acquisitions.insert(acquisition.product_id.clone(), acquisition);
        self
    }
}

impl OrbitSource for SyntheticOrbitSource {
    fn acquisition(&self, product_id: &str, scratch: &Path) -> LiaResult<Acquisition> {
        assert!(scratch.is_dir(), "scratch directory must exist during processing");
        if self.broken.iter().any(|p| p == product_id) {
            return Err(LiaError::LogicInvariantViolated(format!("broken product {}", product_id)));
        }
        self.acquisitions
            .get(product_id)
            .cloned()
            .ok_or_else(|| LiaError::ProductUnavailable {
                product_id: product_id.to_string(),
                reason: "not in catalogue".to_string(),
            })
    }
}

pub fn unit(v: Vector3) -> Vector3 {
    v.normalized().expect("non-zero vector")
}
