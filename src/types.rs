use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Relative orbit number (Sentinel-1: 1..=175)
pub type RelativeOrbit = u32;

/// Simple 3D vector for geometric calculations (ECEF metres unless noted)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, `None` for a zero or non-finite vector
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if n > 0.0 && n.is_finite() {
            Some(self * (1.0 / n))
        } else {
            None
        }
    }
}

impl Add for Vector3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Coordinate reference system of a terrain or output grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// WGS84 longitude/latitude in degrees (EPSG:4326)
    Geographic,
    /// WGS84 / UTM (EPSG:326xx north, 327xx south)
    Utm { zone: u32, north: bool },
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> LiaResult<Self> {
        match epsg {
            4326 => Ok(Crs::Geographic),
            32601..=32660 => Ok(Crs::Utm { zone: epsg - 32600, north: true }),
            32701..=32760 => Ok(Crs::Utm { zone: epsg - 32700, north: false }),
            _ => Err(LiaError::InvalidParameter(format!(
                "unsupported coordinate reference system EPSG:{}",
                epsg
            ))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Geographic => 4326,
            Crs::Utm { zone, north: true } => 32600 + zone,
            Crs::Utm { zone, north: false } => 32700 + zone,
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Geospatial bounding box (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> LiaResult<Self> {
        if !(min_lon < max_lon && min_lat < max_lat) {
            return Err(LiaError::InvalidParameter(format!(
                "degenerate bounding box [{}, {}, {}, {}]",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        Ok(Self { min_lon, max_lon, min_lat, max_lat })
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.min_lon
            && self.max_lon >= other.max_lon
            && self.min_lat <= other.min_lat
            && self.max_lat >= other.max_lat
    }

    pub fn expand(&self, margin: f64) -> Self {
        Self {
            min_lon: self.min_lon - margin,
            max_lon: self.max_lon + margin,
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering, corner-based)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, spacing_x: f64, spacing_y: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: spacing_x,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -spacing_y,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate, measured between cell centres
    ///
    /// Only valid for transforms without rotation.
    pub fn fractional_index(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width - 0.5;
        let row = (y - self.top_left_y) / self.pixel_height - 0.5;
        (row, col)
    }
}

/// Shape, placement and CRS of a raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GridSpec {
    /// Same shape, same CRS, and transforms agreeing to a millionth of a pixel
    pub fn is_identical(&self, other: &GridSpec) -> bool {
        if self.rows != other.rows || self.cols != other.cols || self.crs != other.crs {
            return false;
        }
        let tol = 1e-6 * self.transform.pixel_width.abs().max(self.transform.pixel_height.abs());
        self.transform
            .to_gdal()
            .iter()
            .zip(other.transform.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Geographic bounds when the grid is in EPSG:4326
    pub fn geographic_bounds(&self) -> Option<BoundingBox> {
        if self.crs != Crs::Geographic {
            return None;
        }
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        Some(BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        })
    }
}

/// Terrain elevation surface on a regular grid, no-data stored as NaN
#[derive(Debug, Clone)]
pub struct TerrainGrid {
    elevation: Array2<f32>,
    grid: GridSpec,
}

impl TerrainGrid {
    pub fn new(elevation: Array2<f32>, transform: GeoTransform, crs: Crs) -> LiaResult<Self> {
        if !(transform.pixel_width.abs() > 0.0 && transform.pixel_height.abs() > 0.0) {
            return Err(LiaError::InvalidParameter(format!(
                "grid spacing must be positive, got ({}, {})",
                transform.pixel_width, transform.pixel_height
            )));
        }
        if let Some(bad) = elevation.iter().find(|v| v.is_infinite()) {
            return Err(LiaError::InvalidFormat(format!(
                "terrain contains non-finite elevation {}",
                bad
            )));
        }
        let (rows, cols) = elevation.dim();
        Ok(Self {
            elevation,
            grid: GridSpec { rows, cols, transform, crs },
        })
    }

    /// Build from samples using a sentinel no-data value
    pub fn with_nodata(
        mut elevation: Array2<f32>,
        nodata: Option<f32>,
        transform: GeoTransform,
        crs: Crs,
    ) -> LiaResult<Self> {
        if let Some(nodata) = nodata {
            elevation.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
        }
        Self::new(elevation, transform, crs)
    }

    pub fn elevation(&self) -> &Array2<f32> {
        &self.elevation
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.grid.rows, self.grid.cols)
    }

    pub fn crs(&self) -> Crs {
        self.grid.crs
    }

    /// Elevation at (row, col), `None` for no-data
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let v = self.elevation[[row, col]];
        if v.is_nan() {
            None
        } else {
            Some(v as f64)
        }
    }

    pub fn valid_count(&self) -> usize {
        self.elevation.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Orbit state vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub time: DateTime<Utc>,
    pub position: [f64; 3],  // [x, y, z] in meters
    pub velocity: [f64; 3],  // [vx, vy, vz] in m/s
}

/// Ordered orbit state vectors for one acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitSamples {
    state_vectors: Vec<StateVector>,
}

impl OrbitSamples {
    pub fn new(state_vectors: Vec<StateVector>) -> LiaResult<Self> {
        if state_vectors.len() < 2 {
            return Err(LiaError::InvalidParameter(format!(
                "at least two orbit state vectors required, got {}",
                state_vectors.len()
            )));
        }
        for pair in state_vectors.windows(2) {
            if pair[1].time <= pair[0].time {
                return Err(LiaError::InvalidParameter(format!(
                    "orbit state vector times must be strictly increasing ({} then {})",
                    pair[0].time, pair[1].time
                )));
            }
        }
        Ok(Self { state_vectors })
    }

    pub fn state_vectors(&self) -> &[StateVector] {
        &self.state_vectors
    }

    pub fn len(&self) -> usize {
        self.state_vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state_vectors.is_empty()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.state_vectors[0].time
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.state_vectors[self.state_vectors.len() - 1].time
    }

    /// Samples within `[start - margin, stop + margin]`
    pub fn window(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        margin: Duration,
    ) -> LiaResult<Self> {
        let lo = start - margin;
        let hi = stop + margin;
        let kept: Vec<StateVector> = self
            .state_vectors
            .iter()
            .filter(|sv| sv.time >= lo && sv.time <= hi)
            .cloned()
            .collect();
        Self::new(kept).map_err(|_| {
            LiaError::DataUnavailable(format!(
                "fewer than two orbit state vectors between {} and {}",
                lo, hi
            ))
        })
    }
}

/// How far a failure reaches, following the processing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Recoverable: the cell becomes no-data
    Cell,
    /// Fatal for one acquisition / relative orbit, others continue
    Acquisition,
    /// Aborts the whole run
    Run,
}

/// Error types for LIA processing
#[derive(Debug, thiserror::Error)]
pub enum LiaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Product {product_id} unavailable: {reason}")]
    ProductUnavailable { product_id: String, reason: String },

    #[error("Degenerate terrain geometry at cell ({row}, {col}): no tangent can be formed")]
    GeometryDegenerate { row: usize, col: usize },

    #[error("Orbit fit failed: {0}")]
    OrbitFitFailed(String),

    #[error("Orbit time {time:.3}s outside valid range [{valid_start:.3}s, {valid_end:.3}s]")]
    OrbitTimeOutOfRange { time: f64, valid_start: f64, valid_end: f64 },

    #[error("Zero-Doppler search did not converge at cell ({row}, {col}) after {iterations} iterations (residual {residual:.3e})")]
    Unconverged { row: usize, col: usize, iterations: usize, residual: f64 },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Internal invariant violated: {0}")]
    LogicInvariantViolated(String),

    #[error("at cell ({row}, {col}): {source}")]
    AtCell {
        row: usize,
        col: usize,
        #[source]
        source: Box<LiaError>,
    },

    #[error("relative orbit {relative_orbit}: {source}")]
    ForOrbit {
        relative_orbit: RelativeOrbit,
        #[source]
        source: Box<LiaError>,
    },

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl LiaError {
    pub fn at_cell(self, row: usize, col: usize) -> Self {
        LiaError::AtCell { row, col, source: Box::new(self) }
    }

    pub fn for_orbit(self, relative_orbit: RelativeOrbit) -> Self {
        LiaError::ForOrbit { relative_orbit, source: Box::new(self) }
    }

    /// The innermost error, with context wrappers removed
    pub fn root(&self) -> &LiaError {
        match self {
            LiaError::AtCell { source, .. } | LiaError::ForOrbit { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self.root() {
            LiaError::GeometryDegenerate { .. } | LiaError::Unconverged { .. } => ErrorScope::Cell,
            LiaError::LogicInvariantViolated(_) | LiaError::GridMismatch(_) => ErrorScope::Run,
            _ => ErrorScope::Acquisition,
        }
    }
}

/// Result type for LIA operations
pub type LiaResult<T> = Result<T, LiaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::Array2;

    #[test]
    fn test_vector_cross_and_normalize() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vector3::new(0.0, 0.0, 1.0));
        let v = Vector3::new(3.0, 4.0, 0.0).normalized().unwrap();
        assert!((v.norm() - 1.0).abs() < 1e-12);
        assert!(Vector3::default().normalized().is_none());
    }

    #[test]
    fn test_crs_epsg_round_trip() {
        for epsg in [4326, 32601, 32631, 32660, 32701, 32733] {
            assert_eq!(Crs::from_epsg(epsg).unwrap().epsg(), epsg);
        }
        assert!(Crs::from_epsg(3857).is_err());
    }

    #[test]
    fn test_terrain_grid_rejects_bad_input() {
        let t = GeoTransform::north_up(0.0, 0.0, 0.0, 10.0);
        assert!(TerrainGrid::new(Array2::zeros((2, 2)), t, Crs::Geographic).is_err());

        let t = GeoTransform::north_up(0.0, 0.0, 10.0, 10.0);
        let mut dem = Array2::<f32>::zeros((2, 2));
        dem[[0, 1]] = f32::INFINITY;
        assert!(TerrainGrid::new(dem, t, Crs::Geographic).is_err());

        let dem = Array2::from_elem((2, 2), -32768.0f32);
        let grid = TerrainGrid::with_nodata(dem, Some(-32768.0), t, Crs::Geographic).unwrap();
        assert_eq!(grid.valid_count(), 0);
        assert_eq!(grid.get(0, 0), None);
    }

    #[test]
    fn test_orbit_samples_order_and_window() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 3, 17, 0, 0).unwrap();
        let svs: Vec<StateVector> = (0..10)
            .map(|i| StateVector {
                time: t0 + Duration::seconds(10 * i),
                position: [7.0e6, 0.0, 0.0],
                velocity: [0.0, 7.5e3, 0.0],
            })
            .collect();
        let samples = OrbitSamples::new(svs.clone()).unwrap();
        let cropped = samples
            .window(t0 + Duration::seconds(30), t0 + Duration::seconds(50), Duration::seconds(10))
            .unwrap();
        assert_eq!(cropped.len(), 5);

        let mut reversed = svs;
        reversed.swap(0, 1);
        assert!(OrbitSamples::new(reversed).is_err());
    }

    #[test]
    fn test_error_scope_sees_through_context() {
        let e = LiaError::Unconverged { row: 1, col: 2, iterations: 50, residual: 1.0 }.at_cell(1, 2);
        assert_eq!(e.scope(), ErrorScope::Cell);
        let e = LiaError::OrbitFitFailed("x".into()).for_orbit(64);
        assert_eq!(e.scope(), ErrorScope::Acquisition);
        let e = LiaError::LogicInvariantViolated("x".into()).for_orbit(64);
        assert_eq!(e.scope(), ErrorScope::Run);
    }
}
