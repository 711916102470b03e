//! Backward geocoding: zero-Doppler time and line of sight for every terrain cell

use crate::config::{GeocodingConfig, SeedStrategy};
use crate::core::geocentric::GeocentricTerrain;
use crate::core::orbit_interpolator::OrbitInterpolator;
use crate::types::{GridSpec, LiaError, LiaResult, Vector3};
use ndarray::Array2;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Zero-Doppler solution for one ground cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeocodedCell {
    /// Satellite minus ground position (ECEF, metres)
    pub line_of_sight: Vector3,
    pub slant_range: f64,
    /// Seconds relative to the orbit epoch
    pub azimuth_time: f64,
}

/// Per-cell geocoding output with bookkeeping
#[derive(Debug, Clone)]
pub struct GeocodingResult {
    cells: Array2<Option<GeocodedCell>>,
    grid: GridSpec,
    solved: usize,
    nodata: usize,
    unconverged: usize,
}

impl GeocodingResult {
    pub fn get(&self, row: usize, col: usize) -> Option<GeocodedCell> {
        self.cells[[row, col]]
    }

    pub fn cells(&self) -> &Array2<Option<GeocodedCell>> {
        &self.cells
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn solved_count(&self) -> usize {
        self.solved
    }

    /// Cells skipped because the terrain is no-data
    pub fn nodata_count(&self) -> usize {
        self.nodata
    }

    pub fn unconverged_count(&self) -> usize {
        self.unconverged
    }
}

#[derive(Default)]
struct RowStats {
    solved: usize,
    nodata: usize,
    unconverged: usize,
}

/// Newton solver for `(S(t) - P) . V(t) = 0`
pub struct BackwardGeocoder<'a> {
    orbit: &'a OrbitInterpolator,
    config: &'a GeocodingConfig,
}

impl<'a> BackwardGeocoder<'a> {
    pub fn new(orbit: &'a OrbitInterpolator, config: &'a GeocodingConfig) -> Self {
        Self { orbit, config }
    }

    /// Solve the zero-Doppler condition for a single ground point
    pub fn solve(&self, point: Vector3, seed: f64, row: usize, col: usize) -> LiaResult<GeocodedCell> {
        let mut t = seed;
        let mut residual = f64::NAN;

        for iteration in 0..=self.config.max_iterations {
            let state = self.orbit.evaluate(t).map_err(|e| e.at_cell(row, col))?;
            let los = state.position - point;
            let doppler = los.dot(state.velocity);
            residual = doppler.abs();

            if residual < self.config.convergence_tolerance {
                return Ok(GeocodedCell {
                    line_of_sight: los,
                    slant_range: los.norm(),
                    azimuth_time: t,
                });
            }
            if iteration == self.config.max_iterations {
                break;
            }

            let derivative = state.velocity.dot(state.velocity) + los.dot(state.acceleration);
            if !(derivative.abs() > 0.0) || !derivative.is_finite() {
                break;
            }
            t -= doppler / derivative;
        }

        Err(LiaError::Unconverged {
            row,
            col,
            iterations: self.config.max_iterations,
            residual,
        })
    }

    fn seed_for(&self, point: Vector3) -> f64 {
        match self.config.seed {
            SeedStrategy::NearestSample => self.orbit.nearest_sample_time(point),
            SeedStrategy::MidAcquisition => self.orbit.mid_time(),
        }
    }

    fn geocode_row(
        &self,
        terrain: &GeocentricTerrain,
        row: usize,
    ) -> LiaResult<(Vec<Option<GeocodedCell>>, RowStats)> {
        let cols = terrain.grid().cols;
        let mut cells = Vec::with_capacity(cols);
        let mut stats = RowStats::default();
        let mut previous: Option<f64> = None;

        for col in 0..cols {
            let point = match terrain.get(row, col) {
                Some(p) => p,
                None => {
                    stats.nodata += 1;
                    cells.push(None);
                    continue;
                }
            };

            let seed = previous.unwrap_or_else(|| self.seed_for(point));
            match self.solve(point, seed, row, col) {
                Ok(cell) => {
                    previous = Some(cell.azimuth_time);
                    stats.solved += 1;
                    cells.push(Some(cell));
                }
                Err(LiaError::Unconverged { residual, .. }) => {
                    log::debug!("Cell ({}, {}) unconverged, residual {:.3e}", row, col, residual);
                    stats.unconverged += 1;
                    cells.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((cells, stats))
    }

    /// Geocode every valid terrain cell; rows are processed independently
    pub fn geocode(&self, terrain: &GeocentricTerrain) -> LiaResult<GeocodingResult> {
        let grid = *terrain.grid();
        log::info!("Backward geocoding {}x{} cells", grid.rows, grid.cols);

        #[cfg(feature = "parallel")]
        let rows: Vec<LiaResult<_>> = (0..grid.rows)
            .into_par_iter()
            .map(|row| self.geocode_row(terrain, row))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<LiaResult<_>> = (0..grid.rows).map(|row| self.geocode_row(terrain, row)).collect();

        let mut flat = Vec::with_capacity(grid.rows * grid.cols);
        let mut totals = RowStats::default();
        for row in rows {
            let (cells, stats) = row?;
            flat.extend(cells);
            totals.solved += stats.solved;
            totals.nodata += stats.nodata;
            totals.unconverged += stats.unconverged;
        }

        let cells = Array2::from_shape_vec((grid.rows, grid.cols), flat)
            .map_err(|e| LiaError::LogicInvariantViolated(format!("geocoding grid shape: {}", e)))?;

        if totals.unconverged > 0 {
            log::warn!(
                "Zero-Doppler search did not converge for {} cells; they are no-data",
                totals.unconverged
            );
        }
        log::info!(
            "✅ Geocoding complete: {} solved, {} no-data, {} unconverged",
            totals.solved,
            totals.nodata,
            totals.unconverged
        );

        Ok(GeocodingResult {
            cells,
            grid,
            solved: totals.solved,
            nodata: totals.nodata,
            unconverged: totals.unconverged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrbitFitConfig;
    use crate::core::projection::{geodetic_north, geodetic_to_ecef, geodetic_up};
    use crate::types::{OrbitSamples, StateVector};
    use chrono::{Duration, TimeZone, Utc};

    /// Straight pass 700 km above (lat, lon) heading north at 7 km/s
    fn overhead_orbit(lat: f64, lon: f64) -> OrbitInterpolator {
        let t0 = Utc.with_ymd_and_hms(2022, 3, 1, 5, 0, 0).unwrap();
        let centre = geodetic_to_ecef(lat, lon, 0.0) + geodetic_up(lat, lon) * 700_000.0;
        let velocity = geodetic_north(lat, lon) * 7_000.0;
        let svs = (-10..=10)
            .map(|i| {
                let t = 10.0 * i as f64;
                StateVector {
                    time: t0 + Duration::seconds(10 * i),
                    position: (centre + velocity * t).to_array(),
                    velocity: velocity.to_array(),
                }
            })
            .collect();
        OrbitInterpolator::new(&OrbitSamples::new(svs).unwrap(), &OrbitFitConfig::default()).unwrap()
    }

    #[test]
    fn test_solution_satisfies_zero_doppler() {
        let orbit = overhead_orbit(0.5, 3.0);
        let config = GeocodingConfig::default();
        let geocoder = BackwardGeocoder::new(&orbit, &config);

        let ground = geodetic_to_ecef(0.6, 3.1, 250.0);
        let cell = geocoder.solve(ground, orbit.mid_time(), 0, 0).unwrap();
        let state = orbit.evaluate(cell.azimuth_time).unwrap();
        assert!((state.position - ground).dot(state.velocity).abs() < config.convergence_tolerance);
        assert!((cell.line_of_sight.norm() - cell.slant_range).abs() < 1e-9);
        assert!(cell.azimuth_time > 0.0);
    }

    #[test]
    fn test_iteration_budget_exhaustion_is_unconverged() {
        let orbit = overhead_orbit(0.5, 3.0);
        let config = GeocodingConfig {
            max_iterations: 0,
            ..GeocodingConfig::default()
        };
        let geocoder = BackwardGeocoder::new(&orbit, &config);
        let ground = geodetic_to_ecef(0.7, 3.0, 0.0);
        assert!(matches!(
            geocoder.solve(ground, -90.0, 4, 5),
            Err(LiaError::Unconverged { row: 4, col: 5, .. })
        ));
    }

    #[test]
    fn test_ground_beyond_orbit_coverage_is_out_of_range() {
        let orbit = overhead_orbit(0.5, 3.0);
        let config = GeocodingConfig::default();
        let geocoder = BackwardGeocoder::new(&orbit, &config);
        // ~2000 km north of the pass: zero Doppler is far past the last sample
        let ground = geodetic_to_ecef(18.5, 3.0, 0.0);
        let err = geocoder.solve(ground, orbit.mid_time(), 1, 2).unwrap_err();
        assert!(matches!(err.root(), LiaError::OrbitTimeOutOfRange { .. }));
        assert!(matches!(err, LiaError::AtCell { row: 1, col: 2, .. }));
    }
}
