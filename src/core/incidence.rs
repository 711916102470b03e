//! Local incidence angle from surface normals and lines of sight

use crate::config::IncidenceConfig;
use crate::core::geocentric::{SurfaceNormal, SurfaceNormals};
use crate::core::geocoding::GeocodingResult;
use crate::types::{GridSpec, LiaError, LiaResult, RelativeOrbit, Vector3};
use ndarray::{Array2, Zip};

/// Unit-length tolerance for surface normals
const UNIT_TOLERANCE: f64 = 1e-6;

/// Local incidence angles (radians) of one relative orbit, NaN for no-data
#[derive(Debug, Clone)]
pub struct IncidenceAngleRaster {
    pub relative_orbit: RelativeOrbit,
    pub grid: GridSpec,
    pub angles: Array2<f32>,
}

/// Summary statistics of a raster, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleStatistics {
    pub valid: usize,
    pub nodata: usize,
    pub min_deg: f64,
    pub max_deg: f64,
    pub mean_deg: f64,
}

impl IncidenceAngleRaster {
    pub fn valid_count(&self) -> usize {
        self.angles.iter().filter(|v| !v.is_nan()).count()
    }

    pub fn statistics(&self) -> AngleStatistics {
        let mut valid = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &a in self.angles.iter().filter(|v| !v.is_nan()) {
            let deg = (a as f64).to_degrees();
            valid += 1;
            sum += deg;
            min = min.min(deg);
            max = max.max(deg);
        }
        AngleStatistics {
            valid,
            nodata: self.angles.len() - valid,
            min_deg: if valid > 0 { min } else { f64::NAN },
            max_deg: if valid > 0 { max } else { f64::NAN },
            mean_deg: if valid > 0 { sum / valid as f64 } else { f64::NAN },
        }
    }
}

pub struct IncidenceEvaluator {
    clamp_epsilon: f64,
}

impl IncidenceEvaluator {
    pub fn new(config: &IncidenceConfig) -> Self {
        Self {
            clamp_epsilon: config.clamp_epsilon,
        }
    }

    /// Angle between a unit normal and a line of sight, in radians
    pub fn angle(&self, normal: &SurfaceNormal, line_of_sight: Vector3) -> LiaResult<f64> {
        let n = normal.as_vector();
        if (n.norm() - 1.0).abs() > UNIT_TOLERANCE {
            return Err(LiaError::LogicInvariantViolated(format!(
                "surface normal is not unit length (|n| = {})",
                n.norm()
            )));
        }
        let los = line_of_sight.normalized().ok_or_else(|| {
            LiaError::LogicInvariantViolated(format!("zero-length line of sight {:?}", line_of_sight))
        })?;

        let cosine = n.dot(los);
        if cosine.abs() > 1.0 + self.clamp_epsilon {
            return Err(LiaError::LogicInvariantViolated(format!(
                "cosine {} outside [-1, 1] beyond tolerance",
                cosine
            )));
        }
        Ok(cosine.clamp(-1.0, 1.0).acos())
    }

    /// Incidence angles for every cell valid in both inputs
    pub fn evaluate(
        &self,
        relative_orbit: RelativeOrbit,
        normals: &SurfaceNormals,
        geocoding: &GeocodingResult,
    ) -> LiaResult<IncidenceAngleRaster> {
        let grid = *normals.grid();
        if !grid.is_identical(geocoding.grid()) {
            return Err(LiaError::LogicInvariantViolated(
                "surface normals and geocoding result are on different grids".to_string(),
            ));
        }

        let mut angles = Array2::<f32>::from_elem((grid.rows, grid.cols), f32::NAN);
        let mut failure: Option<LiaError> = None;

        Zip::indexed(&mut angles)
            .and(normals.normals())
            .and(geocoding.cells())
            .for_each(|(row, col), out, normal, cell| {
                if failure.is_some() {
                    return;
                }
                if let (Some(n), Some(c)) = (normal, cell) {
                    match self.angle(n, c.line_of_sight) {
                        Ok(a) => *out = a as f32,
                        Err(e) => failure = Some(e.at_cell(row, col)),
                    }
                }
            });

        if let Some(e) = failure {
            return Err(e);
        }

        let raster = IncidenceAngleRaster {
            relative_orbit,
            grid,
            angles,
        };
        let stats = raster.statistics();
        log::info!(
            "✅ Relative orbit {}: {} valid cells, incidence {:.2}..{:.2} deg (mean {:.2})",
            relative_orbit,
            stats.valid,
            stats.min_deg,
            stats.max_deg,
            stats.mean_deg
        );
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geocentric::GeocentricTerrain;
    use crate::core::projection::utm_zone_for;
    use crate::types::{GeoTransform, TerrainGrid};
    use approx::assert_abs_diff_eq;

    fn flat_normal() -> SurfaceNormal {
        let transform = GeoTransform::north_up(500_000.0, 60_000.0, 30.0, 30.0);
        let terrain = TerrainGrid::new(Array2::zeros((3, 3)), transform, utm_zone_for(3.0, 0.5)).unwrap();
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();
        SurfaceNormals::from_geocentric(&geo).unwrap().get(1, 1).unwrap()
    }

    #[test]
    fn test_angle_along_and_against_normal() {
        let evaluator = IncidenceEvaluator::new(&IncidenceConfig::default());
        let n = flat_normal();
        let v = n.as_vector();

        assert_abs_diff_eq!(evaluator.angle(&n, v * 700_000.0).unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            evaluator.angle(&n, -v * 10.0).unwrap(),
            std::f64::consts::PI,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_perpendicular_line_of_sight_is_ninety_degrees() {
        let evaluator = IncidenceEvaluator::new(&IncidenceConfig::default());
        let n = flat_normal();
        let side = n.as_vector().cross(Vector3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(
            evaluator.angle(&n, side).unwrap(),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_zero_line_of_sight_is_rejected() {
        let evaluator = IncidenceEvaluator::new(&IncidenceConfig::default());
        assert!(matches!(
            evaluator.angle(&flat_normal(), Vector3::default()),
            Err(LiaError::LogicInvariantViolated(_))
        ));
    }

    #[test]
    fn test_statistics_skip_nodata() {
        let mut angles = Array2::from_elem((2, 2), 0.5f32);
        angles[[0, 0]] = f32::NAN;
        let raster = IncidenceAngleRaster {
            relative_orbit: 1,
            grid: GridSpec {
                rows: 2,
                cols: 2,
                transform: GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
                crs: crate::types::Crs::Geographic,
            },
            angles,
        };
        let stats = raster.statistics();
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.nodata, 1);
        assert_abs_diff_eq!(stats.mean_deg, 0.5f64.to_degrees(), epsilon = 1e-4);
    }
}
