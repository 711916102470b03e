//! Terrain in Earth-centred Earth-fixed coordinates and its surface normals

use crate::core::projection::{geodetic_to_ecef, to_geographic};
use crate::types::{GridSpec, LiaError, LiaResult, TerrainGrid, Vector3};
use ndarray::{Array2, Zip};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// ECEF position of every terrain cell, `None` where the terrain is no-data
#[derive(Debug, Clone)]
pub struct GeocentricTerrain {
    positions: Array2<Option<Vector3>>,
    grid: GridSpec,
}

/// Outward surface vector of a cell whose magnitude is the cell area (m^2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedArea(Vector3);

/// Unit outward surface normal
///
/// Only obtainable by normalizing an [`OrientedArea`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceNormal(Vector3);

impl OrientedArea {
    pub fn as_vector(&self) -> Vector3 {
        self.0
    }

    pub fn area(&self) -> f64 {
        self.0.norm()
    }

    pub fn normal(&self) -> Option<SurfaceNormal> {
        self.0.normalized().map(SurfaceNormal)
    }
}

impl SurfaceNormal {
    pub fn as_vector(&self) -> Vector3 {
        self.0
    }
}

impl GeocentricTerrain {
    /// Convert map-projected elevations to ECEF, treating elevation as
    /// ellipsoidal height
    pub fn from_terrain(terrain: &TerrainGrid) -> LiaResult<Self> {
        let grid = *terrain.grid();
        let mut positions = Array2::<Option<Vector3>>::from_elem(terrain.dim(), None);

        let convert = |(row, col): (usize, usize), out: &mut Option<Vector3>| {
            if let Some(h) = terrain.get(row, col) {
                let (x, y) = grid.transform.cell_center(row, col);
                let (lon, lat) = to_geographic(grid.crs, x, y);
                *out = Some(geodetic_to_ecef(lat, lon, h));
            }
        };

        let zip = Zip::indexed(&mut positions);
        #[cfg(feature = "parallel")]
        zip.par_for_each(convert);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(convert);

        if let Some(bad) = positions.iter().flatten().find(|p| !p.norm().is_finite()) {
            return Err(LiaError::InvalidFormat(format!(
                "non-finite geocentric position {:?}",
                bad
            )));
        }

        Ok(Self { positions, grid })
    }

    pub fn positions(&self) -> &Array2<Option<Vector3>> {
        &self.positions
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Vector3> {
        self.positions[[row, col]]
    }

    pub fn valid_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }

    /// Tangent across (prev, self, next): central difference when both
    /// neighbours are valid, one-sided when only one is
    fn tangent(prev: Option<Vector3>, here: Vector3, next: Option<Vector3>) -> Option<Vector3> {
        match (prev, next) {
            (Some(p), Some(n)) => Some((n - p) * 0.5),
            (None, Some(n)) => Some(n - here),
            (Some(p), None) => Some(here - p),
            (None, None) => None,
        }
    }

    /// Oriented area of cell (row, col)
    ///
    /// `Ok(None)` for a no-data cell, `GeometryDegenerate` when a tangent
    /// cannot be formed along one of the axes.
    pub fn oriented_area(&self, row: usize, col: usize) -> LiaResult<Option<OrientedArea>> {
        let here = match self.get(row, col) {
            Some(p) => p,
            None => return Ok(None),
        };
        let (rows, cols) = self.positions.dim();

        let left = if col > 0 { self.get(row, col - 1) } else { None };
        let right = if col + 1 < cols { self.get(row, col + 1) } else { None };
        let up = if row > 0 { self.get(row - 1, col) } else { None };
        let down = if row + 1 < rows { self.get(row + 1, col) } else { None };

        let along_cols = Self::tangent(left, here, right);
        let along_rows = Self::tangent(up, here, down);
        let (tx, ty) = match (along_cols, along_rows) {
            (Some(tx), Some(ty)) => (tx, ty),
            _ => return Err(LiaError::GeometryDegenerate { row, col }),
        };

        // Columns and rows run along pixel_width and pixel_height; for a
        // north-up grid (east, south) the raw cross product points down.
        let t = &self.grid.transform;
        let orientation = (t.pixel_width * t.pixel_height).signum();
        let area = tx.cross(ty) * orientation;

        if area.norm() == 0.0 {
            return Err(LiaError::GeometryDegenerate { row, col });
        }
        if area.dot(here) <= 0.0 {
            return Err(LiaError::LogicInvariantViolated(format!(
                "surface normal at cell ({}, {}) points towards the Earth's centre",
                row, col
            )));
        }
        Ok(Some(OrientedArea(area)))
    }
}

/// Unit normals of a geocentric terrain
#[derive(Debug, Clone)]
pub struct SurfaceNormals {
    normals: Array2<Option<SurfaceNormal>>,
    grid: GridSpec,
    degenerate: usize,
}

impl SurfaceNormals {
    /// Normal of every valid cell; degenerate cells become no-data
    pub fn from_geocentric(terrain: &GeocentricTerrain) -> LiaResult<Self> {
        let (rows, cols) = terrain.positions().dim();

        let row_normals = |row: usize| -> LiaResult<(Vec<Option<SurfaceNormal>>, usize)> {
            let mut out = Vec::with_capacity(cols);
            let mut degenerate = 0;
            for col in 0..cols {
                match terrain.oriented_area(row, col) {
                    Ok(area) => out.push(area.and_then(|a| a.normal())),
                    Err(LiaError::GeometryDegenerate { .. }) => {
                        degenerate += 1;
                        out.push(None);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok((out, degenerate))
        };

        #[cfg(feature = "parallel")]
        let results: Vec<LiaResult<_>> = (0..rows).into_par_iter().map(row_normals).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<LiaResult<_>> = (0..rows).map(row_normals).collect();

        let mut flat = Vec::with_capacity(rows * cols);
        let mut degenerate = 0;
        for result in results {
            let (row, count) = result?;
            flat.extend(row);
            degenerate += count;
        }

        if degenerate > 0 {
            log::warn!("{} terrain cells have degenerate geometry and are treated as no-data", degenerate);
        }

        let normals = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| LiaError::LogicInvariantViolated(format!("normal grid shape: {}", e)))?;

        Ok(Self {
            normals,
            grid: *terrain.grid(),
            degenerate,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<SurfaceNormal> {
        self.normals[[row, col]]
    }

    pub fn normals(&self) -> &Array2<Option<SurfaceNormal>> {
        &self.normals
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn degenerate_count(&self) -> usize {
        self.degenerate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::{geodetic_up, utm_zone_for};
    use crate::types::{Crs, GeoTransform};
    use approx::assert_abs_diff_eq;

    fn flat_terrain(rows: usize, cols: usize, spacing: f64) -> TerrainGrid {
        let crs = utm_zone_for(3.0, 0.5);
        let transform = GeoTransform::north_up(500_000.0, 60_000.0, spacing, spacing);
        TerrainGrid::new(Array2::zeros((rows, cols)), transform, crs).unwrap()
    }

    #[test]
    fn test_flat_normals_are_vertical_unit_vectors() {
        let terrain = flat_terrain(5, 5, 30.0);
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();
        let normals = SurfaceNormals::from_geocentric(&geo).unwrap();

        for row in 0..5 {
            for col in 0..5 {
                let n = normals.get(row, col).unwrap().as_vector();
                assert_abs_diff_eq!(n.norm(), 1.0, epsilon = 1e-9);

                let (x, y) = terrain.grid().transform.cell_center(row, col);
                let (lon, lat) = to_geographic(terrain.crs(), x, y);
                let up = geodetic_up(lat, lon);
                // UTM grid convergence and scale only tilt the normal slightly
                assert!(n.dot(up) > 0.999_999, "cell ({}, {})", row, col);
            }
        }
    }

    #[test]
    fn test_oriented_area_matches_cell_size() {
        let terrain = flat_terrain(3, 3, 30.0);
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();
        let area = geo.oriented_area(1, 1).unwrap().unwrap();
        // UTM scale factor near the central meridian is 0.9996
        let expected = (30.0 / 0.9996_f64).powi(2);
        assert_abs_diff_eq!(area.area(), expected, epsilon = 1.0);
    }

    #[test]
    fn test_south_up_grid_still_points_outward() {
        let crs = Crs::Geographic;
        let transform = GeoTransform {
            top_left_x: 3.0,
            pixel_width: 0.001,
            rotation_x: 0.0,
            top_left_y: 0.5,
            rotation_y: 0.0,
            pixel_height: 0.001,
        };
        let terrain = TerrainGrid::new(Array2::zeros((3, 3)), transform, crs).unwrap();
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();
        let n = SurfaceNormals::from_geocentric(&geo).unwrap().get(1, 1).unwrap();
        assert!(n.as_vector().dot(geo.get(1, 1).unwrap()) > 0.0);
    }

    #[test]
    fn test_isolated_cell_is_degenerate() {
        let mut dem = Array2::<f32>::from_elem((3, 3), f32::NAN);
        dem[[1, 1]] = 10.0;
        dem[[0, 1]] = 10.0;
        let transform = GeoTransform::north_up(500_000.0, 60_000.0, 30.0, 30.0);
        let terrain = TerrainGrid::new(dem, transform, utm_zone_for(3.0, 0.5)).unwrap();
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();

        assert!(matches!(
            geo.oriented_area(1, 1),
            Err(LiaError::GeometryDegenerate { row: 1, col: 1 })
        ));
        assert_eq!(geo.oriented_area(2, 2).unwrap(), None);

        let normals = SurfaceNormals::from_geocentric(&geo).unwrap();
        assert_eq!(normals.degenerate_count(), 2);
        assert!(normals.normals().iter().all(|n| n.is_none()));
    }

    #[test]
    fn test_one_sided_difference_at_edges() {
        let terrain = flat_terrain(2, 2, 10.0);
        let geo = GeocentricTerrain::from_terrain(&terrain).unwrap();
        let normals = SurfaceNormals::from_geocentric(&geo).unwrap();
        assert_eq!(normals.degenerate_count(), 0);
        assert!(normals.normals().iter().all(|n| n.is_some()));
    }
}
