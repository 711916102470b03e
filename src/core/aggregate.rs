use crate::core::incidence::IncidenceAngleRaster;
use crate::types::{GridSpec, LiaError, LiaResult, RelativeOrbit};
use ndarray::{Array3, ArrayView2, Axis};

/// Incidence rasters of several relative orbits on one grid
///
/// Bands are ordered by ascending relative orbit.
#[derive(Debug, Clone)]
pub struct LiaStack {
    orbits: Vec<RelativeOrbit>,
    grid: GridSpec,
    data: Array3<f32>,
}

impl LiaStack {
    /// Stack rasters, validating the whole set before building anything
    pub fn assemble(mut rasters: Vec<IncidenceAngleRaster>) -> LiaResult<Self> {
        let first = rasters
            .first()
            .ok_or_else(|| LiaError::InvalidParameter("no incidence rasters to stack".to_string()))?;
        let grid = first.grid;

        for raster in &rasters {
            if !raster.grid.is_identical(&grid) {
                return Err(LiaError::GridMismatch(format!(
                    "relative orbit {} is on {}x{} {} grid, expected {}x{} {}",
                    raster.relative_orbit,
                    raster.grid.rows,
                    raster.grid.cols,
                    raster.grid.crs,
                    grid.rows,
                    grid.cols,
                    grid.crs
                )));
            }
            if raster.angles.dim() != (grid.rows, grid.cols) {
                return Err(LiaError::GridMismatch(format!(
                    "relative orbit {} data shape {:?} does not match its grid",
                    raster.relative_orbit,
                    raster.angles.dim()
                )));
            }
        }

        rasters.sort_by_key(|r| r.relative_orbit);
        if let Some(pair) = rasters.windows(2).find(|p| p[0].relative_orbit == p[1].relative_orbit) {
            return Err(LiaError::InvalidParameter(format!(
                "relative orbit {} appears more than once",
                pair[0].relative_orbit
            )));
        }

        let orbits: Vec<RelativeOrbit> = rasters.iter().map(|r| r.relative_orbit).collect();
        let views: Vec<ArrayView2<f32>> = rasters.iter().map(|r| r.angles.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| LiaError::LogicInvariantViolated(format!("stacking rasters: {}", e)))?;

        log::info!("Stacked {} relative orbit(s): {:?}", orbits.len(), orbits);
        Ok(Self { orbits, grid, data })
    }

    pub fn orbits(&self) -> &[RelativeOrbit] {
        &self.orbits
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// (orbit, row, col)
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn band(&self, relative_orbit: RelativeOrbit) -> Option<ArrayView2<'_, f32>> {
        let index = self.orbits.binary_search(&relative_orbit).ok()?;
        Some(self.data.index_axis(Axis(0), index))
    }

    /// `lia_stack_orbits_<a>_<b>...` with ascending orbit ids
    pub fn name(&self) -> String {
        stack_name(&self.orbits)
    }
}

pub fn stack_name(orbits: &[RelativeOrbit]) -> String {
    let ids: Vec<String> = orbits.iter().map(|o| o.to_string()).collect();
    format!("lia_stack_orbits_{}", ids.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use ndarray::Array2;

    fn raster(orbit: RelativeOrbit, value: f32, top_left_x: f64) -> IncidenceAngleRaster {
        IncidenceAngleRaster {
            relative_orbit: orbit,
            grid: GridSpec {
                rows: 2,
                cols: 3,
                transform: GeoTransform::north_up(top_left_x, 100.0, 10.0, 10.0),
                crs: Crs::Utm { zone: 31, north: true },
            },
            angles: Array2::from_elem((2, 3), value),
        }
    }

    #[test]
    fn test_bands_sorted_by_orbit() {
        let stack = LiaStack::assemble(vec![raster(110, 0.3, 0.0), raster(8, 0.1, 0.0), raster(37, 0.2, 0.0)]).unwrap();
        assert_eq!(stack.orbits(), &[8, 37, 110]);
        assert_eq!(stack.data().dim(), (3, 2, 3));
        assert_eq!(stack.band(37).unwrap()[[1, 2]], 0.2);
        assert_eq!(stack.name(), "lia_stack_orbits_8_37_110");
        assert!(stack.band(9).is_none());
    }

    #[test]
    fn test_singleton_stack() {
        let stack = LiaStack::assemble(vec![raster(64, 0.5, 0.0)]).unwrap();
        assert_eq!(stack.orbits(), &[64]);
        assert_eq!(stack.name(), "lia_stack_orbits_64");
    }

    #[test]
    fn test_rejects_empty_duplicates_and_mismatch() {
        assert!(matches!(LiaStack::assemble(vec![]), Err(LiaError::InvalidParameter(_))));
        assert!(matches!(
            LiaStack::assemble(vec![raster(8, 0.1, 0.0), raster(8, 0.2, 0.0)]),
            Err(LiaError::InvalidParameter(_))
        ));
        assert!(matches!(
            LiaStack::assemble(vec![raster(8, 0.1, 0.0), raster(37, 0.2, 10.0)]),
            Err(LiaError::GridMismatch(_))
        ));
    }
}
