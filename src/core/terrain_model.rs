use crate::core::projection::{from_geographic, to_geographic, utm_zone_for};
use crate::io::dem::TerrainSource;
use crate::types::{BoundingBox, Crs, GeoTransform, GridSpec, LiaError, LiaResult, TerrainGrid};
use geo::{BoundingRect, Polygon};
use ndarray::{Array2, Zip};

/// Points per bounding-box edge when projecting envelopes
const EDGE_DENSIFY: usize = 32;

/// Builds a UTM terrain model for an area of interest from a geographic source
pub struct TerrainModelBuilder<'a> {
    source: &'a dyn TerrainSource,
    /// Output pixel spacing in meters
    spacing: f64,
}

impl<'a> TerrainModelBuilder<'a> {
    pub fn new(source: &'a dyn TerrainSource, spacing: f64) -> LiaResult<Self> {
        if !(spacing > 0.0 && spacing.is_finite()) {
            return Err(LiaError::InvalidParameter(format!(
                "terrain spacing must be positive, got {}",
                spacing
            )));
        }
        Ok(Self { source, spacing })
    }

    /// Output grid for `aoi`: UTM zone of the bounding-box centroid,
    /// envelope snapped outward to multiples of the spacing
    pub fn target_grid(&self, aoi: &Polygon<f64>) -> LiaResult<GridSpec> {
        let bbox = aoi_bounds(aoi)?;
        let (center_lon, center_lat) = bbox.center();
        let crs = utm_zone_for(center_lon, center_lat);

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (lon, lat) in densified_ring(&bbox) {
            let (x, y) = from_geographic(crs, lon, lat);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let s = self.spacing;
        let x0 = (min_x / s).floor() * s;
        let x1 = (max_x / s).ceil() * s;
        let y0 = (min_y / s).floor() * s;
        let y1 = (max_y / s).ceil() * s;
        let cols = (((x1 - x0) / s).round() as usize).max(1);
        let rows = (((y1 - y0) / s).round() as usize).max(1);

        Ok(GridSpec {
            rows,
            cols,
            transform: GeoTransform::north_up(x0, y0 + rows as f64 * s, s, s),
            crs,
        })
    }

    /// Build the terrain grid covering `aoi`
    pub fn build(&self, aoi: &Polygon<f64>) -> LiaResult<TerrainGrid> {
        let grid = self.target_grid(aoi)?;
        log::info!(
            "Building terrain model: {}x{} cells at {:.1}m in {}",
            grid.rows, grid.cols, self.spacing, grid.crs
        );

        let request = self.source_request(&grid)?;
        log::debug!("Requesting elevation samples for {:?}", request);
        let source = self.source.fetch(&request)?;

        let coverage = source.grid().geographic_bounds().ok_or_else(|| {
            LiaError::InvalidFormat(format!(
                "terrain source must deliver geographic samples, got {}",
                source.crs()
            ))
        })?;
        if !coverage.contains(&request) {
            return Err(LiaError::DataUnavailable(format!(
                "terrain source covers {:?}, need {:?}",
                coverage, request
            )));
        }

        let elevation = resample_bilinear(&source, &grid);
        let nodata = elevation.iter().filter(|v| v.is_nan()).count();
        if nodata > 0 {
            log::warn!("Terrain model has {} no-data cells of {}", nodata, elevation.len());
        }

        TerrainGrid::new(elevation, grid.transform, grid.crs)
    }

    /// Geographic box to request from the source: envelope of the output grid
    /// plus two output cells
    fn source_request(&self, grid: &GridSpec) -> LiaResult<BoundingBox> {
        let t = &grid.transform;
        let corners = BoundingBox {
            min_lon: t.top_left_x,
            max_lon: t.top_left_x + grid.cols as f64 * t.pixel_width,
            min_lat: t.top_left_y + grid.rows as f64 * t.pixel_height,
            max_lat: t.top_left_y,
        };

        let (mut min_lon, mut min_lat) = (f64::INFINITY, f64::INFINITY);
        let (mut max_lon, mut max_lat) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in densified_ring(&corners) {
            let (lon, lat) = to_geographic(grid.crs, x, y);
            min_lon = min_lon.min(lon);
            min_lat = min_lat.min(lat);
            max_lon = max_lon.max(lon);
            max_lat = max_lat.max(lat);
        }

        let center_lat = (min_lat + max_lat) / 2.0;
        let meters_per_degree_lon = 111_320.0 * center_lat.to_radians().cos().max(0.01);
        let margin = (2.0 * self.spacing / meters_per_degree_lon).max(0.001);

        BoundingBox::new(min_lon, min_lat, max_lon, max_lat).map(|b| b.expand(margin))
    }
}

fn aoi_bounds(aoi: &Polygon<f64>) -> LiaResult<BoundingBox> {
    let rect = aoi
        .bounding_rect()
        .ok_or_else(|| LiaError::InvalidParameter("area of interest is empty".to_string()))?;
    BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
}

/// Points along the boundary of `bbox` (x = lon/easting, y = lat/northing)
fn densified_ring(bbox: &BoundingBox) -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(4 * (EDGE_DENSIFY + 1));
    for i in 0..=EDGE_DENSIFY {
        let f = i as f64 / EDGE_DENSIFY as f64;
        let x = bbox.min_lon + f * (bbox.max_lon - bbox.min_lon);
        let y = bbox.min_lat + f * (bbox.max_lat - bbox.min_lat);
        points.push((x, bbox.min_lat));
        points.push((x, bbox.max_lat));
        points.push((bbox.min_lon, y));
        points.push((bbox.max_lon, y));
    }
    points
}

/// Resample a geographic source onto `grid` cell centres
fn resample_bilinear(source: &TerrainGrid, grid: &GridSpec) -> Array2<f32> {
    let mut out = Array2::<f32>::from_elem((grid.rows, grid.cols), f32::NAN);
    let zip = Zip::indexed(&mut out);

    let sample = |(row, col): (usize, usize), value: &mut f32| {
        let (x, y) = grid.transform.cell_center(row, col);
        let (lon, lat) = to_geographic(grid.crs, x, y);
        if let Some(h) = bilinear_at(source, lon, lat) {
            *value = h as f32;
        }
    };

    #[cfg(feature = "parallel")]
    zip.par_for_each(sample);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(sample);

    out
}

/// Bilinear elevation at map coordinates of `grid`'s CRS
///
/// `None` outside the sample centres or when any contributing sample is no-data.
pub fn bilinear_at(grid: &TerrainGrid, x: f64, y: f64) -> Option<f64> {
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 {
        return None;
    }
    let (row, col) = grid.grid().transform.fractional_index(x, y);

    if !(row >= 0.0 && col >= 0.0 && row <= (rows - 1) as f64 && col <= (cols - 1) as f64) {
        return None;
    }

    let y1 = row.floor() as usize;
    let x1 = col.floor() as usize;
    let y2 = (y1 + 1).min(rows - 1);
    let x2 = (x1 + 1).min(cols - 1);

    let dx = col - x1 as f64;
    let dy = row - y1 as f64;

    let v11 = grid.get(y1, x1)?;
    let v12 = grid.get(y2, x1)?;
    let v21 = grid.get(y1, x2)?;
    let v22 = grid.get(y2, x2)?;

    Some(
        v11 * (1.0 - dx) * (1.0 - dy)
            + v21 * dx * (1.0 - dy)
            + v12 * (1.0 - dx) * dy
            + v22 * dx * dy,
    )
}

/// CRS the builder would pick for `aoi`
pub fn estimate_utm_crs(aoi: &Polygon<f64>) -> LiaResult<Crs> {
    let (lon, lat) = aoi_bounds(aoi)?.center();
    Ok(utm_zone_for(lon, lat))
}
