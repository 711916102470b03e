use crate::types::{BoundingBox, Crs, GeoTransform, LiaError, LiaResult, TerrainGrid};
use byteorder::{BigEndian, ByteOrder};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::io::Read;
use std::path::{Path, PathBuf};

/// HGT void marker
const HGT_VOID: i16 = -32768;

/// Provider of geographic (EPSG:4326) elevation samples
pub trait TerrainSource: Sync {
    /// Samples covering `bbox`, or `DataUnavailable`
    fn fetch(&self, bbox: &BoundingBox) -> LiaResult<TerrainGrid>;
}

/// Terrain already held in memory (tests, pre-warped DEMs)
pub struct InMemorySource {
    grid: TerrainGrid,
}

impl InMemorySource {
    pub fn new(grid: TerrainGrid) -> LiaResult<Self> {
        if grid.crs() != Crs::Geographic {
            return Err(LiaError::InvalidParameter(format!(
                "in-memory terrain source must be geographic, got {}",
                grid.crs()
            )));
        }
        Ok(Self { grid })
    }
}

impl TerrainSource for InMemorySource {
    fn fetch(&self, bbox: &BoundingBox) -> LiaResult<TerrainGrid> {
        match self.grid.grid().geographic_bounds() {
            Some(bounds) if bounds.contains(bbox) => Ok(self.grid.clone()),
            bounds => Err(LiaError::DataUnavailable(format!(
                "in-memory terrain covers {:?}, requested {:?}",
                bounds, bbox
            ))),
        }
    }
}

/// Directory of SRTM / NASADEM `.hgt` (or `.hgt.gz`) tiles
#[derive(Debug, Clone)]
pub struct HgtTileSource {
    tile_dir: PathBuf,
}

impl HgtTileSource {
    pub fn new<P: AsRef<Path>>(tile_dir: P) -> LiaResult<Self> {
        let tile_dir = tile_dir.as_ref().to_path_buf();

        // Fail early if the directory holds no height files at all
        let has_height_files = std::fs::read_dir(&tile_dir)
            .map_err(|e| {
                LiaError::DataUnavailable(format!("cannot read tile directory {}: {}", tile_dir.display(), e))
            })?
            .filter_map(|entry| entry.ok())
            .any(|entry| {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                name.ends_with(".hgt") || name.ends_with(".hgt.gz")
            });

        if !has_height_files {
            return Err(LiaError::DataUnavailable(format!(
                "no .hgt tiles in {}",
                tile_dir.display()
            )));
        }
        Ok(Self { tile_dir })
    }

    /// SRTM naming convention: N/S latitude, E/W longitude of the SW corner
    pub fn tile_name(lat: i32, lon: i32) -> String {
        let lat_prefix = if lat >= 0 { "N" } else { "S" };
        let lon_prefix = if lon >= 0 { "E" } else { "W" };
        format!("{}{:02}{}{:03}", lat_prefix, lat.abs(), lon_prefix, lon.abs())
    }

    /// SW corners (lat, lon) of the 1x1 degree tiles touching `bbox`
    fn calculate_tiles(bbox: &BoundingBox) -> Vec<(i32, i32)> {
        let min_lat = bbox.min_lat.floor() as i32;
        let max_lat = (bbox.max_lat.ceil() as i32).max(min_lat + 1);
        let min_lon = bbox.min_lon.floor() as i32;
        let max_lon = (bbox.max_lon.ceil() as i32).max(min_lon + 1);

        let mut tiles = Vec::new();
        for lat in min_lat..max_lat {
            for lon in min_lon..max_lon {
                tiles.push((lat, lon));
            }
        }
        tiles
    }

    fn find_tile_file(&self, name: &str) -> Option<PathBuf> {
        [
            format!("{}.hgt", name),
            format!("{}.HGT", name),
            format!("{}.hgt.gz", name),
        ]
        .iter()
        .map(|f| self.tile_dir.join(f))
        .find(|p| p.exists())
    }

    /// Read a tile, returning (samples per side, row-major samples)
    pub fn read_tile(path: &Path) -> LiaResult<(usize, Vec<i16>)> {
        let raw = std::fs::read(path)?;
        let bytes = if Self::is_gzip_content(&raw) {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            decoded
        } else {
            raw
        };

        let size = match bytes.len() {
            n if n == 3601 * 3601 * 2 => 3601,
            n if n == 1201 * 1201 * 2 => 1201,
            n => {
                return Err(LiaError::InvalidFormat(format!(
                    "invalid HGT file length {} for {}",
                    n,
                    path.display()
                )))
            }
        };

        let mut samples = vec![0i16; size * size];
        BigEndian::read_i16_into(&bytes, &mut samples);
        Ok((size, samples))
    }

    fn is_gzip_content(content: &[u8]) -> bool {
        content.len() >= 2 && content[0] == 0x1f && content[1] == 0x8b
    }
}

impl TerrainSource for HgtTileSource {
    fn fetch(&self, bbox: &BoundingBox) -> LiaResult<TerrainGrid> {
        let tiles = Self::calculate_tiles(bbox);
        log::info!("Mosaicking {} HGT tile(s) for {:?}", tiles.len(), bbox);

        let mut loaded = Vec::with_capacity(tiles.len());
        let mut size = None;
        for &(lat, lon) in &tiles {
            let name = Self::tile_name(lat, lon);
            let path = self.find_tile_file(&name).ok_or_else(|| {
                LiaError::DataUnavailable(format!(
                    "missing elevation tile {} in {}",
                    name,
                    self.tile_dir.display()
                ))
            })?;
            log::debug!("Reading tile {}", path.display());
            let (tile_size, samples) = Self::read_tile(&path)?;
            match size {
                None => size = Some(tile_size),
                Some(s) if s != tile_size => {
                    return Err(LiaError::InvalidFormat(format!(
                        "mixed tile resolutions ({} and {} samples)",
                        s, tile_size
                    )))
                }
                _ => {}
            }
            loaded.push((lat, lon, samples));
        }

        let size = size.ok_or_else(|| LiaError::DataUnavailable(format!("no tiles for {:?}", bbox)))?;
        let per_degree = (size - 1) as i64;
        let spd = per_degree as f64;

        let lat_lo = tiles.iter().map(|t| t.0).min().unwrap_or(0) as i64;
        let lat_hi = tiles.iter().map(|t| t.0).max().unwrap_or(0) as i64 + 1;
        let lon_lo = tiles.iter().map(|t| t.1).min().unwrap_or(0) as i64;
        let lon_hi = tiles.iter().map(|t| t.1).max().unwrap_or(0) as i64 + 1;

        let total_rows = (lat_hi - lat_lo) * per_degree + 1;
        let total_cols = (lon_hi - lon_lo) * per_degree + 1;

        // Crop window in mosaic sample indices, one sample of margin
        let c0 = (((bbox.min_lon - lon_lo as f64) * spd).floor() as i64 - 1).clamp(0, total_cols - 1);
        let c1 = (((bbox.max_lon - lon_lo as f64) * spd).ceil() as i64 + 1).clamp(0, total_cols - 1);
        let r0 = (((lat_hi as f64 - bbox.max_lat) * spd).floor() as i64 - 1).clamp(0, total_rows - 1);
        let r1 = (((lat_hi as f64 - bbox.min_lat) * spd).ceil() as i64 + 1).clamp(0, total_rows - 1);

        let rows = (r1 - r0 + 1) as usize;
        let cols = (c1 - c0 + 1) as usize;
        let mut mosaic = Array2::<f32>::from_elem((rows, cols), f32::NAN);

        for (lat, lon, samples) in &loaded {
            let row_offset = (lat_hi - (*lat as i64 + 1)) * per_degree;
            let col_offset = (*lon as i64 - lon_lo) * per_degree;
            for r in 0..size {
                let gr = row_offset + r as i64;
                if gr < r0 || gr > r1 {
                    continue;
                }
                for c in 0..size {
                    let gc = col_offset + c as i64;
                    if gc < c0 || gc > c1 {
                        continue;
                    }
                    let v = samples[r * size + c];
                    mosaic[[(gr - r0) as usize, (gc - c0) as usize]] =
                        if v == HGT_VOID { f32::NAN } else { v as f32 };
                }
            }
        }

        let transform = GeoTransform::north_up(
            lon_lo as f64 + (c0 as f64 - 0.5) / spd,
            lat_hi as f64 - (r0 as f64 - 0.5) / spd,
            1.0 / spd,
            1.0 / spd,
        );
        TerrainGrid::new(mosaic, transform, Crs::Geographic)
    }
}

/// Any GDAL-readable DEM in geographic coordinates
#[cfg(feature = "gdal")]
pub struct GdalDemSource {
    path: PathBuf,
}

#[cfg(feature = "gdal")]
impl GdalDemSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[cfg(feature = "gdal")]
impl TerrainSource for GdalDemSource {
    fn fetch(&self, bbox: &BoundingBox) -> LiaResult<TerrainGrid> {
        use gdal::Dataset;

        log::info!("Reading DEM from: {}", self.path.display());
        let dataset = Dataset::open(&self.path).map_err(|e| {
            LiaError::DataUnavailable(format!("cannot open DEM {}: {}", self.path.display(), e))
        })?;
        let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();

        let col0 = (((bbox.min_lon - gt.top_left_x) / gt.pixel_width).floor() as isize - 1).max(0);
        let col1 = ((((bbox.max_lon - gt.top_left_x) / gt.pixel_width).ceil() as isize) + 1).min(width as isize);
        let row0 = (((bbox.max_lat - gt.top_left_y) / gt.pixel_height).floor() as isize - 1).max(0);
        let row1 = ((((bbox.min_lat - gt.top_left_y) / gt.pixel_height).ceil() as isize) + 1).min(height as isize);
        if col1 <= col0 || row1 <= row0 {
            return Err(LiaError::DataUnavailable(format!(
                "DEM {} does not intersect {:?}",
                self.path.display(),
                bbox
            )));
        }
        let window_size = ((col1 - col0) as usize, (row1 - row0) as usize);

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>((col0, row0), window_size, window_size, None)?;

        let dem_array = Array2::from_shape_vec((window_size.1, window_size.0), band_data.data)
            .map_err(|e| LiaError::InvalidFormat(format!("Failed to reshape DEM data: {}", e)))?;

        let transform = GeoTransform {
            top_left_x: gt.top_left_x + col0 as f64 * gt.pixel_width,
            top_left_y: gt.top_left_y + row0 as f64 * gt.pixel_height,
            ..gt
        };
        TerrainGrid::with_nodata(dem_array, nodata, transform, Crs::Geographic)
    }
}
