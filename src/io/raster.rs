//! Persistence of incidence rasters, stacks and the terrain model they were
//! computed on
//!
//! Every file is written to a temporary name in its destination directory and
//! renamed into place once complete, so readers never see partial outputs.

use crate::core::aggregate::{stack_name, LiaStack};
use crate::core::incidence::IncidenceAngleRaster;
use crate::types::{Crs, GridSpec, LiaError, LiaResult, RelativeOrbit, TerrainGrid};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output format for incidence rasters and stacks
pub trait RasterSink: Sync {
    /// File extension of single-orbit rasters
    fn extension(&self) -> &'static str;

    /// File extension of stacks
    fn stack_extension(&self) -> &'static str {
        self.extension()
    }

    fn write_raster(&self, raster: &IncidenceAngleRaster, dir: &Path) -> LiaResult<PathBuf>;

    fn write_stack(&self, stack: &LiaStack, dir: &Path) -> LiaResult<PathBuf>;

    /// Projected elevation model, kept next to the angle rasters as reference
    fn write_terrain(&self, terrain: &TerrainGrid, dir: &Path) -> LiaResult<PathBuf>;
}

/// Base name of the persisted terrain model
pub const TERRAIN_NAME: &str = "dem_utm";

/// `<dir>/dem_utm.<ext>`
pub fn terrain_path(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", TERRAIN_NAME, extension))
}

/// `<dir>/<orbit>.<ext>`
pub fn raster_path(dir: &Path, relative_orbit: RelativeOrbit, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", relative_orbit, extension))
}

/// `<dir>/lia_stack_orbits_<a>_<b>....<ext>`
pub fn stack_path(dir: &Path, orbits: &[RelativeOrbit], extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", stack_name(orbits), extension))
}

/// Write `target` through a temporary file in the same directory
fn write_atomically<F>(target: &Path, write: F) -> LiaResult<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> LiaResult<()>,
{
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".sarlia-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| LiaError::Io(e.error))?;
    Ok(())
}

const ANGLE_DESCRIPTION: &str = "Local incidence angle [rad]";
const TERRAIN_DESCRIPTION: &str = "Elevation [m]";

/// ENVI flat binary (`.img`, little-endian float32, band sequential) with
/// a `.hdr` sidecar. Pure Rust, readable by GDAL and QGIS.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnviSink;

impl EnviSink {
    fn map_info(grid: &GridSpec) -> String {
        let t = &grid.transform;
        match grid.crs {
            Crs::Geographic => format!(
                "{{Geographic Lat/Lon, 1, 1, {}, {}, {}, {}, WGS-84, units=Degrees}}",
                t.top_left_x,
                t.top_left_y,
                t.pixel_width,
                t.pixel_height.abs()
            ),
            Crs::Utm { zone, north } => format!(
                "{{UTM, 1, 1, {}, {}, {}, {}, {}, {}, WGS-84, units=Meters}}",
                t.top_left_x,
                t.top_left_y,
                t.pixel_width,
                t.pixel_height.abs(),
                zone,
                if north { "North" } else { "South" }
            ),
        }
    }

    /// ENVI header text
    pub fn header(grid: &GridSpec, description: &str, band_names: &[String]) -> String {
        let mut hdr = String::new();
        hdr.push_str("ENVI\n");
        hdr.push_str(&format!("description = {{{}}}\n", description));
        hdr.push_str(&format!("samples = {}\n", grid.cols));
        hdr.push_str(&format!("lines = {}\n", grid.rows));
        hdr.push_str(&format!("bands = {}\n", band_names.len()));
        hdr.push_str("header offset = 0\n");
        hdr.push_str("file type = ENVI Standard\n");
        hdr.push_str("data type = 4\n");
        hdr.push_str("interleave = bsq\n");
        hdr.push_str("byte order = 0\n");
        hdr.push_str(&format!("map info = {}\n", Self::map_info(grid)));
        hdr.push_str(&format!("band names = {{{}}}\n", band_names.join(", ")));
        hdr.push_str("data ignore value = nan\n");
        hdr
    }

    fn header_path(image: &Path) -> PathBuf {
        image.with_extension("hdr")
    }

    fn write<'a, I>(
        image: &Path,
        grid: &GridSpec,
        description: &str,
        band_names: &[String],
        values: I,
    ) -> LiaResult<()>
    where
        I: Iterator<Item = &'a f32>,
    {
        write_atomically(image, |w| {
            for &v in values {
                w.write_f32::<LittleEndian>(v)?;
            }
            Ok(())
        })?;
        let header = Self::header(grid, description, band_names);
        write_atomically(&Self::header_path(image), |w| {
            w.write_all(header.as_bytes())?;
            Ok(())
        })
    }
}

impl RasterSink for EnviSink {
    fn extension(&self) -> &'static str {
        "img"
    }

    fn write_raster(&self, raster: &IncidenceAngleRaster, dir: &Path) -> LiaResult<PathBuf> {
        let path = raster_path(dir, raster.relative_orbit, self.extension());
        let band = vec![format!("orbit_{}", raster.relative_orbit)];
        Self::write(&path, &raster.grid, ANGLE_DESCRIPTION, &band, raster.angles.iter())?;
        log::info!("💾 Wrote {}", path.display());
        Ok(path)
    }

    fn write_stack(&self, stack: &LiaStack, dir: &Path) -> LiaResult<PathBuf> {
        let path = stack_path(dir, stack.orbits(), self.stack_extension());
        let bands: Vec<String> = stack.orbits().iter().map(|o| format!("orbit_{}", o)).collect();
        Self::write(&path, stack.grid(), ANGLE_DESCRIPTION, &bands, stack.data().iter())?;
        log::info!("💾 Wrote stack {}", path.display());
        Ok(path)
    }

    fn write_terrain(&self, terrain: &TerrainGrid, dir: &Path) -> LiaResult<PathBuf> {
        let path = terrain_path(dir, self.extension());
        let band = vec!["elevation".to_string()];
        Self::write(&path, terrain.grid(), TERRAIN_DESCRIPTION, &band, terrain.elevation().iter())?;
        log::info!("💾 Wrote terrain model {}", path.display());
        Ok(path)
    }
}

/// DEFLATE-compressed GeoTIFF per orbit, netCDF stack
#[cfg(feature = "gdal")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalSink;

#[cfg(feature = "gdal")]
impl GdalSink {
    fn write_bands<'a, I>(
        driver_name: &str,
        options: &[gdal::raster::RasterCreationOption],
        target: &Path,
        grid: &GridSpec,
        bands: I,
    ) -> LiaResult<()>
    where
        I: ExactSizeIterator<Item = (String, ndarray::ArrayView2<'a, f32>)>,
    {
        use gdal::spatial_ref::SpatialRef;
        use gdal::{DriverManager, Metadata};

        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let suffix = target
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let tmp = tempfile::Builder::new().prefix(".sarlia-").suffix(&suffix).tempfile_in(dir)?;

        {
            let driver = DriverManager::get_driver_by_name(driver_name)?;
            let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
                tmp.path(),
                grid.cols as isize,
                grid.rows as isize,
                bands.len() as isize,
                options,
            )?;
            dataset.set_geo_transform(&grid.transform.to_gdal())?;
            dataset.set_spatial_ref(&SpatialRef::from_epsg(grid.crs.epsg())?)?;

            for (index, (name, band)) in bands.enumerate() {
                let mut rasterband = dataset.rasterband(index as isize + 1)?;
                let flat_data: Vec<f32> = band.iter().cloned().collect();
                let buffer = gdal::raster::Buffer::new((grid.cols, grid.rows), flat_data);
                rasterband.write((0, 0), (grid.cols, grid.rows), &buffer)?;
                rasterband.set_no_data_value(Some(f64::NAN))?;
                rasterband.set_description(&name)?;
            }
        }

        tmp.persist(target).map_err(|e| LiaError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(feature = "gdal")]
impl RasterSink for GdalSink {
    fn extension(&self) -> &'static str {
        "tif"
    }

    fn stack_extension(&self) -> &'static str {
        "nc"
    }

    fn write_raster(&self, raster: &IncidenceAngleRaster, dir: &Path) -> LiaResult<PathBuf> {
        use gdal::raster::RasterCreationOption;

        let path = raster_path(dir, raster.relative_orbit, self.extension());
        let options = [
            RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
            RasterCreationOption { key: "TILED", value: "YES" },
        ];
        let bands = std::iter::once((format!("orbit_{}", raster.relative_orbit), raster.angles.view()));
        Self::write_bands("GTiff", &options, &path, &raster.grid, bands)?;
        log::info!("💾 Wrote {}", path.display());
        Ok(path)
    }

    fn write_stack(&self, stack: &LiaStack, dir: &Path) -> LiaResult<PathBuf> {
        let path = stack_path(dir, stack.orbits(), self.stack_extension());
        let bands: Vec<(String, ndarray::ArrayView2<f32>)> = stack
            .orbits()
            .iter()
            .filter_map(|&o| stack.band(o).map(|b| (format!("orbit_{}", o), b)))
            .collect();
        Self::write_bands("netCDF", &[], &path, stack.grid(), bands.into_iter())?;
        log::info!("💾 Wrote stack {}", path.display());
        Ok(path)
    }

    fn write_terrain(&self, terrain: &TerrainGrid, dir: &Path) -> LiaResult<PathBuf> {
        use gdal::raster::RasterCreationOption;

        let path = terrain_path(dir, self.extension());
        let options = [
            RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
            RasterCreationOption { key: "TILED", value: "YES" },
        ];
        let bands = std::iter::once(("elevation".to_string(), terrain.elevation().view()));
        Self::write_bands("GTiff", &options, &path, terrain.grid(), bands)?;
        log::info!("💾 Wrote terrain model {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use byteorder::ReadBytesExt;
    use ndarray::Array2;

    fn raster(orbit: RelativeOrbit) -> IncidenceAngleRaster {
        let mut angles = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f32 * 0.1);
        angles[[1, 1]] = f32::NAN;
        IncidenceAngleRaster {
            relative_orbit: orbit,
            grid: GridSpec {
                rows: 2,
                cols: 3,
                transform: GeoTransform::north_up(499_980.0, 5_500_020.0, 10.0, 10.0),
                crs: Crs::Utm { zone: 33, north: true },
            },
            angles,
        }
    }

    #[test]
    fn test_envi_raster_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = EnviSink.write_raster(&raster(95), dir.path()).unwrap();
        assert_eq!(path, dir.path().join("95.img"));

        let header = std::fs::read_to_string(dir.path().join("95.hdr")).unwrap();
        assert!(header.starts_with("ENVI\n"));
        assert!(header.contains("samples = 3\n"));
        assert!(header.contains("lines = 2\n"));
        assert!(header.contains("map info = {UTM, 1, 1, 499980, 5500020, 10, 10, 33, North, WGS-84, units=Meters}"));
        assert!(header.contains("band names = {orbit_95}"));

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 6 * 4);
        let mut cursor = std::io::Cursor::new(bytes);
        let values: Vec<f32> = (0..6).map(|_| cursor.read_f32::<LittleEndian>().unwrap()).collect();
        assert_eq!(values[2], 0.2);
        assert!(values[4].is_nan());

        // No temporary files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".sarlia-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_envi_stack_name_and_bands() {
        let dir = tempfile::tempdir().unwrap();
        let stack = LiaStack::assemble(vec![raster(110), raster(8)]).unwrap();
        let path = EnviSink.write_stack(&stack, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("lia_stack_orbits_8_110.img"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 6 * 4);

        let header = std::fs::read_to_string(dir.path().join("lia_stack_orbits_8_110.hdr")).unwrap();
        assert!(header.contains("bands = 2\n"));
        assert!(header.contains("band names = {orbit_8, orbit_110}"));
    }

    #[test]
    fn test_envi_terrain_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut heights = Array2::from_shape_fn((2, 3), |(r, c)| 100.0 + (r * 3 + c) as f32);
        heights[[0, 1]] = f32::NAN;
        let terrain = TerrainGrid::new(
            heights,
            GeoTransform::north_up(499_980.0, 5_500_020.0, 10.0, 10.0),
            Crs::Utm { zone: 33, north: true },
        )
        .unwrap();

        let path = EnviSink.write_terrain(&terrain, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("dem_utm.img"));

        let header = std::fs::read_to_string(dir.path().join("dem_utm.hdr")).unwrap();
        assert!(header.contains("description = {Elevation [m]}\n"));
        assert!(header.contains("band names = {elevation}"));
        assert!(header.contains("33, North"));

        let bytes = std::fs::read(&path).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let values: Vec<f32> = (0..6).map(|_| cursor.read_f32::<LittleEndian>().unwrap()).collect();
        assert_eq!(values[0], 100.0);
        assert!(values[1].is_nan());
        assert_eq!(values[5], 105.0);
    }

    #[test]
    fn test_geographic_map_info() {
        let grid = GridSpec {
            rows: 1,
            cols: 1,
            transform: GeoTransform::north_up(3.0, 0.5, 0.25, 0.25),
            crs: Crs::Geographic,
        };
        let header = EnviSink::header(&grid, ANGLE_DESCRIPTION, &["orbit_1".to_string()]);
        assert!(header.contains("map info = {Geographic Lat/Lon, 1, 1, 3, 0.5, 0.25, 0.25, WGS-84, units=Degrees}"));
    }
}
