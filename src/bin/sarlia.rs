use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use geo::{coord, Rect};
use sarlia::core::pipeline::{LiaPipeline, PreparedTerrain, SceneRequest};
use sarlia::io::{EnviSink, EofDirectorySource, HgtTileSource, RasterSink, TerrainSource};
use sarlia::LiaConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// ENVI float32 rasters with .hdr sidecars
    Envi,
    /// GeoTIFF rasters and a netCDF stack
    #[cfg(feature = "gdal")]
    Gdal,
}

/// Compute Sentinel-1 local incidence angle rasters for several relative
/// orbits and stack them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Area of interest as MIN_LON,MIN_LAT,MAX_LON,MAX_LAT (degrees).
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true, required = true)]
    bbox: Vec<f64>,

    /// Terrain model pixel spacing in metres.
    #[arg(long, default_value_t = 10.0)]
    spacing: f64,

    /// Directory of SRTM/NASADEM .hgt(.gz) tiles.
    #[arg(long)]
    dem_tiles: Option<PathBuf>,

    /// Any GDAL-readable geographic DEM.
    #[cfg(feature = "gdal")]
    #[arg(long, conflicts_with = "dem_tiles")]
    dem: Option<PathBuf>,

    /// Directory of Sentinel-1 orbit files (.EOF or .EOF.zip).
    #[arg(long)]
    orbit_dir: PathBuf,

    /// Scene as ORBIT=PRODUCT_ID or a bare product id; repeat per orbit.
    #[arg(long = "scene", required = true)]
    scenes: Vec<String>,

    /// Output directory.
    #[arg(short, long)]
    out: PathBuf,

    /// JSON processing configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scratch directory for per-orbit temporary files.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Relative orbits processed concurrently.
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Envi)]
    format: OutputFormat,

    /// Do not write the projected terrain model (dem_utm) to the output directory.
    #[arg(long)]
    no_terrain: bool,
}

impl Cli {
    fn terrain_source(&self) -> Result<Box<dyn TerrainSource>> {
        #[cfg(feature = "gdal")]
        {
            if let Some(dem) = &self.dem {
                return Ok(Box::new(sarlia::io::GdalDemSource::new(dem)));
            }
        }
        match &self.dem_tiles {
            Some(dir) => Ok(Box::new(HgtTileSource::new(dir)?)),
            None => bail!("an elevation source is required (--dem-tiles)"),
        }
    }

    fn sink(&self) -> Box<dyn RasterSink> {
        match self.format {
            OutputFormat::Envi => Box::new(EnviSink),
            #[cfg(feature = "gdal")]
            OutputFormat::Gdal => Box::new(sarlia::io::GdalSink),
        }
    }

    fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => LiaConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => LiaConfig::default(),
        };
        if let Some(workspace) = &self.workspace {
            config.pipeline.workspace = workspace.clone();
        }
        if let Some(jobs) = self.jobs {
            config.pipeline.max_concurrent_orbits = jobs;
        }
        if self.no_terrain {
            config.pipeline.write_terrain = false;
        }

        let aoi = Rect::new(
            coord! { x: self.bbox[0], y: self.bbox[1] },
            coord! { x: self.bbox[2], y: self.bbox[3] },
        )
        .to_polygon();

        let scenes = self
            .scenes
            .iter()
            .map(|s| s.parse::<SceneRequest>())
            .collect::<Result<Vec<_>, _>>()?;

        let source = self.terrain_source()?;
        let terrain = PreparedTerrain::build(source.as_ref(), &aoi, self.spacing)?;

        let orbits = EofDirectorySource::new(&self.orbit_dir, &config.orbit)?;
        let sink = self.sink();
        let pipeline = LiaPipeline::new(&config, &orbits, sink.as_ref())?;
        let report = pipeline.run(&terrain, &scenes, &self.out)?;

        for skipped in &report.skipped {
            log::warn!(
                "Relative orbit {} ({}) skipped: {}",
                skipped.relative_orbit,
                skipped.product_id,
                skipped.reason
            );
        }
        if let Some(path) = &report.stack_path {
            println!("{}", path.display());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    Cli::parse().run()
}
