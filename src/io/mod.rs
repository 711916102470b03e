//! I/O adapters for terrain tiles, orbit files and output rasters

pub mod dem;
pub mod orbit;
pub mod product;
pub mod raster;

pub use dem::{HgtTileSource, InMemorySource, TerrainSource};
#[cfg(feature = "gdal")]
pub use dem::GdalDemSource;
pub use orbit::{parse_eof, Acquisition, EofDirectorySource, OrbitSource};
pub use product::ProductId;
pub use raster::{EnviSink, RasterSink};
#[cfg(feature = "gdal")]
pub use raster::GdalSink;
