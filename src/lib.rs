//! sarlia: local incidence angle maps for Sentinel-1
//!
//! Builds a UTM terrain model for an area of interest, geocodes every cell to
//! its zero-Doppler satellite position for each relative orbit, and computes the
//! angle between the terrain normal and the radar line of sight. The per-orbit
//! rasters are stacked into one multi-band product indexed by relative orbit.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::LiaConfig;
pub use types::{
    BoundingBox, Crs, ErrorScope, GeoTransform, GridSpec, LiaError, LiaResult, OrbitSamples,
    RelativeOrbit, StateVector, TerrainGrid, Vector3,
};

pub use crate::core::{
    BackwardGeocoder, GeocentricTerrain, IncidenceAngleRaster, IncidenceEvaluator, LiaPipeline,
    LiaStack, OrbitInterpolator, PreparedTerrain, SceneRequest, SurfaceNormals, TerrainModelBuilder,
};
pub use io::{EnviSink, EofDirectorySource, HgtTileSource, OrbitSource, RasterSink, TerrainSource};
