//! Core local incidence angle processing modules

pub mod projection;
pub mod terrain_model;
pub mod geocentric;
pub mod orbit_interpolator;
pub mod geocoding;
pub mod incidence;
pub mod aggregate;
pub mod pipeline;

// Re-export main types
pub use terrain_model::TerrainModelBuilder;
pub use geocentric::{GeocentricTerrain, OrientedArea, SurfaceNormal, SurfaceNormals};
pub use orbit_interpolator::{OrbitInterpolator, OrbitState};
pub use geocoding::{BackwardGeocoder, GeocodedCell, GeocodingResult};
pub use incidence::{AngleStatistics, IncidenceAngleRaster, IncidenceEvaluator};
pub use aggregate::LiaStack;
pub use pipeline::{LiaPipeline, PipelineReport, PreparedTerrain, SceneRequest, SkippedOrbit};
