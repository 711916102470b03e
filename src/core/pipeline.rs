//! End-to-end processing: one terrain model, many relative orbits, one stack

use crate::config::LiaConfig;
use crate::core::aggregate::LiaStack;
use crate::core::geocentric::{GeocentricTerrain, SurfaceNormals};
use crate::core::geocoding::BackwardGeocoder;
use crate::core::incidence::{IncidenceAngleRaster, IncidenceEvaluator};
use crate::core::orbit_interpolator::OrbitInterpolator;
use crate::core::terrain_model::TerrainModelBuilder;
use crate::io::dem::TerrainSource;
use crate::io::orbit::OrbitSource;
use crate::io::product::ProductId;
use crate::io::raster::RasterSink;
use crate::types::{ErrorScope, GridSpec, LiaError, LiaResult, RelativeOrbit, TerrainGrid};
use geo::Polygon;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Terrain and its derived geometry, computed once and shared by all orbits
#[derive(Debug, Clone)]
pub struct PreparedTerrain {
    pub terrain: TerrainGrid,
    pub geocentric: GeocentricTerrain,
    pub normals: SurfaceNormals,
}

impl PreparedTerrain {
    pub fn prepare(terrain: TerrainGrid) -> LiaResult<Self> {
        let geocentric = GeocentricTerrain::from_terrain(&terrain)?;
        let normals = SurfaceNormals::from_geocentric(&geocentric)?;
        log::info!(
            "Terrain prepared: {} of {} cells valid",
            geocentric.valid_count(),
            terrain.grid().rows * terrain.grid().cols
        );
        Ok(Self { terrain, geocentric, normals })
    }

    /// Build the terrain model for `aoi` and prepare it
    pub fn build(source: &dyn TerrainSource, aoi: &Polygon<f64>, spacing: f64) -> LiaResult<Self> {
        let terrain = TerrainModelBuilder::new(source, spacing)?.build(aoi)?;
        Self::prepare(terrain)
    }

    pub fn grid(&self) -> &GridSpec {
        self.terrain.grid()
    }
}

/// One acquisition to process for a relative orbit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRequest {
    pub relative_orbit: RelativeOrbit,
    pub product_id: String,
}

impl SceneRequest {
    pub fn new(relative_orbit: RelativeOrbit, product_id: impl Into<String>) -> Self {
        Self {
            relative_orbit,
            product_id: product_id.into(),
        }
    }

    /// Relative orbit derived from the product identifier
    pub fn from_product(product_id: &str) -> LiaResult<Self> {
        let product = ProductId::parse(product_id)?;
        Ok(Self::new(product.relative_orbit(), product.id))
    }
}

impl FromStr for SceneRequest {
    type Err = LiaError;

    /// `ORBIT=PRODUCT_ID` or a bare product identifier
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((orbit, product)) => {
                let relative_orbit = orbit.trim().parse::<RelativeOrbit>().map_err(|e| {
                    LiaError::InvalidParameter(format!("invalid relative orbit '{}': {}", orbit, e))
                })?;
                Ok(Self::new(relative_orbit, product.trim()))
            }
            None => Self::from_product(s.trim()),
        }
    }
}

/// An orbit that could not be processed, with the reason
#[derive(Debug, Clone)]
pub struct SkippedOrbit {
    pub relative_orbit: RelativeOrbit,
    pub product_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Relative orbits with a raster, ascending
    pub completed: Vec<RelativeOrbit>,
    pub raster_paths: Vec<PathBuf>,
    pub skipped: Vec<SkippedOrbit>,
    pub terrain_path: Option<PathBuf>,
    pub stack_path: Option<PathBuf>,
}

/// Runs terrain preparation results through every requested orbit
pub struct LiaPipeline<'a> {
    config: &'a LiaConfig,
    orbits: &'a dyn OrbitSource,
    sink: &'a dyn RasterSink,
}

impl<'a> LiaPipeline<'a> {
    pub fn new(config: &'a LiaConfig, orbits: &'a dyn OrbitSource, sink: &'a dyn RasterSink) -> LiaResult<Self> {
        config.validate()?;
        Ok(Self { config, orbits, sink })
    }

    /// First scene per relative orbit, in request order
    pub fn deduplicate(scenes: &[SceneRequest]) -> Vec<SceneRequest> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(scenes.len());
        for scene in scenes {
            if seen.insert(scene.relative_orbit) {
                unique.push(scene.clone());
            } else {
                log::info!(
                    "Relative orbit {} already has a scene, ignoring {}",
                    scene.relative_orbit,
                    scene.product_id
                );
            }
        }
        unique
    }

    /// Incidence raster for one scene; `scratch` is private to the call
    pub fn compute_orbit(
        &self,
        terrain: &PreparedTerrain,
        scene: &SceneRequest,
        scratch: &Path,
    ) -> LiaResult<IncidenceAngleRaster> {
        log::info!("🛰️ Relative orbit {}: {}", scene.relative_orbit, scene.product_id);

        let acquisition = self.orbits.acquisition(&scene.product_id, scratch)?;
        if acquisition.relative_orbit != scene.relative_orbit {
            return Err(LiaError::InvalidParameter(format!(
                "product {} belongs to relative orbit {}, requested as {}",
                acquisition.product_id, acquisition.relative_orbit, scene.relative_orbit
            )));
        }

        let orbit = OrbitInterpolator::new(&acquisition.orbit, &self.config.orbit)?;
        let geocoding = BackwardGeocoder::new(&orbit, &self.config.geocoding).geocode(&terrain.geocentric)?;
        IncidenceEvaluator::new(&self.config.incidence).evaluate(scene.relative_orbit, &terrain.normals, &geocoding)
    }

    fn process_scene(
        &self,
        terrain: &PreparedTerrain,
        scene: &SceneRequest,
        output_dir: &Path,
    ) -> LiaResult<(IncidenceAngleRaster, PathBuf)> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("orbit-{}-", scene.relative_orbit))
            .tempdir_in(&self.config.pipeline.workspace)?;

        let raster = self.compute_orbit(terrain, scene, scratch.path())?;
        let path = self.sink.write_raster(&raster, output_dir)?;
        Ok((raster, path))
    }

    /// Process every scene, persist each raster as it completes, then the stack
    ///
    /// Acquisition-level failures skip their orbit; run-level failures abort.
    pub fn run(
        &self,
        terrain: &PreparedTerrain,
        scenes: &[SceneRequest],
        output_dir: &Path,
    ) -> LiaResult<PipelineReport> {
        std::fs::create_dir_all(output_dir)?;
        std::fs::create_dir_all(&self.config.pipeline.workspace)?;

        let scenes = Self::deduplicate(scenes);
        if scenes.is_empty() {
            return Err(LiaError::InvalidParameter("no scenes to process".to_string()));
        }
        log::info!(
            "Processing {} relative orbit(s), {} at a time",
            scenes.len(),
            self.config.pipeline.max_concurrent_orbits
        );

        let mut report = PipelineReport::default();
        if self.config.pipeline.write_terrain {
            report.terrain_path = Some(self.sink.write_terrain(&terrain.terrain, output_dir)?);
        }
        let mut rasters = Vec::with_capacity(scenes.len());

        for batch in scenes.chunks(self.config.pipeline.max_concurrent_orbits) {
            let process = |scene: &SceneRequest| {
                self.process_scene(terrain, scene, output_dir)
                    .map_err(|e| e.for_orbit(scene.relative_orbit))
            };

            #[cfg(feature = "parallel")]
            let results: Vec<LiaResult<_>> = batch.par_iter().map(process).collect();
            #[cfg(not(feature = "parallel"))]
            let results: Vec<LiaResult<_>> = batch.iter().map(process).collect();

            for (scene, result) in batch.iter().zip(results) {
                match result {
                    Ok((raster, path)) => {
                        report.raster_paths.push(path);
                        rasters.push(raster);
                    }
                    Err(e) if e.scope() == ErrorScope::Run => {
                        log::error!("Aborting run: {}", e);
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("⚠️ Skipping {}", e);
                        report.skipped.push(SkippedOrbit {
                            relative_orbit: scene.relative_orbit,
                            product_id: scene.product_id.clone(),
                            reason: e.root().to_string(),
                        });
                    }
                }
            }
        }

        if rasters.is_empty() {
            return Err(LiaError::DataUnavailable(format!(
                "none of the {} requested relative orbits could be processed",
                scenes.len()
            )));
        }

        let (stack, path) = stack_and_persist(rasters, self.sink, output_dir)?;
        report.completed = stack.orbits().to_vec();
        report.stack_path = Some(path);

        log::info!(
            "✅ Done: {} orbit(s) stacked, {} skipped",
            report.completed.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Assemble rasters into a stack and write it; nothing is written unless
/// the whole set is valid
pub fn stack_and_persist(
    rasters: Vec<IncidenceAngleRaster>,
    sink: &dyn RasterSink,
    output_dir: &Path,
) -> LiaResult<(LiaStack, PathBuf)> {
    let stack = LiaStack::assemble(rasters)?;
    let path = sink.write_stack(&stack, output_dir)?;
    Ok((stack, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_request_parsing() {
        let s: SceneRequest = "64=S1A_IW_GRDH_1SDV_20200103T170815_20200103T170840_030639_038282_8F3B"
            .parse()
            .unwrap();
        assert_eq!(s.relative_orbit, 64);

        let s: SceneRequest = "S1A_IW_GRDH_1SDV_20200103T170815_20200103T170840_030639_038282_8F3B"
            .parse()
            .unwrap();
        assert_eq!(s.relative_orbit, 117);

        assert!("x=S1A".parse::<SceneRequest>().is_err());
    }

    #[test]
    fn test_deduplicate_keeps_first_scene() {
        let scenes = vec![
            SceneRequest::new(8, "a"),
            SceneRequest::new(37, "b"),
            SceneRequest::new(8, "c"),
        ];
        let unique = LiaPipeline::deduplicate(&scenes);
        assert_eq!(unique, vec![SceneRequest::new(8, "a"), SceneRequest::new(37, "b")]);
    }
}
