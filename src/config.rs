//! Processing configuration
//!
//! Every section has literature/experience based defaults and can be
//! overridden from a JSON file; missing keys fall back to the defaults.

use crate::types::{LiaError, LiaResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Orbit polynomial fit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitFitConfig {
    /// Polynomial degree (capped at number of samples - 1)
    pub degree: usize,
    /// Maximum allowed position residual at the input samples (meters)
    pub fit_tolerance_m: f64,
    /// How far beyond the sample span the fit may be evaluated (seconds)
    pub extrapolation_margin_s: f64,
    /// State vectors kept around the acquisition window (seconds)
    pub window_margin_s: f64,
}

impl Default for OrbitFitConfig {
    fn default() -> Self {
        Self {
            degree: 5,
            fit_tolerance_m: 0.5,
            extrapolation_margin_s: 10.0,
            window_margin_s: 60.0,
        }
    }
}

/// How the zero-Doppler search picks its first guess for a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// Time of the orbit sample closest to the cell
    NearestSample,
    /// Middle of the orbit sample span
    MidAcquisition,
}

/// Backward geocoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Convergence tolerance on |(S - P) . V| in m^2/s
    pub convergence_tolerance: f64,
    /// Maximum Newton iterations per cell
    pub max_iterations: usize,
    /// First guess for the first valid cell of each row
    pub seed: SeedStrategy,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            convergence_tolerance: 1e-2,
            max_iterations: 50,  // Prevent infinite loops
            seed: SeedStrategy::NearestSample,
        }
    }
}

/// Incidence angle evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidenceConfig {
    /// Tolerated overshoot of the cosine outside [-1, 1] before it is an error
    pub clamp_epsilon: f64,
}

impl Default for IncidenceConfig {
    fn default() -> Self {
        Self { clamp_epsilon: 1e-6 }
    }
}

/// Orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Relative orbits processed at the same time
    pub max_concurrent_orbits: usize,
    /// Parent directory for per-acquisition scratch space
    pub workspace: PathBuf,
    /// Persist the projected terrain model next to the angle rasters
    pub write_terrain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workspace = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sarlia");
        Self {
            max_concurrent_orbits: 1,
            workspace,
            write_terrain: true,
        }
    }
}

/// Complete processing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiaConfig {
    pub orbit: OrbitFitConfig,
    pub geocoding: GeocodingConfig,
    pub incidence: IncidenceConfig,
    pub pipeline: PipelineConfig,
}

impl LiaConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> LiaResult<Self> {
        log::info!("Reading configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        let config: LiaConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LiaResult<()> {
        let invalid = |msg: String| -> LiaResult<()> { Err(LiaError::InvalidParameter(msg)) };

        if self.orbit.degree == 0 {
            return invalid("orbit.degree must be at least 1".to_string());
        }
        if !(self.orbit.fit_tolerance_m > 0.0) {
            return invalid(format!("orbit.fit_tolerance_m must be positive, got {}", self.orbit.fit_tolerance_m));
        }
        if !(self.orbit.extrapolation_margin_s >= 0.0) || !(self.orbit.window_margin_s >= 0.0) {
            return invalid("orbit margins must be non-negative".to_string());
        }
        if !(self.geocoding.convergence_tolerance > 0.0) {
            return invalid(format!(
                "geocoding.convergence_tolerance must be positive, got {}",
                self.geocoding.convergence_tolerance
            ));
        }
        if self.geocoding.max_iterations == 0 {
            return invalid("geocoding.max_iterations must be at least 1".to_string());
        }
        if !(self.incidence.clamp_epsilon >= 0.0) {
            return invalid("incidence.clamp_epsilon must be non-negative".to_string());
        }
        if self.pipeline.max_concurrent_orbits == 0 {
            return invalid("pipeline.max_concurrent_orbits must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LiaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.geocoding.max_iterations, 50);
        assert_eq!(config.pipeline.max_concurrent_orbits, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "geocoding": { "convergence_tolerance": 0.001, "seed": "mid_acquisition" } }"#;
        let config: LiaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.geocoding.convergence_tolerance, 0.001);
        assert_eq!(config.geocoding.seed, SeedStrategy::MidAcquisition);
        assert_eq!(config.geocoding.max_iterations, 50);
        assert_eq!(config.orbit.degree, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = LiaConfig::default();
        config.pipeline.max_concurrent_orbits = 0;
        assert!(config.validate().is_err());

        let mut config = LiaConfig::default();
        config.geocoding.convergence_tolerance = -1.0;
        assert!(config.validate().is_err());
    }
}
