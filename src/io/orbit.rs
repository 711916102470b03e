use crate::config::OrbitFitConfig;
use crate::io::product::{parse_compact_time, ProductId};
use crate::types::{LiaError, LiaResult, OrbitSamples, RelativeOrbit, StateVector};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// One SAR acquisition resolved to its orbit
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub product_id: String,
    pub relative_orbit: RelativeOrbit,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// State vectors around the acquisition window
    pub orbit: OrbitSamples,
}

/// Resolves a product identifier to acquisition metadata and orbit samples
pub trait OrbitSource: Sync {
    /// `scratch` is a directory private to this acquisition, removed afterwards
    fn acquisition(&self, product_id: &str, scratch: &Path) -> LiaResult<Acquisition>;
}

/// Orbit file types, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrbitType {
    /// Precise Orbit Ephemerides (POEORB)
    POEORB,
    /// Restituted Orbit (RESORB)
    RESORB,
}

impl fmt::Display for OrbitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitType::POEORB => write!(f, "POEORB"),
            OrbitType::RESORB => write!(f, "RESORB"),
        }
    }
}

// Earth Explorer orbit file layout (only the parts we read)
#[derive(Debug, Deserialize)]
struct EarthExplorerFile {
    #[serde(rename = "Data_Block")]
    data_block: DataBlock,
}

#[derive(Debug, Deserialize)]
struct DataBlock {
    #[serde(rename = "List_of_OSVs")]
    list_of_osvs: ListOfOsvs,
}

#[derive(Debug, Deserialize)]
struct ListOfOsvs {
    #[serde(rename = "OSV", default)]
    osvs: Vec<Osv>,
}

#[derive(Debug, Deserialize)]
struct Osv {
    #[serde(rename = "UTC")]
    utc: String,
    #[serde(rename = "X")]
    x: Measured,
    #[serde(rename = "Y")]
    y: Measured,
    #[serde(rename = "Z")]
    z: Measured,
    #[serde(rename = "VX")]
    vx: Measured,
    #[serde(rename = "VY")]
    vy: Measured,
    #[serde(rename = "VZ")]
    vz: Measured,
}

/// Element with a `unit` attribute and a numeric body
#[derive(Debug, Deserialize)]
struct Measured {
    #[serde(rename = "$text")]
    value: String,
}

/// Strip an optional `NAME=` prefix, e.g. `UTC=2020-01-02T22:59:05.000000`
fn strip_key(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.find('=') {
        Some(i) => raw[i + 1..].trim(),
        None => raw,
    }
}

fn parse_value(raw: &Measured, name: &str) -> LiaResult<f64> {
    strip_key(&raw.value)
        .parse::<f64>()
        .map_err(|e| LiaError::InvalidFormat(format!("invalid {} value '{}': {}", name, raw.value, e)))
}

fn parse_utc(raw: &str) -> LiaResult<DateTime<Utc>> {
    let value = strip_key(raw);
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| LiaError::InvalidFormat(format!("invalid orbit time '{}': {}", raw, e)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse the state vectors of an Earth Explorer orbit file (`.EOF`)
pub fn parse_eof(content: &str) -> LiaResult<OrbitSamples> {
    let file: EarthExplorerFile = quick_xml::de::from_str(content)
        .map_err(|e| LiaError::XmlParsing(format!("orbit file: {}", e)))?;

    let mut state_vectors = Vec::with_capacity(file.data_block.list_of_osvs.osvs.len());
    for osv in &file.data_block.list_of_osvs.osvs {
        state_vectors.push(StateVector {
            time: parse_utc(&osv.utc)?,
            position: [
                parse_value(&osv.x, "X")?,
                parse_value(&osv.y, "Y")?,
                parse_value(&osv.z, "Z")?,
            ],
            velocity: [
                parse_value(&osv.vx, "VX")?,
                parse_value(&osv.vy, "VY")?,
                parse_value(&osv.vz, "VZ")?,
            ],
        });
    }

    validate_orbit_data(&state_vectors);
    log::debug!("Parsed {} orbit state vectors", state_vectors.len());
    OrbitSamples::new(state_vectors)
}

/// Warn about state vectors that do not look like a low Earth orbit
fn validate_orbit_data(state_vectors: &[StateVector]) {
    for sv in state_vectors {
        let speed = sv.velocity.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !(6000.0..=9000.0).contains(&speed) {
            log::warn!(
                "Unusual orbital velocity: {:.1} m/s at {}",
                speed,
                sv.time.format("%Y-%m-%d %H:%M:%S")
            );
        }
        let radius = sv.position.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !(6_500_000.0..=7_500_000.0).contains(&radius) {
            log::warn!(
                "Unusual orbital radius: {:.1} km at {}",
                radius / 1000.0,
                sv.time.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
}

/// Orbit file found on disk
#[derive(Debug, Clone)]
pub struct OrbitFile {
    pub path: PathBuf,
    pub mission: String,
    pub orbit_type: OrbitType,
    pub production: DateTime<Utc>,
    pub validity_start: DateTime<Utc>,
    pub validity_stop: DateTime<Utc>,
}

impl OrbitFile {
    /// Parse `S1A_OPER_AUX_POEORB_OPOD_<prod>_V<start>_<stop>.EOF[.zip]`
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let pattern = regex::Regex::new(
            r"^(S1[A-D])_OPER_AUX_(POEORB|RESORB)_OPOD_(\d{8}T\d{6})_V(\d{8}T\d{6})_(\d{8}T\d{6})\.EOF(\.zip)?$",
        )
        .ok()?;
        let captures = pattern.captures(name)?;

        Some(Self {
            path: path.to_path_buf(),
            mission: captures[1].to_string(),
            orbit_type: if &captures[2] == "POEORB" { OrbitType::POEORB } else { OrbitType::RESORB },
            production: parse_compact_time(&captures[3]).ok()?,
            validity_start: parse_compact_time(&captures[4]).ok()?,
            validity_stop: parse_compact_time(&captures[5]).ok()?,
        })
    }

    pub fn covers(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
        self.validity_start <= start && self.validity_stop >= stop
    }

    pub fn is_zipped(&self) -> bool {
        self.path.extension().map_or(false, |e| e == "zip")
    }
}

/// Local directory of Sentinel-1 orbit files
pub struct EofDirectorySource {
    orbit_dir: PathBuf,
    window_margin: Duration,
}

impl EofDirectorySource {
    pub fn new<P: AsRef<Path>>(orbit_dir: P, config: &OrbitFitConfig) -> LiaResult<Self> {
        let orbit_dir = orbit_dir.as_ref().to_path_buf();
        if !orbit_dir.is_dir() {
            return Err(LiaError::InvalidParameter(format!(
                "orbit directory does not exist: {}",
                orbit_dir.display()
            )));
        }
        Ok(Self {
            orbit_dir,
            window_margin: Duration::milliseconds((config.window_margin_s * 1000.0).round() as i64),
        })
    }

    /// All recognised orbit files in the directory
    pub fn orbit_files(&self) -> LiaResult<Vec<OrbitFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.orbit_dir)? {
            let path = entry?.path();
            if let Some(file) = OrbitFile::from_path(&path) {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Best file for the acquisition: POEORB before RESORB, newest production first
    pub fn select(&self, product: &ProductId) -> LiaResult<Option<OrbitFile>> {
        let mission = product.mission.to_string();
        let mut candidates: Vec<OrbitFile> = self
            .orbit_files()?
            .into_iter()
            .filter(|f| f.mission == mission && f.covers(product.start, product.stop))
            .collect();
        candidates.sort_by(|a, b| {
            a.orbit_type
                .cmp(&b.orbit_type)
                .then_with(|| b.production.cmp(&a.production))
        });
        Ok(candidates.into_iter().next())
    }

    fn read_orbit_file(file: &OrbitFile, scratch: &Path) -> LiaResult<String> {
        if !file.is_zipped() {
            return Ok(std::fs::read_to_string(&file.path)?);
        }
        let path = extract_eof_from_zip(&file.path, scratch)?;
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Extract the `.EOF` member of a zipped orbit file into `scratch`
pub fn extract_eof_from_zip(zip_path: &Path, scratch: &Path) -> LiaResult<PathBuf> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)
        .map_err(|e| LiaError::InvalidFormat(format!("Failed to read ZIP archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| LiaError::InvalidFormat(format!("Failed to read ZIP entry {}: {}", i, e)))?;
        if !entry.name().ends_with(".EOF") {
            continue;
        }
        let name = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| LiaError::InvalidFormat(format!("bad ZIP entry name {}", entry.name())))?;

        log::debug!("Found EOF file in ZIP: {}", entry.name());
        let target = scratch.join(name);
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        return Ok(target);
    }

    Err(LiaError::InvalidFormat(format!(
        "No .EOF file found in ZIP archive {}",
        zip_path.display()
    )))
}

impl OrbitSource for EofDirectorySource {
    fn acquisition(&self, product_id: &str, scratch: &Path) -> LiaResult<Acquisition> {
        let product = ProductId::parse(product_id).map_err(|e| LiaError::ProductUnavailable {
            product_id: product_id.to_string(),
            reason: e.to_string(),
        })?;

        let file = self.select(&product)?.ok_or_else(|| LiaError::ProductUnavailable {
            product_id: product_id.to_string(),
            reason: format!(
                "no orbit file in {} covers {} .. {}",
                self.orbit_dir.display(),
                product.start,
                product.stop
            ),
        })?;
        log::info!(
            "Using {} orbit {} for {}",
            file.orbit_type,
            file.path.display(),
            product.id
        );

        let content = Self::read_orbit_file(&file, scratch)?;
        let samples = parse_eof(&content)?;
        let orbit = samples.window(product.start, product.stop, self.window_margin)?;
        log::debug!(
            "Kept {} of {} state vectors around the acquisition",
            orbit.len(),
            samples.len()
        );

        Ok(Acquisition {
            relative_orbit: product.relative_orbit(),
            start: product.start,
            stop: product.stop,
            product_id: product.id,
            orbit,
        })
    }
}
