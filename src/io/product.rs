use crate::types::{LiaError, LiaResult, RelativeOrbit};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Number of relative orbits in the Sentinel-1 repeat cycle
pub const ORBITS_PER_CYCLE: i64 = 175;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mission {
    S1A,
    S1B,
}

impl Mission {
    /// Absolute orbit that starts relative orbit 1 modulo the cycle
    fn orbit_offset(&self) -> i64 {
        match self {
            Mission::S1A => 73,
            Mission::S1B => 27,
        }
    }
}

impl fmt::Display for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mission::S1A => write!(f, "S1A"),
            Mission::S1B => write!(f, "S1B"),
        }
    }
}

/// Parsed Sentinel-1 product identifier
///
/// e.g. `S1A_IW_GRDH_1SDV_20200103T170815_20200103T170840_030639_038282_8F3B`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductId {
    pub id: String,
    pub mission: Mission,
    pub mode: String,
    pub product_type: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub absolute_orbit: u32,
}

impl ProductId {
    pub fn parse(product_id: &str) -> LiaResult<Self> {
        let id = product_id
            .trim()
            .trim_end_matches(".zip")
            .trim_end_matches(".SAFE")
            .to_string();

        let pattern = regex::Regex::new(
            r"^(S1[A-D])_([A-Z0-9]{2})_(\w{4})_\w{4}_(\d{8}T\d{6})_(\d{8}T\d{6})_(\d{6})_[0-9A-F]{6}_[0-9A-F]{4}$",
        )
        .map_err(|e| LiaError::LogicInvariantViolated(format!("Regex error: {}", e)))?;

        let captures = pattern.captures(&id).ok_or_else(|| {
            LiaError::InvalidFormat(format!("not a Sentinel-1 product identifier: {}", product_id))
        })?;

        let mission = match &captures[1] {
            "S1A" => Mission::S1A,
            "S1B" => Mission::S1B,
            other => {
                return Err(LiaError::InvalidParameter(format!(
                    "relative orbit numbering for {} is not supported",
                    other
                )))
            }
        };

        let absolute_orbit = captures[6]
            .parse::<u32>()
            .map_err(|e| LiaError::InvalidFormat(format!("absolute orbit: {}", e)))?;

        Ok(Self {
            mission,
            mode: captures[2].to_string(),
            product_type: captures[3].trim_end_matches('_').to_string(),
            start: parse_compact_time(&captures[4])?,
            stop: parse_compact_time(&captures[5])?,
            absolute_orbit,
            id,
        })
    }

    pub fn relative_orbit(&self) -> RelativeOrbit {
        relative_orbit(self.mission, self.absolute_orbit)
    }
}

impl FromStr for ProductId {
    type Err = LiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Relative orbit (1..=175) of an absolute orbit
pub fn relative_orbit(mission: Mission, absolute_orbit: u32) -> RelativeOrbit {
    ((absolute_orbit as i64 - mission.orbit_offset()).rem_euclid(ORBITS_PER_CYCLE) + 1) as RelativeOrbit
}

/// `YYYYMMDDTHHMMSS` as used in product and orbit file names
pub fn parse_compact_time(s: &str) -> LiaResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
        .map_err(|e| LiaError::InvalidFormat(format!("invalid time '{}': {}", s, e)))?;
    Ok(Utc.from_utc_datetime(&naive))
}
