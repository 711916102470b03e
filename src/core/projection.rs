//! WGS84 geodesy: UTM <-> geographic <-> ECEF.
//!
//! UTM formulas follow Snyder 1987 (USGS Prof. Paper 1395, pp. 61-64), which
//! keeps the crate free of libproj and is accurate to well below a millimetre
//! inside a zone.

use crate::types::{Crs, Vector3};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 2.0 * WGS84_F - WGS84_F * WGS84_F;

const E_PRIME2: f64 = WGS84_E2 / (1.0 - WGS84_E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM zone whose strip contains (lon, lat)
pub fn utm_zone_for(lon_deg: f64, lat_deg: f64) -> Crs {
    let zone = (((lon_deg + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u32;
    Crs::Utm { zone, north: lat_deg >= 0.0 }
}

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// Meridional arc from equator to latitude `lat` (radians), Snyder eq. 3-21
fn meridional_arc(lat: f64) -> f64 {
    let e2 = WGS84_E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// WGS84 (lon, lat) in degrees to UTM (easting, northing) in metres
pub fn geographic_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0 * n
        * (a + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + FALSE_NORTHING_SOUTH)
    }
}

/// UTM (easting, northing) in metres to WGS84 (lon, lat) in degrees
///
/// Footpoint latitude series, Snyder eqs. 8-17 to 8-25.
pub fn utm_to_geographic(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let e2 = WGS84_E2;
    let x = easting - FALSE_EASTING;
    let y = if north { northing } else { northing - FALSE_NORTHING_SOUTH };

    let m = y / K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));

    let sqrt_1me2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = WGS84_A / denom.sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (denom * denom.sqrt());
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d2 * d2;
    let d5 = d4 * d;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1) * d6
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1) * d5 / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Map coordinates in `crs` to (lon, lat) degrees
pub fn to_geographic(crs: Crs, x: f64, y: f64) -> (f64, f64) {
    match crs {
        Crs::Geographic => (x, y),
        Crs::Utm { zone, north } => utm_to_geographic(x, y, zone, north),
    }
}

/// (lon, lat) degrees to map coordinates in `crs`
pub fn from_geographic(crs: Crs, lon: f64, lat: f64) -> (f64, f64) {
    match crs {
        Crs::Geographic => (lon, lat),
        Crs::Utm { zone, north } => geographic_to_utm(lon, lat, zone, north),
    }
}

/// Convert lat/lon/ellipsoidal height to ECEF coordinates
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, height: f64) -> Vector3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();

    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();

    Vector3::new(
        (n + height) * lat.cos() * lon.cos(),
        (n + height) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + height) * lat.sin(),
    )
}

/// Ellipsoid normal (geodetic "up") at lat/lon
pub fn geodetic_up(lat_deg: f64, lon_deg: f64) -> Vector3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Local north unit vector at lat/lon
pub fn geodetic_north(lat_deg: f64, lon_deg: f64) -> Vector3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    Vector3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos())
}
