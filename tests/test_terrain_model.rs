mod common;

use byteorder::{BigEndian, WriteBytesExt};
use common::init_logging;
use geo::polygon;
use sarlia::core::terrain_model::TerrainModelBuilder;
use sarlia::io::dem::{HgtTileSource, TerrainSource};
use sarlia::types::{BoundingBox, Crs, LiaError};
use std::io::Write;
use std::path::Path;

/// 3-arcsecond tile whose height rises 1 m per sample eastward
fn write_ramp_tile(dir: &Path, name: &str, gzip: bool) {
    let size = 1201;
    let mut bytes = Vec::with_capacity(size * size * 2);
    for _row in 0..size {
        for col in 0..size {
            bytes.write_i16::<BigEndian>(col as i16).unwrap();
        }
    }
    if gzip {
        let file = std::fs::File::create(dir.join(format!("{}.hgt.gz", name))).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    } else {
        std::fs::write(dir.join(format!("{}.hgt", name)), bytes).unwrap();
    }
}

fn aoi() -> geo::Polygon<f64> {
    polygon![
        (x: 3.40, y: 0.40),
        (x: 3.45, y: 0.40),
        (x: 3.45, y: 0.45),
        (x: 3.40, y: 0.45),
    ]
}

#[test]
fn test_builder_from_hgt_tiles_is_deterministic() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_ramp_tile(dir.path(), "N00E003", true);
    let source = HgtTileSource::new(dir.path()).unwrap();
    let builder = TerrainModelBuilder::new(&source, 30.0).unwrap();

    let first = builder.build(&aoi()).expect("first build");
    let second = builder.build(&aoi()).expect("second build");

    assert_eq!(first.grid(), second.grid());
    assert!(first
        .elevation()
        .iter()
        .zip(second.elevation().iter())
        .all(|(a, b)| a.to_bits() == b.to_bits()));

    assert_eq!(first.crs(), Crs::Utm { zone: 31, north: true });
    assert_eq!(first.valid_count(), first.dim().0 * first.dim().1);

    // Height = column index within the tile = (lon - 3) * 1200
    let (rows, cols) = first.dim();
    let (x, y) = first.grid().transform.cell_center(rows / 2, cols / 2);
    let (lon, _lat) = sarlia::core::projection::to_geographic(first.crs(), x, y);
    let h = first.get(rows / 2, cols / 2).unwrap();
    assert!((h - (lon - 3.0) * 1200.0).abs() < 0.05, "{} at lon {}", h, lon);
}

#[test]
fn test_missing_tile_fails_instead_of_filling() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_ramp_tile(dir.path(), "N00E003", false);
    let source = HgtTileSource::new(dir.path()).unwrap();
    let builder = TerrainModelBuilder::new(&source, 30.0).unwrap();

    // Crosses into the missing N00E004 tile
    let aoi = polygon![
        (x: 3.98, y: 0.40),
        (x: 4.02, y: 0.40),
        (x: 4.02, y: 0.45),
        (x: 3.98, y: 0.45),
    ];
    assert!(matches!(builder.build(&aoi), Err(LiaError::DataUnavailable(_))));
}

#[test]
fn test_voids_become_nodata() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let size = 1201;
    let mut bytes = Vec::with_capacity(size * size * 2);
    for _ in 0..size * size {
        bytes.write_i16::<BigEndian>(-32768).unwrap();
    }
    std::fs::write(dir.path().join("N00E003.hgt"), bytes).unwrap();

    let source = HgtTileSource::new(dir.path()).unwrap();
    let grid = source
        .fetch(&BoundingBox::new(3.1, 0.1, 3.2, 0.2).unwrap())
        .unwrap();
    assert_eq!(grid.valid_count(), 0);

    let terrain = TerrainModelBuilder::new(&source, 100.0).unwrap().build(&aoi()).unwrap();
    assert_eq!(terrain.valid_count(), 0, "voids must never turn into zero elevation");
}
