use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use geo::BoundingRect;

use s2_grid::{
    decode_epsg, load_grid, read_grid, resolve_grid, run, Compression, GridError, LandMask,
    PipelineConfig, WriterOptions,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn polygon(coords: &str) -> String {
    format!(
        "<Polygon><outerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></outerBoundaryIs></Polygon>",
        coords
    )
}

fn placemark(name: &str, epsg: u32, geometry: &str) -> String {
    format!(
        r#"<Placemark><name>{}</name><description><![CDATA[<table><tr><td><b>TILE_ID</b></td><td>{}</td></tr><tr><td><b>EPSG</b></td><td>{}</td></tr></table>]]></description>{}</Placemark>"#,
        name, name, epsg, geometry
    )
}

fn grid_kml() -> String {
    let placemarks = [
        // 欧州の陸上
        placemark("32TNT", 32632, &polygon("9,45,0 10.4,45,0 10.4,46,0 9,46,0 9,45,0")),
        // 大西洋
        placemark("26NPA", 32626, &polygon("-30,1,0 -29,1,0 -29,2,0 -30,2,0 -30,1,0")),
        // 南アフリカ
        placemark("33HYD", 32733, &polygon("15,-30,0 16,-30,0 16,-29,0 15,-29,0 15,-30,0")),
        // 日付変更線で分割されたタイル。陸は西側だけ
        placemark(
            "60WXT",
            32660,
            &format!(
                "<MultiGeometry>{}{}</MultiGeometry>",
                polygon("179,60.5,0 180,60.5,0 180,61,0 179,61,0 179,60.5,0"),
                polygon("-180,60.5,0 -179,60.5,0 -179,61,0 -180,61,0 -180,60.5,0")
            ),
        ),
        // 太平洋
        placemark("04QFJ", 32604, &polygon("-160,20,0 -159,20,0 -159,21,0 -160,21,0 -160,20,0")),
    ];
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><kml xmlns="http://www.opengis.net/kml/2.2"><Document><Folder><name>Features</name>{}</Folder></Document></kml>"#,
        placemarks.join("")
    )
}

const LAND: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"featurecla": "Land"},
     "geometry": {"type": "Polygon", "coordinates": [[[5,40],[15,40],[15,50],[5,50],[5,40]]]}},
    {"type": "Feature", "properties": {"featurecla": "Land"},
     "geometry": {"type": "MultiPolygon", "coordinates": [
        [[[10,-35],[30,-35],[30,-20],[10,-20],[10,-35]]],
        [[[-179.5,60],[-178,60],[-178,62],[-179.5,62],[-179.5,60]]]
     ]}}
  ]
}"#;

fn setup(dir: &Path) -> PipelineConfig {
    let grid_path = dir.join("grid.kml");
    let land_mask_path = dir.join("ne_10m_land.geojson");
    fs::write(&grid_path, grid_kml()).unwrap();
    fs::write(&land_mask_path, LAND).unwrap();
    PipelineConfig {
        grid_path,
        land_mask_path,
        output_dir: dir.join("out"),
        ..Default::default()
    }
}

#[test]
fn test_pipeline_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let config = setup(temp_dir.path());

    let summary = run(&config).unwrap();
    assert_eq!(summary.total_tiles, 5);
    assert_eq!(summary.land_tiles, 3);
    assert!(summary.land_tiles < summary.total_tiles);

    let full = read_grid(&summary.full_path).unwrap();
    let land = read_grid(&summary.land_path).unwrap();
    assert_eq!(full.len(), 5);
    assert_eq!(land.len(), 3);

    // 入力順を保持
    let ids: Vec<&str> = full.tiles().iter().map(|t| t.tile_id.as_str()).collect();
    assert_eq!(ids, vec!["32TNT", "26NPA", "33HYD", "60WXT", "04QFJ"]);
    let land_ids: Vec<&str> = land.tiles().iter().map(|t| t.tile_id.as_str()).collect();
    assert_eq!(land_ids, vec!["32TNT", "33HYD", "60WXT"]);

    for tile in full.tiles() {
        assert!(tile.utm_bounds.is_valid(), "{}", tile.tile_id);
        assert_eq!(decode_epsg(&tile.utm_wkt).unwrap(), tile.epsg);
    }
    assert_eq!(full.get("32TNT").unwrap().epsg, 32632);
    assert_eq!(full.get("33HYD").unwrap().epsg, 32733);
    assert_eq!(full.get("60WXT").unwrap().epsg, 32660);
}

#[test]
fn test_land_subset_matches_intersection() {
    let temp_dir = TempDir::new().unwrap();
    let config = setup(temp_dir.path());
    let summary = run(&config).unwrap();

    let full = read_grid(&summary.full_path).unwrap();
    let land = read_grid(&summary.land_path).unwrap();
    let mask = LandMask::open(&config.land_mask_path).unwrap();

    for tile in full.tiles() {
        let included = land.get(&tile.tile_id).is_some();
        assert_eq!(included, mask.intersects(&tile.geometry), "{}", tile.tile_id);
    }
    for tile in land.tiles() {
        assert_eq!(full.get(&tile.tile_id), Some(tile));
    }
}

#[test]
fn test_round_trip_matches_resolved_grid() {
    let temp_dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        writer: WriterOptions {
            compression: Compression::Zstd,
            max_row_group_size: 2,
            bbox_covering: true,
        },
        verify: true,
        ..setup(temp_dir.path())
    };
    let summary = run(&config).unwrap();

    let expected = resolve_grid(&load_grid(&config.grid_path).unwrap()).unwrap();
    assert_eq!(read_grid(&summary.full_path).unwrap(), expected);
}

#[test]
fn test_antimeridian_tile_keeps_continuous_longitudes() {
    let temp_dir = TempDir::new().unwrap();
    let summary = run(&setup(temp_dir.path())).unwrap();

    let full = read_grid(&summary.full_path).unwrap();
    let tile = full.get("60WXT").unwrap();
    let rect = tile.geometry.bounding_rect().unwrap();
    // 西側のポリゴンは +360 されて東側につながる
    assert_eq!(rect.min().x, 179.0);
    assert_eq!(rect.max().x, 181.0);
    assert_eq!(tile.geometry.exterior().coords().filter(|c| c.x < 0.0).count(), 0);
}

#[test]
fn test_kmz_input() {
    let temp_dir = TempDir::new().unwrap();
    let kml_config = setup(temp_dir.path());

    let kmz_path = temp_dir.path().join("grid.kmz");
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("doc.kml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(grid_kml().as_bytes()).unwrap();
    fs::write(&kmz_path, writer.finish().unwrap().into_inner()).unwrap();

    let config = PipelineConfig {
        grid_path: kmz_path,
        output_dir: temp_dir.path().join("kmz_out"),
        ..kml_config
    };
    let summary = run(&config).unwrap();
    assert_eq!(summary.total_tiles, 5);
    assert_eq!(summary.land_tiles, 3);
}

#[test]
fn test_malformed_grid_fails_without_output() {
    let temp_dir = TempDir::new().unwrap();
    let config = setup(temp_dir.path());
    fs::write(
        &config.grid_path,
        grid_kml().replace("<name>04QFJ</name>", "<name>04QF</name>"),
    )
    .unwrap();

    assert!(matches!(run(&config), Err(GridError::MalformedInput(_))));
    assert!(!config.output_dir.join(&config.full_file_name).exists());
    assert!(!config.output_dir.join(&config.land_file_name).exists());
}

#[test]
fn test_unresolvable_zone_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = setup(temp_dir.path());
    fs::write(
        &config.grid_path,
        grid_kml().replace("<name>04QFJ</name>", "<name>61QFJ</name>"),
    )
    .unwrap();

    assert!(matches!(
        run(&config),
        Err(GridError::UnresolvableZone { .. })
    ));
}
