//! 書き出したGeoParquetをタイル列として読み戻す

use std::fs::File;
use std::path::Path;

use arrow_array::{Array, BinaryArray, Int32Array, RecordBatch, StringArray};
use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::ToGeo;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::format::KeyValue;
use tracing::debug;

use crate::crs::EPSG_WGS84;
use crate::error::{GridError, Result};
use crate::model::{GridCollection, ProjectedBounds, Tile};
use crate::writer::metadata::{GeoParquetMetadata, GEO_METADATA_KEY};
use crate::writer::{EPSG_COLUMN, TILE_COLUMN, UTM_BOUNDS_COLUMN, UTM_WKT_COLUMN};

/// ファイル全体を読み込む。`geo` メタデータが WKB / EPSG:4326 でなければエラー。
pub fn read_grid(path: &Path) -> Result<GridCollection> {
    let file = File::open(path)
        .map_err(|e| GridError::read(format!("Failed to open {:?}: {}", path, e)))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(GridError::read)?;

    let geo = parse_geo_metadata(builder.metadata().file_metadata().key_value_metadata())?;
    let geometry_column = geo.primary_column.clone();

    let reader = builder.build().map_err(GridError::read)?;
    let mut tiles = Vec::new();
    for batch in reader {
        let batch = batch.map_err(GridError::read)?;
        read_batch(&batch, &geometry_column, &mut tiles)?;
    }
    debug!("Read {} tiles from {:?}", tiles.len(), path);
    Ok(GridCollection::new(tiles))
}

/// `geo` メタデータだけを読む
pub fn read_geo_metadata(path: &Path) -> Result<GeoParquetMetadata> {
    let file = File::open(path)
        .map_err(|e| GridError::read(format!("Failed to open {:?}: {}", path, e)))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(GridError::read)?;
    parse_geo_metadata(builder.metadata().file_metadata().key_value_metadata())
}

fn parse_geo_metadata(key_values: Option<&Vec<KeyValue>>) -> Result<GeoParquetMetadata> {
    let json = key_values
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == GEO_METADATA_KEY))
        .and_then(|kv| kv.value.as_deref())
        .ok_or_else(|| GridError::read("missing 'geo' file metadata"))?;

    let geo: GeoParquetMetadata = serde_json::from_str(json)
        .map_err(|e| GridError::read(format!("invalid 'geo' metadata: {}", e)))?;

    let column = geo.primary().ok_or_else(|| {
        GridError::read(format!(
            "primary column '{}' is not described in 'geo' metadata",
            geo.primary_column
        ))
    })?;
    if !column.encoding.eq_ignore_ascii_case("WKB") {
        return Err(GridError::read(format!(
            "unsupported geometry encoding '{}'",
            column.encoding
        )));
    }
    match column.crs_epsg() {
        Some(EPSG_WGS84) => Ok(geo),
        _ => Err(GridError::read("geometry column CRS is not EPSG:4326")),
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| GridError::read(format!("missing column '{}'", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| GridError::read(format!("column '{}' has an unexpected type", name)))
}

fn read_batch(batch: &RecordBatch, geometry_column: &str, tiles: &mut Vec<Tile>) -> Result<()> {
    let ids = column::<StringArray>(batch, TILE_COLUMN)?;
    let codes = column::<Int32Array>(batch, EPSG_COLUMN)?;
    let wkts = column::<StringArray>(batch, UTM_WKT_COLUMN)?;
    let bounds = column::<StringArray>(batch, UTM_BOUNDS_COLUMN)?;
    let geometries = column::<BinaryArray>(batch, geometry_column)?;

    for row in 0..batch.num_rows() {
        if ids.is_null(row) || geometries.is_null(row) {
            return Err(GridError::read(format!("row {} has null values", row)));
        }
        let tile_id = ids.value(row).to_string();

        let geometry = match Wkb(geometries.value(row).to_vec()).to_geo() {
            Ok(Geometry::Polygon(polygon)) => polygon,
            Ok(other) => {
                return Err(GridError::read(format!(
                    "tile {}: expected Polygon, got {:?}",
                    tile_id, other
                )))
            }
            Err(e) => {
                return Err(GridError::read(format!(
                    "tile {}: invalid WKB: {}",
                    tile_id, e
                )))
            }
        };

        let epsg = u32::try_from(codes.value(row))
            .map_err(|_| GridError::read(format!("tile {}: negative EPSG code", tile_id)))?;

        tiles.push(Tile {
            epsg,
            utm_wkt: wkts.value(row).to_string(),
            utm_bounds: bounds.value(row).parse::<ProjectedBounds>()?,
            geometry,
            tile_id,
        });
    }
    Ok(())
}
