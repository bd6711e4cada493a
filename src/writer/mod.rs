pub mod metadata;

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow_array::{ArrayRef, BinaryArray, Float64Array, Int32Array, RecordBatch, StringArray, StructArray};
use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};
use geo::{BoundingRect, Geometry};
use geozero::{CoordDimensions, ToWkb};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use tracing::info;

use crate::error::{GridError, Result};
use crate::model::GridCollection;
use metadata::{GeoParquetMetadata, GEO_METADATA_KEY};

pub const TILE_COLUMN: &str = "tile";
pub const EPSG_COLUMN: &str = "epsg";
pub const UTM_WKT_COLUMN: &str = "utm_wkt";
pub const UTM_BOUNDS_COLUMN: &str = "utm_bounds";
pub const GEOMETRY_COLUMN: &str = "geometry";
pub const BBOX_COLUMN: &str = "bbox";

/// 列圧縮方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Snappy,
    Zstd,
    Uncompressed,
}

impl Compression {
    fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
            Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::Snappy => "snappy",
            Compression::Zstd => "zstd",
            Compression::Uncompressed => "uncompressed",
        };
        f.write_str(name)
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Compression::Snappy),
            "zstd" => Ok(Compression::Zstd),
            "uncompressed" | "none" => Ok(Compression::Uncompressed),
            other => Err(format!(
                "unknown compression '{}' (expected snappy, zstd or uncompressed)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub compression: Compression,
    /// 1行グループあたりの最大行数
    pub max_row_group_size: usize,
    /// GeoParquet 1.1 の bbox covering 列を追加する
    pub bbox_covering: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            max_row_group_size: 16_384,
            bbox_covering: false,
        }
    }
}

fn bbox_fields() -> Fields {
    Fields::from(vec![
        Field::new("xmin", DataType::Float64, false),
        Field::new("ymin", DataType::Float64, false),
        Field::new("xmax", DataType::Float64, false),
        Field::new("ymax", DataType::Float64, false),
    ])
}

/// 出力ファイルの列構成
pub fn grid_schema(bbox_covering: bool) -> Schema {
    let mut fields = vec![
        Field::new(TILE_COLUMN, DataType::Utf8, false),
        Field::new(EPSG_COLUMN, DataType::Int32, false),
        Field::new(UTM_WKT_COLUMN, DataType::Utf8, false),
        Field::new(UTM_BOUNDS_COLUMN, DataType::Utf8, false),
        Field::new(GEOMETRY_COLUMN, DataType::Binary, false),
    ];
    if bbox_covering {
        fields.push(Field::new(BBOX_COLUMN, DataType::Struct(bbox_fields()), false));
    }
    Schema::new(fields)
}

/// GeoParquet 1.1 形式でタイル列を書き出す
#[derive(Debug, Clone, Default)]
pub struct GeoParquetWriter {
    options: WriterOptions,
}

impl GeoParquetWriter {
    pub fn new(options: WriterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn write(&self, grid: &GridCollection, output_path: &Path) -> Result<()> {
        info!(
            "Writing {} tiles to {:?} ({})",
            grid.len(),
            output_path,
            self.options.compression
        );
        let file = File::create(output_path)
            .map_err(|e| GridError::write(format!("Failed to create {:?}: {}", output_path, e)))?;
        self.write_to(grid, file)
    }

    pub fn write_to<W: Write + Send>(&self, grid: &GridCollection, writer: W) -> Result<()> {
        let schema: SchemaRef = Arc::new(grid_schema(self.options.bbox_covering));
        let batch = self.record_batch(grid, schema.clone())?;
        let props = self.writer_properties(grid)?;

        let mut writer = ArrowWriter::try_new(writer, schema, Some(props)).map_err(GridError::write)?;
        writer.write(&batch).map_err(GridError::write)?;
        writer.close().map_err(GridError::write)?;
        Ok(())
    }

    fn record_batch(&self, grid: &GridCollection, schema: SchemaRef) -> Result<RecordBatch> {
        let tiles = grid.tiles();

        let epsg_codes = tiles
            .iter()
            .map(|t| {
                i32::try_from(t.epsg)
                    .map_err(|_| GridError::write(format!("EPSG code {} out of range", t.epsg)))
            })
            .collect::<Result<Vec<_>>>()?;

        // ジオメトリはWKB (2D) で格納
        let wkb = tiles
            .iter()
            .map(|t| {
                Geometry::Polygon(t.geometry.clone())
                    .to_wkb(CoordDimensions::xy())
                    .map_err(|e| GridError::write(format!("WKB encoding failed for {}: {}", t.tile_id, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(tiles.iter().map(|t| t.tile_id.as_str()))),
            Arc::new(Int32Array::from(epsg_codes)),
            Arc::new(StringArray::from_iter_values(tiles.iter().map(|t| t.utm_wkt.as_str()))),
            Arc::new(StringArray::from_iter_values(
                tiles.iter().map(|t| t.utm_bounds.to_string()),
            )),
            Arc::new(BinaryArray::from_iter_values(wkb.iter())),
        ];

        if self.options.bbox_covering {
            let rects = tiles
                .iter()
                .map(|t| {
                    t.geometry.bounding_rect().ok_or_else(|| {
                        GridError::write(format!("Tile {} has an empty geometry", t.tile_id))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let bbox_arrays: Vec<ArrayRef> = vec![
                Arc::new(Float64Array::from_iter_values(rects.iter().map(|r| r.min().x))),
                Arc::new(Float64Array::from_iter_values(rects.iter().map(|r| r.min().y))),
                Arc::new(Float64Array::from_iter_values(rects.iter().map(|r| r.max().x))),
                Arc::new(Float64Array::from_iter_values(rects.iter().map(|r| r.max().y))),
            ];
            let bbox = StructArray::try_new(bbox_fields(), bbox_arrays, None).map_err(GridError::write)?;
            columns.push(Arc::new(bbox));
        }

        RecordBatch::try_new(schema, columns).map_err(GridError::write)
    }

    fn writer_properties(&self, grid: &GridCollection) -> Result<WriterProperties> {
        let bbox = grid
            .bounding_rect()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y]);
        let covering = self.options.bbox_covering.then_some(BBOX_COLUMN);
        let geo = GeoParquetMetadata::polygon_column(GEOMETRY_COLUMN, bbox, covering);
        let geo_json = serde_json::to_string(&geo).map_err(GridError::write)?;

        Ok(WriterProperties::builder()
            .set_compression(self.options.compression.to_parquet())
            .set_max_row_group_size(self.options.max_row_group_size.max(1))
            .set_key_value_metadata(Some(vec![KeyValue::new(
                GEO_METADATA_KEY.to_string(),
                geo_json,
            )]))
            .build())
    }
}
