pub mod crs;
pub mod download;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod kmz;
pub mod land;
pub mod mgrs;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod reader;
pub mod reproject;
pub mod writer;

pub use crs::decode_epsg;
pub use download::{Downloader, GRID_KML_URL, LAND_GEOJSON_URL};
pub use error::{GridError, Result};
pub use filter::filter_land;
pub use kmz::KmzHandler;
pub use land::LandMask;
pub use mgrs::{Hemisphere, MgrsTileId, UtmZone};
pub use model::{GridCollection, ProjectedBounds, SourceGrid, Tile, TileRecord};
pub use parser::load_grid;
pub use pipeline::{run, PipelineConfig, PipelineSummary};
pub use reader::read_grid;
pub use reproject::resolve_grid;
pub use writer::{Compression, GeoParquetWriter, WriterOptions};
