//! GeoParquet 1.1 のファイルメタデータ (`geo` キー)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crs::EPSG_WGS84;

pub const GEO_METADATA_KEY: &str = "geo";
pub const GEOPARQUET_VERSION: &str = "1.1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoParquetMetadata {
    pub version: String,
    pub primary_column: String,
    pub columns: BTreeMap<String, GeometryColumnMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryColumnMetadata {
    pub encoding: String,
    pub geometry_types: Vec<String>,
    /// PROJJSON。省略時は OGC:CRS84
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covering: Option<Covering>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covering {
    pub bbox: BboxCovering,
}

/// 各値は `[列名, フィールド名]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BboxCovering {
    pub xmin: Vec<String>,
    pub ymin: Vec<String>,
    pub xmax: Vec<String>,
    pub ymax: Vec<String>,
}

impl BboxCovering {
    pub fn for_column(column: &str) -> Self {
        let path = |field: &str| vec![column.to_string(), field.to_string()];
        Self {
            xmin: path("xmin"),
            ymin: path("ymin"),
            xmax: path("xmax"),
            ymax: path("ymax"),
        }
    }
}

/// EPSG:4326 (WGS 84) のPROJJSON
pub fn wgs84_projjson() -> Value {
    json!({
        "$schema": "https://proj.org/schemas/v0.7/projjson.schema.json",
        "type": "GeographicCRS",
        "name": "WGS 84",
        "datum": {
            "type": "GeodeticReferenceFrame",
            "name": "World Geodetic System 1984",
            "ellipsoid": {
                "name": "WGS 84",
                "semi_major_axis": 6378137,
                "inverse_flattening": 298.257223563
            }
        },
        "coordinate_system": {
            "subtype": "ellipsoidal",
            "axis": [
                {
                    "name": "Geodetic latitude",
                    "abbreviation": "Lat",
                    "direction": "north",
                    "unit": "degree"
                },
                {
                    "name": "Geodetic longitude",
                    "abbreviation": "Lon",
                    "direction": "east",
                    "unit": "degree"
                }
            ]
        },
        "id": {
            "authority": "EPSG",
            "code": EPSG_WGS84
        }
    })
}

impl GeometryColumnMetadata {
    /// CRSのEPSGコード。CRS省略時は OGC:CRS84 なので 4326 とみなす。
    pub fn crs_epsg(&self) -> Option<u32> {
        match &self.crs {
            None => Some(EPSG_WGS84),
            Some(crs) => {
                let id = crs.get("id")?;
                if id.get("authority")?.as_str()? != "EPSG" {
                    return None;
                }
                let code = id.get("code")?;
                code.as_u64()
                    .map(|c| c as u32)
                    .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
            }
        }
    }
}

impl GeoParquetMetadata {
    pub fn polygon_column(column: &str, bbox: Option<[f64; 4]>, covering_column: Option<&str>) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(
            column.to_string(),
            GeometryColumnMetadata {
                encoding: "WKB".to_string(),
                geometry_types: vec!["Polygon".to_string()],
                crs: Some(wgs84_projjson()),
                edges: Some("planar".to_string()),
                bbox: bbox.map(|b| b.to_vec()),
                covering: covering_column.map(|c| Covering {
                    bbox: BboxCovering::for_column(c),
                }),
            },
        );
        Self {
            version: GEOPARQUET_VERSION.to_string(),
            primary_column: column.to_string(),
            columns,
        }
    }

    pub fn primary(&self) -> Option<&GeometryColumnMetadata> {
        self.columns.get(&self.primary_column)
    }
}
