//! UTM座標参照系の定義（WKT / proj文字列）とWKTからのEPSGコード復元

use crate::error::{GridError, Result};
use crate::mgrs::UtmZone;

pub const EPSG_WGS84: u32 = 4326;

pub const WGS84_PROJ_STRING: &str = "+proj=longlat +datum=WGS84 +no_defs";

impl UtmZone {
    pub fn proj_string(&self) -> String {
        if self.is_south() {
            format!(
                "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
                self.number
            )
        } else {
            format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", self.number)
        }
    }

    pub fn name(&self) -> String {
        format!(
            "WGS 84 / UTM zone {}{}",
            self.number,
            if self.is_south() { 'S' } else { 'N' }
        )
    }

    /// OGC WKT1形式の定義（GDALの `SpatialRef::to_wkt` と同じ構成）
    pub fn wkt(&self) -> String {
        let false_northing = if self.is_south() { 10_000_000 } else { 0 };
        format!(
            concat!(
                "PROJCS[\"{name}\",",
                "GEOGCS[\"WGS 84\",",
                "DATUM[\"WGS_1984\",",
                "SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],",
                "AUTHORITY[\"EPSG\",\"6326\"]],",
                "PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],",
                "UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],",
                "AUTHORITY[\"EPSG\",\"4326\"]],",
                "PROJECTION[\"Transverse_Mercator\"],",
                "PARAMETER[\"latitude_of_origin\",0],",
                "PARAMETER[\"central_meridian\",{cm}],",
                "PARAMETER[\"scale_factor\",0.9996],",
                "PARAMETER[\"false_easting\",500000],",
                "PARAMETER[\"false_northing\",{fn_}],",
                "UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]],",
                "AXIS[\"Easting\",EAST],",
                "AXIS[\"Northing\",NORTH],",
                "AUTHORITY[\"EPSG\",\"{epsg}\"]]"
            ),
            name = self.name(),
            cm = self.central_meridian(),
            fn_ = false_northing,
            epsg = self.epsg(),
        )
    }
}

/// タイルの投影座標系WKTを生成する
#[cfg(not(feature = "gdal"))]
pub fn crs_definition(zone: &UtmZone) -> Result<String> {
    Ok(zone.wkt())
}

/// タイルの投影座標系WKTをGDALから取得する
#[cfg(feature = "gdal")]
pub fn crs_definition(zone: &UtmZone) -> Result<String> {
    use gdal::spatial_ref::SpatialRef;

    let epsg = zone.epsg();
    let srs = SpatialRef::from_epsg(epsg).map_err(|e| GridError::Projection {
        tile_id: zone.name(),
        reason: format!("Failed to create SpatialRef from EPSG:{}: {}", epsg, e),
    })?;
    srs.to_wkt().map_err(|e| GridError::Projection {
        tile_id: zone.name(),
        reason: format!("Failed to convert SpatialRef to WKT: {}", e),
    })
}

/// WKTのルート要素に付いた `AUTHORITY["EPSG","n"]` (WKT1) または
/// `ID["EPSG",n]` (WKT2) からEPSGコードを取り出す
pub fn decode_epsg(wkt: &str) -> Result<u32> {
    let bytes = wkt.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut token_start = 0usize;
    let mut root_authority: Option<(usize, usize)> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'(' => {
                let keyword = wkt[token_start..i].trim();
                depth += 1;
                // ルート直下 (depth == 2) の識別子のみ対象
                if depth == 2
                    && (keyword.eq_ignore_ascii_case("AUTHORITY")
                        || keyword.eq_ignore_ascii_case("ID"))
                {
                    root_authority = Some((i + 1, depth));
                }
                token_start = i + 1;
            }
            b']' | b')' => {
                if depth == 0 {
                    return Err(GridError::read(format!("unbalanced WKT: {}", wkt)));
                }
                if let Some((start, d)) = root_authority {
                    if d == depth {
                        let code = parse_authority_body(&wkt[start..i])?;
                        if let Some(code) = code {
                            return Ok(code);
                        }
                        root_authority = None;
                    }
                }
                depth -= 1;
                token_start = i + 1;
            }
            b',' => token_start = i + 1,
            _ => {}
        }
    }

    Err(GridError::read(
        "WKT has no root EPSG AUTHORITY/ID element".to_string(),
    ))
}

fn parse_authority_body(body: &str) -> Result<Option<u32>> {
    let mut parts = body.splitn(2, ',');
    let authority = parts.next().unwrap_or("").trim().trim_matches('"');
    let code = parts.next().unwrap_or("").trim();
    // WKT2 の ID には URI などの後続要素が付くことがある
    let code = code.split(',').next().unwrap_or("").trim().trim_matches('"');

    if !authority.eq_ignore_ascii_case("EPSG") {
        return Ok(None);
    }
    code.parse::<u32>()
        .map(Some)
        .map_err(|e| GridError::read(format!("invalid EPSG code '{}': {}", code, e)))
}
