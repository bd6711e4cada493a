//! タイルIDからUTM座標系を決定し、投影座標系での外接矩形を計算する

use std::collections::HashMap;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::crs::{crs_definition, WGS84_PROJ_STRING};
use crate::error::{GridError, Result};
use crate::geometry::wrap_longitude;
use crate::mgrs::UtmZone;
use crate::model::{GridCollection, ProjectedBounds, SourceGrid, Tile, TileRecord};

/// `UTM_WKT` の外接矩形と計算結果の許容差 (m)
pub const FOOTPRINT_TOLERANCE: f64 = 50.0;

/// 経緯度 → UTM の変換器。UTMゾーンごとに `Proj` をキャッシュする。
pub struct UtmTransformer {
    geographic: Proj,
    zones: HashMap<u32, Proj>,
}

impl UtmTransformer {
    pub fn new() -> Result<Self> {
        let geographic = Proj::from_proj_string(WGS84_PROJ_STRING).map_err(|e| {
            GridError::Projection {
                tile_id: "EPSG:4326".to_string(),
                reason: format!("Invalid geographic projection: {:?}", e),
            }
        })?;
        Ok(Self {
            geographic,
            zones: HashMap::new(),
        })
    }

    fn ensure_zone(&mut self, zone: &UtmZone) -> Result<u32> {
        let epsg = zone.epsg();
        if !self.zones.contains_key(&epsg) {
            let proj = Proj::from_proj_string(&zone.proj_string()).map_err(|e| {
                GridError::Projection {
                    tile_id: zone.name(),
                    reason: format!("Invalid projection EPSG:{}: {:?}", epsg, e),
                }
            })?;
            self.zones.insert(epsg, proj);
        }
        Ok(epsg)
    }

    /// 経緯度(度) をUTM座標(m) に変換する
    pub fn forward(&mut self, zone: &UtmZone, lon: f64, lat: f64) -> Result<(f64, f64)> {
        let epsg = self.ensure_zone(zone)?;
        let target = self.zones.get(&epsg).ok_or_else(|| GridError::Projection {
            tile_id: zone.name(),
            reason: format!("projection cache miss for EPSG:{}", epsg),
        })?;

        // 中央子午線から ±180° の範囲に寄せる（日付変更線をまたぐタイル用）
        let cm = zone.central_meridian();
        let lon = cm + wrap_longitude(lon - cm);

        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        transform(&self.geographic, target, &mut point).map_err(|e| GridError::Projection {
            tile_id: zone.name(),
            reason: format!("Transform failed for ({}, {}): {:?}", lon, lat, e),
        })?;
        Ok((point.0, point.1))
    }
}

/// 1タイル分の解決: EPSG・WKT・投影外接矩形
pub fn resolve_tile(transformer: &mut UtmTransformer, record: &TileRecord) -> Result<Tile> {
    let tile_id = record.tile_id.to_string();
    let zone = record.tile_id.utm_zone()?;
    let epsg = zone.epsg();

    if let Some(declared) = record.declared_epsg {
        if declared != epsg {
            warn!(
                "Tile {}: description declares EPSG:{}, tile id resolves to EPSG:{}",
                tile_id, declared, epsg
            );
        }
    }

    let mut projected = Vec::with_capacity(record.geometry.exterior().0.len());
    for coord in record.geometry.exterior().coords() {
        projected.push(transformer.forward(&zone, coord.x, coord.y)?);
    }

    let utm_bounds = ProjectedBounds::from_points(projected)
        .filter(|b| b.is_valid())
        .ok_or_else(|| GridError::Projection {
            tile_id: tile_id.clone(),
            reason: "projected bounds are empty or not finite".to_string(),
        })?;

    if let Some(declared) = &record.declared_utm_bounds {
        check_declared_bounds(&tile_id, declared, &utm_bounds);
    }

    Ok(Tile {
        tile_id,
        epsg,
        utm_wkt: crs_definition(&zone)?,
        utm_bounds,
        geometry: record.geometry.clone(),
    })
}

/// descriptionの `UTM_WKT` と計算した外接矩形を照合する。食い違いは警告のみ。
fn check_declared_bounds(tile_id: &str, declared: &ProjectedBounds, computed: &ProjectedBounds) -> bool {
    let matches = declared.approx_eq(computed, FOOTPRINT_TOLERANCE);
    if !matches {
        warn!(
            "Tile {}: UTM_WKT footprint {} differs from computed bounds {}",
            tile_id, declared, computed
        );
    }
    matches
}

/// 全タイルを並列に解決する（順序は保持）
pub fn resolve_grid(grid: &SourceGrid) -> Result<GridCollection> {
    let start_time = std::time::Instant::now();

    let tiles = grid
        .records
        .par_iter()
        .map_init(UtmTransformer::new, |transformer, record| match transformer {
            Ok(transformer) => resolve_tile(transformer, record),
            Err(e) => Err(GridError::Projection {
                tile_id: record.tile_id.to_string(),
                reason: e.to_string(),
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Resolved {} tiles to UTM in {:?}",
        tiles.len(),
        start_time.elapsed()
    );
    Ok(GridCollection::new(tiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::decode_epsg;
    use crate::mgrs::MgrsTileId;
    use geo::polygon;

    fn record(id: &str, geometry: geo::Polygon<f64>) -> TileRecord {
        TileRecord {
            tile_id: MgrsTileId::parse(id).unwrap(),
            geometry,
            declared_epsg: None,
            declared_utm_bounds: None,
        }
    }

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let mut transformer = UtmTransformer::new().unwrap();
        let zone = MgrsTileId::parse("32TNT").unwrap().utm_zone().unwrap();
        let (x, y) = transformer.forward(&zone, 9.0, 45.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3, "x = {}", x);
        assert!((y - 4_982_950.4).abs() < 1.0, "y = {}", y);
    }

    #[test]
    fn test_southern_hemisphere_uses_false_northing() {
        let mut transformer = UtmTransformer::new().unwrap();
        let zone = MgrsTileId::parse("33HYD").unwrap().utm_zone().unwrap();
        let (x, y) = transformer.forward(&zone, 15.0, -30.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3, "x = {}", x);
        assert!(y > 6_000_000.0 && y < 10_000_000.0, "y = {}", y);
    }

    #[test]
    fn test_resolve_tile_32tnt() {
        let mut transformer = UtmTransformer::new().unwrap();
        let rec = record(
            "32TNT",
            polygon![(x: 8.9, y: 45.0), (x: 10.3, y: 45.0), (x: 10.3, y: 46.0), (x: 8.9, y: 46.0), (x: 8.9, y: 45.0)],
        );
        let tile = resolve_tile(&mut transformer, &rec).unwrap();

        assert_eq!(tile.epsg, 32632);
        assert_eq!(decode_epsg(&tile.utm_wkt).unwrap(), 32632);
        assert!(tile.utm_bounds.is_valid());
        assert!(tile.utm_bounds.min_x < 500_000.0 && tile.utm_bounds.max_x > 500_000.0);
        // 100km 強の範囲
        assert!(tile.utm_bounds.width() > 100_000.0 && tile.utm_bounds.width() < 120_000.0);
        assert!(tile.utm_bounds.height() > 100_000.0 && tile.utm_bounds.height() < 120_000.0);
        assert_eq!(tile.geometry, rec.geometry);
    }

    #[test]
    fn test_declared_bounds_check() {
        let computed = ProjectedBounds {
            min_x: 499980.0,
            min_y: 4890240.0,
            max_x: 609780.0,
            max_y: 5000040.0,
        };
        let close = ProjectedBounds {
            min_x: 499990.0,
            ..computed
        };
        let far = ProjectedBounds {
            min_x: 390000.0,
            ..computed
        };
        assert!(check_declared_bounds("32TNT", &close, &computed));
        assert!(!check_declared_bounds("32TNT", &far, &computed));
    }

    #[test]
    fn test_footprint_mismatch_is_not_fatal() {
        let mut transformer = UtmTransformer::new().unwrap();
        let mut rec = record(
            "32TNT",
            polygon![(x: 8.9, y: 45.0), (x: 10.3, y: 45.0), (x: 10.3, y: 46.0), (x: 8.9, y: 46.0), (x: 8.9, y: 45.0)],
        );
        rec.declared_utm_bounds = Some(ProjectedBounds {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        });
        let tile = resolve_tile(&mut transformer, &rec).unwrap();
        assert_eq!(tile.epsg, 32632);
    }

    #[test]
    fn test_unwrapped_antimeridian_tile_is_finite() {
        let mut transformer = UtmTransformer::new().unwrap();
        let rec = record(
            "60WXT",
            polygon![(x: 179.0, y: 60.0), (x: 181.0, y: 60.0), (x: 181.0, y: 61.0), (x: 179.0, y: 61.0), (x: 179.0, y: 60.0)],
        );
        let tile = resolve_tile(&mut transformer, &rec).unwrap();
        assert_eq!(tile.epsg, 32660);
        assert!(tile.utm_bounds.is_valid());
        assert!(tile.utm_bounds.width() < 200_000.0);
    }

    #[test]
    fn test_unresolvable_zone_fails() {
        let mut transformer = UtmTransformer::new().unwrap();
        let rec = record(
            "61TNT",
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)],
        );
        assert!(matches!(
            resolve_tile(&mut transformer, &rec),
            Err(GridError::UnresolvableZone { .. })
        ));
    }

    #[test]
    fn test_resolve_grid_preserves_order() {
        let square = |x: f64| {
            polygon![(x: x, y: 45.0), (x: x + 1.0, y: 45.0), (x: x + 1.0, y: 46.0), (x: x, y: 45.0)]
        };
        let grid = SourceGrid {
            records: vec![
                record("32TNT", square(9.0)),
                record("31TCJ", square(1.0)),
                record("33TUL", square(13.0)),
            ],
        };
        let collection = resolve_grid(&grid).unwrap();
        let ids: Vec<&str> = collection.tiles().iter().map(|t| t.tile_id.as_str()).collect();
        assert_eq!(ids, vec!["32TNT", "31TCJ", "33TUL"]);
        let codes: Vec<u32> = collection.tiles().iter().map(|t| t.epsg).collect();
        assert_eq!(codes, vec![32632, 32631, 32633]);
    }
}
