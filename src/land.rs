//! 陸域マスク（例: Natural Earth `ne_10m_land.geojson`）の読み込みと交差判定

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use geo::{BoundingRect, Coord, Intersects, LineString, Polygon};
use geojson::{GeoJson, Geometry, Value};
use rstar::{RTree, RTreeObject, AABB};
use tracing::info;

use crate::error::{GridError, Result};
use crate::geometry::split_antimeridian;

struct LandPolygon {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for LandPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// 外接矩形のRツリーで候補を絞り、平面ポリゴン交差で判定する陸域マスク
pub struct LandMask {
    tree: RTree<LandPolygon>,
}

impl LandMask {
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        let items = polygons
            .into_iter()
            .filter_map(|polygon| {
                let rect = polygon.bounding_rect()?;
                Some(LandPolygon {
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    polygon,
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        info!("Loading land mask: {:?}", path);
        let file = File::open(path)
            .map_err(|e| GridError::LandMask(format!("Failed to open {:?}: {}", path, e)))?;
        let mask = Self::from_geojson_reader(BufReader::new(file))?;
        info!("Land mask has {} polygons", mask.len());
        Ok(mask)
    }

    pub fn from_geojson_reader<R: Read>(reader: R) -> Result<Self> {
        let geojson = GeoJson::from_reader(reader)
            .map_err(|e| GridError::LandMask(format!("Invalid GeoJSON: {}", e)))?;

        let geometries: Vec<Geometry> = match geojson {
            GeoJson::FeatureCollection(fc) => {
                fc.features.into_iter().filter_map(|f| f.geometry).collect()
            }
            GeoJson::Feature(f) => f.geometry.into_iter().collect(),
            GeoJson::Geometry(g) => vec![g],
        };

        let mut polygons = Vec::new();
        for geometry in geometries {
            collect_polygons(geometry.value, &mut polygons)?;
        }
        Ok(Self::from_polygons(polygons))
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// タイルが陸域ポリゴンのいずれかと境界を含めて交わるか。
    /// 経度が ±180° をはみ出すタイルは分割してそれぞれ判定する。
    pub fn intersects(&self, geometry: &Polygon<f64>) -> bool {
        split_antimeridian(geometry)
            .iter()
            .any(|part| self.intersects_part(part))
    }

    fn intersects_part(&self, part: &Polygon<f64>) -> bool {
        let rect = match part.bounding_rect() {
            Some(rect) => rect,
            None => return false,
        };
        let envelope =
            AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .any(|land| land.polygon.intersects(part))
    }
}

fn collect_polygons(value: Value, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match value {
        Value::Polygon(rings) => out.push(polygon_from_rings(rings)?),
        Value::MultiPolygon(polygons) => {
            for rings in polygons {
                out.push(polygon_from_rings(rings)?);
            }
        }
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                collect_polygons(geometry.value, out)?;
            }
        }
        // 点・線は陸域として扱わない
        _ => {}
    }
    Ok(())
}

fn polygon_from_rings(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>> {
    let mut rings = rings.into_iter().map(line_string);
    let exterior = rings
        .next()
        .ok_or_else(|| GridError::LandMask("polygon without exterior ring".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn line_string(positions: Vec<Vec<f64>>) -> Result<LineString<f64>> {
    positions
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(GridError::LandMask(format!(
                "position must have at least 2 values: {:?}",
                p
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    const LAND: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"featurecla": "Land"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
            {"type": "Feature", "properties": {"featurecla": "Land"},
             "geometry": {"type": "MultiPolygon", "coordinates": [
                [[[-179.5,60],[-178,60],[-178,62],[-179.5,62],[-179.5,60]]],
                [[[100,-5],[101,-5],[101,-4],[100,-5]]]
             ]}},
            {"type": "Feature", "properties": {}, "geometry": null}
        ]
    }"#;

    fn mask() -> LandMask {
        LandMask::from_geojson_reader(LAND.as_bytes()).unwrap()
    }

    #[test]
    fn test_load_feature_collection() {
        assert_eq!(mask().len(), 3);
    }

    #[test]
    fn test_overlapping_tile_intersects() {
        let tile = polygon![(x: 9.0, y: 9.0), (x: 11.0, y: 9.0), (x: 11.0, y: 11.0), (x: 9.0, y: 11.0), (x: 9.0, y: 9.0)];
        assert!(mask().intersects(&tile));
    }

    #[test]
    fn test_contained_tile_intersects() {
        let tile = polygon![(x: 2.0, y: 2.0), (x: 3.0, y: 2.0), (x: 3.0, y: 3.0), (x: 2.0, y: 3.0), (x: 2.0, y: 2.0)];
        assert!(mask().intersects(&tile));
    }

    #[test]
    fn test_touching_boundary_counts() {
        let tile = polygon![(x: 10.0, y: 2.0), (x: 12.0, y: 2.0), (x: 12.0, y: 3.0), (x: 10.0, y: 3.0), (x: 10.0, y: 2.0)];
        assert!(mask().intersects(&tile));
    }

    #[test]
    fn test_sea_tile_does_not_intersect() {
        let tile = polygon![(x: 20.0, y: 20.0), (x: 21.0, y: 20.0), (x: 21.0, y: 21.0), (x: 20.0, y: 21.0), (x: 20.0, y: 20.0)];
        assert!(!mask().intersects(&tile));
        // 外接矩形は重なるが形状は離れている
        let near = polygon![(x: 100.1, y: -4.3), (x: 100.5, y: -4.3), (x: 100.1, y: -4.0), (x: 100.1, y: -4.3)];
        assert!(!mask().intersects(&near));
    }

    #[test]
    fn test_antimeridian_tile_finds_western_land() {
        // 179°E〜181°E (= 179°W) のタイル。陸は西半球側だけ
        let tile = polygon![(x: 179.0, y: 60.5), (x: 181.0, y: 60.5), (x: 181.0, y: 61.0), (x: 179.0, y: 61.0), (x: 179.0, y: 60.5)];
        assert!(mask().intersects(&tile));
    }

    #[test]
    fn test_invalid_geojson_is_land_mask_error() {
        assert!(matches!(
            LandMask::from_geojson_reader("not json".as_bytes()),
            Err(GridError::LandMask(_))
        ));
    }

    #[test]
    fn test_missing_file_is_land_mask_error() {
        assert!(matches!(
            LandMask::open(Path::new("/nonexistent/ne_10m_land.geojson")),
            Err(GridError::LandMask(_))
        ));
    }
}
