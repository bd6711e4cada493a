//! 経緯度ポリゴンの日付変更線(±180°)まわりの処理

use geo::{BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect, Translate};

const WORLD_MIN_LON: f64 = -180.0;
const WORLD_MAX_LON: f64 = 180.0;
const EPSILON: f64 = 1e-9;

/// リングの始点と終点が一致し、4点以上あるか
pub fn is_closed_ring(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

/// 経度を [-180, 180) に正規化する
pub fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// 隣接頂点間で経度が180°を超えて跳ぶ（日付変更線をまたぐ）か
pub fn crosses_antimeridian(ring: &LineString<f64>) -> bool {
    ring.lines()
        .any(|line| (line.end.x - line.start.x).abs() > 180.0)
}

fn shift_western(ring: &LineString<f64>) -> LineString<f64> {
    ring.coords()
        .map(|c| {
            if c.x < 0.0 {
                Coord { x: c.x + 360.0, y: c.y }
            } else {
                *c
            }
        })
        .collect()
}

/// 日付変更線をまたぐリングの西半球側の経度に +360 して連続させる
pub fn unwrap_ring(ring: &LineString<f64>) -> LineString<f64> {
    if crosses_antimeridian(ring) {
        shift_western(ring)
    } else {
        ring.clone()
    }
}

/// 外周が日付変更線をまたぐ場合、穴も含めて西半球側をずらす
pub fn unwrap_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    if !crosses_antimeridian(polygon.exterior()) {
        return polygon.clone();
    }
    Polygon::new(
        shift_western(polygon.exterior()),
        polygon.interiors().iter().map(shift_western).collect(),
    )
}

/// 日付変更線で分割された複数パートを1つのポリゴンにまとめる。
/// 1つにまとまらない場合は `None`。
pub fn stitch_parts(parts: &[Polygon<f64>]) -> Option<Polygon<f64>> {
    match parts {
        [] => None,
        [single] => Some(unwrap_polygon(single)),
        _ => {
            let touches = |limit: f64| {
                parts.iter().any(|p| {
                    p.bounding_rect()
                        .map(|r| {
                            (r.min().x - limit).abs() < EPSILON
                                || (r.max().x - limit).abs() < EPSILON
                        })
                        .unwrap_or(false)
                })
            };
            let split_at_antimeridian = touches(WORLD_MIN_LON) && touches(WORLD_MAX_LON);

            let shifted: Vec<Polygon<f64>> = parts
                .iter()
                .map(|p| {
                    let western = p
                        .bounding_rect()
                        .map(|r| r.max().x <= 0.0)
                        .unwrap_or(false);
                    if split_at_antimeridian && western {
                        p.translate(360.0, 0.0)
                    } else {
                        p.clone()
                    }
                })
                .collect();

            let mut merged = MultiPolygon::new(vec![shifted[0].clone()]);
            for part in &shifted[1..] {
                merged = merged.union(&MultiPolygon::new(vec![part.clone()]));
            }

            let mut polygons = merged.0;
            if polygons.len() == 1 {
                polygons.pop()
            } else {
                None
            }
        }
    }
}

/// 経度範囲が [-180, 180] をはみ出すポリゴンを世界範囲内のパートに分割する。
/// はみ出した部分は ±360 して戻す。
pub fn split_antimeridian(polygon: &Polygon<f64>) -> Vec<Polygon<f64>> {
    let rect = match polygon.bounding_rect() {
        Some(rect) => rect,
        None => return Vec::new(),
    };
    if rect.min().x >= WORLD_MIN_LON && rect.max().x <= WORLD_MAX_LON {
        return vec![polygon.clone()];
    }

    let mut parts = Vec::new();
    for shift in [-360.0, 0.0, 360.0] {
        let window = Rect::new(
            Coord { x: WORLD_MIN_LON + shift, y: -90.0 },
            Coord { x: WORLD_MAX_LON + shift, y: 90.0 },
        )
        .to_polygon();
        let clipped = polygon.intersection(&window);
        parts.extend(clipped.0.into_iter().map(|p| p.translate(-shift, 0.0)));
    }
    parts
}
