use std::fmt;
use std::str::FromStr;

use geo::{BoundingRect, Polygon, Rect};

use crate::error::{GridError, Result};
use crate::mgrs::MgrsTileId;

/// 投影座標系での外接矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ProjectedBounds {
    /// 頂点列の座標ごとの最小/最大
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut bounds = Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        };
        for (x, y) in iter {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// 各辺の差が `tolerance` 以内か
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.min_x - other.min_x).abs() <= tolerance
            && (self.min_y - other.min_y).abs() <= tolerance
            && (self.max_x - other.max_x).abs() <= tolerance
            && (self.max_y - other.max_y).abs() <= tolerance
    }
}

/// `[min_x, min_y, max_x, max_y]` 形式（JSON配列として読める）
impl fmt::Display for ProjectedBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl FromStr for ProjectedBounds {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| GridError::read(format!("invalid bounds string '{}'", s)))?;

        let values = inner
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GridError::read(format!("invalid bounds string '{}': {}", s, e)))?;

        match values.as_slice() {
            [min_x, min_y, max_x, max_y] => Ok(Self {
                min_x: *min_x,
                min_y: *min_y,
                max_x: *max_x,
                max_y: *max_y,
            }),
            _ => Err(GridError::read(format!(
                "bounds string '{}' must hold 4 numbers",
                s
            ))),
        }
    }
}

/// ローダーが読み取った投影前のタイル
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub tile_id: MgrsTileId,
    pub geometry: Polygon<f64>,
    /// KMLのdescriptionに記載されたEPSG（照合用）
    pub declared_epsg: Option<u32>,
    /// descriptionの `UTM_WKT` から求めたUTM座標の外接矩形（照合用）
    pub declared_utm_bounds: Option<ProjectedBounds>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceGrid {
    pub records: Vec<TileRecord>,
}

impl SourceGrid {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// グリッドの1タイル
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub tile_id: String,
    pub epsg: u32,
    /// 投影座標系のWKT定義
    pub utm_wkt: String,
    pub utm_bounds: ProjectedBounds,
    /// 経緯度 (EPSG:4326) のポリゴン
    pub geometry: Polygon<f64>,
}

/// 同一スキーマのタイル列（順序を保持する）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridCollection {
    tiles: Vec<Tile>,
}

impl GridCollection {
    pub fn new(tiles: Vec<Tile>) -> Self {
        Self { tiles }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, tile_id: &str) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.tile_id == tile_id)
    }

    /// 全タイルのジオメトリの外接矩形
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.tiles
            .iter()
            .filter_map(|t| t.geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }

    pub fn into_tiles(self) -> Vec<Tile> {
        self.tiles
    }
}

impl FromIterator<Tile> for GridCollection {
    fn from_iter<I: IntoIterator<Item = Tile>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
