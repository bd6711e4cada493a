//! ESA Sentinel-2 タイリンググリッド (KML) の読み込み
//!
//! 1つの `Placemark` が1タイルに対応する。タイルIDは `<name>`、
//! 境界は `Polygon/outerBoundaryIs/LinearRing/coordinates` から取得する。
//! `<description>` のHTML表に含まれる `EPSG` と `UTM_WKT` は照合用に保持する。

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use geo::{BoundingRect, Coord, LineString, Polygon};
use geozero::wkt::WktStr;
use geozero::ToGeo;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info, warn};

use crate::error::{GridError, Result};
use crate::geometry::{is_closed_ring, stitch_parts};
use crate::kmz::KmzHandler;
use crate::mgrs::MgrsTileId;
use crate::model::{ProjectedBounds, SourceGrid, TileRecord};

/// 拡張子 (.kml / .kmz) に応じてグリッドを読み込む
pub fn load_grid(path: &Path) -> Result<SourceGrid> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "kml" => {
            info!("Loading grid KML: {:?}", path);
            let file = File::open(path)?;
            parse_grid_kml(BufReader::new(file))
        }
        "kmz" => {
            info!("Loading grid KMZ: {:?}", path);
            KmzHandler::new(path).parse_grid()
        }
        _ => Err(GridError::malformed(format!(
            "grid file must be .kml or .kmz: {:?}",
            path
        ))),
    }
}

#[derive(Default)]
struct PlacemarkBuilder {
    name: Option<String>,
    description: Option<String>,
    polygons: Vec<Polygon<f64>>,
    outer: Option<LineString<f64>>,
    inners: Vec<LineString<f64>>,
}

impl PlacemarkBuilder {
    fn finish_polygon(&mut self, index: usize) -> Result<()> {
        let outer = self.outer.take().ok_or_else(|| {
            GridError::malformed(format!("placemark #{}: polygon without outer boundary", index))
        })?;
        let inners = std::mem::take(&mut self.inners);
        self.polygons.push(Polygon::new(outer, inners));
        Ok(())
    }

    fn finish(self, index: usize) -> Result<TileRecord> {
        let fields = self
            .description
            .as_deref()
            .map(parse_description)
            .unwrap_or_default();

        let raw_id = self
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| fields.get("TILE_ID").cloned())
            .ok_or_else(|| {
                GridError::malformed(format!("placemark #{}: no tile identifier", index))
            })?;

        let tile_id = MgrsTileId::parse(&raw_id).map_err(|e| match e {
            GridError::MalformedInput(msg) => {
                GridError::malformed(format!("placemark #{}: {}", index, msg))
            }
            other => other,
        })?;

        if self.polygons.is_empty() {
            return Err(GridError::malformed(format!(
                "placemark #{} ({}): no polygon geometry",
                index, tile_id
            )));
        }

        let geometry = stitch_parts(&self.polygons).ok_or_else(|| {
            GridError::malformed(format!(
                "placemark #{} ({}): {} polygon parts cannot be merged into a single polygon",
                index,
                tile_id,
                self.polygons.len()
            ))
        })?;

        let declared_epsg = fields.get("EPSG").and_then(|v| v.trim().parse::<u32>().ok());
        let declared_utm_bounds = fields.get("UTM_WKT").and_then(|wkt| {
            let bounds = parse_utm_footprint(wkt);
            if bounds.is_none() {
                warn!("Tile {}: cannot read UTM_WKT '{}'", tile_id, wkt);
            }
            bounds
        });

        Ok(TileRecord {
            tile_id,
            geometry,
            declared_epsg,
            declared_utm_bounds,
        })
    }
}

/// KMLを解析してタイルレコード列を返す
pub fn parse_grid_kml<R: BufRead>(reader: R) -> Result<SourceGrid> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut placemark: Option<PlacemarkBuilder> = None;
    let mut placemark_count = 0usize;
    let mut records = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if name == "placemark" {
                    placemark_count += 1;
                    placemark = Some(PlacemarkBuilder::default());
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                let parent = path.len().checked_sub(2).and_then(|i| path.get(i)).cloned();

                if let Some(builder) = placemark.as_mut() {
                    match name.as_str() {
                        "name" if parent.as_deref() == Some("placemark") => {
                            builder.name = Some(text.trim().to_string());
                        }
                        "description" if parent.as_deref() == Some("placemark") => {
                            builder.description = Some(text.clone());
                        }
                        "coordinates" if parent.as_deref() == Some("linearring") => {
                            let ring = parse_ring(&text, placemark_count)?;
                            if path.iter().any(|p| p == "innerboundaryis") {
                                builder.inners.push(ring);
                            } else {
                                builder.outer = Some(ring);
                            }
                        }
                        "polygon" => builder.finish_polygon(placemark_count)?,
                        _ => {}
                    }
                }

                if name == "placemark" {
                    if let Some(builder) = placemark.take() {
                        let record = builder.finish(placemark_count)?;
                        debug!("Parsed tile {}", record.tile_id);
                        records.push(record);
                    }
                }

                path.pop();
                text.clear();
            }
            Ok(Event::Text(e)) => {
                // HTML断片などで実体参照が解決できない場合は生テキストを使う
                match e.unescape() {
                    Ok(t) => text.push_str(&t),
                    Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
                }
            }
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GridError::malformed(format!(
                    "XML read error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.tile_id.clone()) {
            return Err(GridError::malformed(format!(
                "duplicate tile id {}",
                record.tile_id
            )));
        }
    }

    info!("Parsed {} tiles from grid", records.len());
    Ok(SourceGrid { records })
}

/// `lon,lat[,alt]` の空白区切り列を閉じたリングとして解析する
fn parse_ring(text: &str, index: usize) -> Result<LineString<f64>> {
    let coords = text
        .split_whitespace()
        .map(|tuple| parse_position(tuple, index))
        .collect::<Result<Vec<_>>>()?;

    if coords.len() < 4 {
        return Err(GridError::malformed(format!(
            "placemark #{}: ring has {} positions, at least 4 are required",
            index,
            coords.len()
        )));
    }
    if !is_closed_ring(&coords) {
        return Err(GridError::malformed(format!(
            "placemark #{}: ring is not closed",
            index
        )));
    }

    Ok(LineString::new(coords))
}

fn parse_position(tuple: &str, index: usize) -> Result<Coord<f64>> {
    let values = tuple
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            GridError::malformed(format!(
                "placemark #{}: invalid coordinate '{}': {}",
                index, tuple, e
            ))
        })?;

    let (x, y) = match values.as_slice() {
        [x, y] | [x, y, _] => (*x, *y),
        _ => {
            return Err(GridError::malformed(format!(
                "placemark #{}: coordinate '{}' must be lon,lat[,alt]",
                index, tuple
            )))
        }
    };

    if !x.is_finite() || !(-90.0..=90.0).contains(&y) {
        return Err(GridError::malformed(format!(
            "placemark #{}: coordinate '{}' is out of range",
            index, tuple
        )));
    }

    Ok(Coord { x, y })
}

/// descriptionの `UTM_WKT` (例: `MULTIPOLYGON(((499980 5000040,...)))`) の外接矩形
pub fn parse_utm_footprint(wkt: &str) -> Option<ProjectedBounds> {
    let geometry = WktStr(wkt.trim()).to_geo().ok()?;
    let rect = geometry.bounding_rect()?;
    Some(ProjectedBounds {
        min_x: rect.min().x,
        min_y: rect.min().y,
        max_x: rect.max().x,
        max_y: rect.max().y,
    })
}

/// descriptionのHTML表 (`<b>KEY</b>...値...`) をキーと値の対応に変換する
pub fn parse_description(html: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for segment in html.split("<b>").skip(1) {
        if let Some((key, rest)) = segment.split_once("</b>") {
            let key = strip_tags(key).trim().to_uppercase();
            let value = strip_tags(rest).trim().to_string();
            if !key.is_empty() {
                fields.insert(key, value);
            }
        }
    }
    fields
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
