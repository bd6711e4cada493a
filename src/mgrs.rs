//! MGRSタイルID (例: `32TNT`) の解析とUTMゾーンへの対応付け
//!
//! タイルIDは「グリッドゾーン番号(2桁) + 緯度帯(1文字) + 100km正方形(2文字)」。
//! ゾーン番号はそのままUTMゾーン番号になり、緯度帯で北半球/南半球が決まる。

use std::fmt;
use std::str::FromStr;

use crate::error::{GridError, Result};

const EPSG_UTM_NORTH_BASE: u32 = 32600;
const EPSG_UTM_SOUTH_BASE: u32 = 32700;

/// 形式上は正しいMGRSタイルID（ゾーン範囲などはまだ検証していない）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MgrsTileId {
    zone: u8,
    band: char,
    square: [char; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

/// タイルIDから導かれるUTMゾーン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub hemisphere: Hemisphere,
}

impl MgrsTileId {
    /// 形式のみ検証する。`1A` のような短縮ゾーン表記は受け付けない。
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 5 {
            return Err(GridError::malformed(format!(
                "tile id '{}' must have 5 characters (zone digits, band, square)",
                s
            )));
        }

        if !chars[0].is_ascii_digit() || !chars[1].is_ascii_digit() {
            return Err(GridError::malformed(format!(
                "tile id '{}' does not start with two zone digits",
                s
            )));
        }
        if !chars[2..].iter().all(|c| c.is_ascii_alphabetic()) {
            return Err(GridError::malformed(format!(
                "tile id '{}' must end with band and square letters",
                s
            )));
        }

        let zone = (chars[0] as u8 - b'0') * 10 + (chars[1] as u8 - b'0');
        Ok(Self {
            zone,
            band: chars[2].to_ascii_uppercase(),
            square: [chars[3].to_ascii_uppercase(), chars[4].to_ascii_uppercase()],
        })
    }

    pub fn zone_digits(&self) -> u8 {
        self.zone
    }

    pub fn band(&self) -> char {
        self.band
    }

    /// ゾーン番号と緯度帯からUTMゾーンを決定する
    pub fn utm_zone(&self) -> Result<UtmZone> {
        let tile_id = self.to_string();

        if !(1..=60).contains(&self.zone) {
            return Err(GridError::unresolvable(
                &tile_id,
                format!("grid zone {} is outside 1..=60", self.zone),
            ));
        }

        let hemisphere = match self.band {
            'I' | 'O' => {
                return Err(GridError::unresolvable(
                    &tile_id,
                    format!("latitude band '{}' is not used by MGRS", self.band),
                ))
            }
            'C'..='M' => Hemisphere::South,
            'N'..='X' => Hemisphere::North,
            // A/B/Y/Z は極域(UPS)でUTMではない
            other => {
                return Err(GridError::unresolvable(
                    &tile_id,
                    format!("latitude band '{}' has no UTM zone", other),
                ))
            }
        };

        Ok(UtmZone {
            number: self.zone,
            hemisphere,
        })
    }
}

impl FromStr for MgrsTileId {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MgrsTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{}{}{}",
            self.zone, self.band, self.square[0], self.square[1]
        )
    }
}

impl UtmZone {
    pub fn epsg(&self) -> u32 {
        match self.hemisphere {
            Hemisphere::North => EPSG_UTM_NORTH_BASE + self.number as u32,
            Hemisphere::South => EPSG_UTM_SOUTH_BASE + self.number as u32,
        }
    }

    /// 中央子午線（度）
    pub fn central_meridian(&self) -> f64 {
        self.number as f64 * 6.0 - 183.0
    }

    pub fn is_south(&self) -> bool {
        self.hemisphere == Hemisphere::South
    }

    pub fn from_epsg(epsg: u32) -> Option<Self> {
        let (base, hemisphere) = match epsg {
            32601..=32660 => (EPSG_UTM_NORTH_BASE, Hemisphere::North),
            32701..=32760 => (EPSG_UTM_SOUTH_BASE, Hemisphere::South),
            _ => return None,
        };
        Some(Self {
            number: (epsg - base) as u8,
            hemisphere,
        })
    }
}
