//! 入力データ (ESAグリッドKML / Natural Earth陸域GeoJSON) の取得

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::error::{GridError, Result};
use crate::pipeline::partial_path;

pub const GRID_KML_URL: &str = "https://sentinel.esa.int/documents/247904/1955685/S2A_OPER_GIP_TILPAR_MPC__20151209T095117_V20150622T000000_21000101T000000_B00.kml";
pub const LAND_GEOJSON_URL: &str =
    "https://github.com/nvkelso/natural-earth-vector/raw/v5.1.2/geojson/ne_10m_land.geojson";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// URL末尾のファイル名
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GridError::download("(client)", e))?;
        Ok(Self { client })
    }

    /// `dest` が無ければ `url` から取得する。既にあれば何もしない。
    ///
    /// 本体は `<dest>.partial` に書いてからリネームするため、
    /// 中断しても不完全なファイルが `dest` に残ることはない。
    pub fn fetch_if_missing(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        if dest.exists() {
            info!("{:?} already exists, skipping download", dest);
            return Ok(dest.to_path_buf());
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| GridError::download(url, e))?;
        }

        let partial = partial_path(dest);
        info!("Downloading {} -> {:?}", url, dest);
        match self.fetch_to(url, &partial) {
            Ok(bytes) => {
                fs::rename(&partial, dest).map_err(|e| {
                    GridError::download(url, format!("Failed to rename {:?}: {}", partial, e))
                })?;
                info!("Downloaded {:?} ({} bytes)", dest, bytes);
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                if partial.exists() {
                    let _ = fs::remove_file(&partial);
                }
                Err(e)
            }
        }
    }

    fn fetch_to(&self, url: &str, path: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| GridError::download(url, e))?;
        let expected = response.content_length();

        let file = File::create(path).map_err(|e| GridError::download(url, e))?;
        let mut writer = BufWriter::new(file);
        let bytes = response
            .copy_to(&mut writer)
            .map_err(|e| GridError::download(url, e))?;
        writer.flush().map_err(|e| GridError::download(url, e))?;

        if let Some(expected) = expected {
            if bytes != expected {
                return Err(GridError::download(
                    url,
                    format!("size mismatch: expected {} bytes, got {}", expected, bytes),
                ));
            }
        }
        debug!("Fetched {} bytes from {}", bytes, url);
        Ok(bytes)
    }
}
