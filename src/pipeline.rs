//! グリッド読み込みからGeoParquet出力までの一連の処理

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{GridError, Result};
use crate::filter::filter_land;
use crate::land::LandMask;
use crate::model::GridCollection;
use crate::parser::load_grid;
use crate::reader::read_grid;
use crate::reproject::resolve_grid;
use crate::writer::{GeoParquetWriter, WriterOptions};

const PARTIAL_SUFFIX: &str = ".partial";
const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// ESAのタイリンググリッド (KML / KMZ)
    pub grid_path: PathBuf,
    /// 陸域ポリゴンのGeoJSON
    pub land_mask_path: PathBuf,
    pub output_dir: PathBuf,
    pub full_file_name: String,
    pub land_file_name: String,
    pub writer: WriterOptions,
    /// 書き出したファイルを読み戻して内容を照合する
    pub verify: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid_path: PathBuf::from(
                "S2A_OPER_GIP_TILPAR_MPC__20151209T095117_V20150622T000000_21000101T000000_B00.kml",
            ),
            land_mask_path: PathBuf::from("ne_10m_land.geojson"),
            output_dir: PathBuf::from("."),
            full_file_name: "s2_grid.parquet".to_string(),
            land_file_name: "s2_grid_land.parquet".to_string(),
            writer: WriterOptions::default(),
            verify: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSummary {
    pub total_tiles: usize,
    pub land_tiles: usize,
    pub full_path: PathBuf,
    pub land_path: PathBuf,
    pub elapsed: Duration,
}

/// `<name>.partial`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

pub fn run(config: &PipelineConfig) -> Result<PipelineSummary> {
    let start_time = Instant::now();

    if config.full_file_name == config.land_file_name {
        return Err(GridError::write(format!(
            "full and land outputs share the file name '{}'",
            config.full_file_name
        )));
    }

    let source = load_grid(&config.grid_path)?;
    info!("Loaded {} tiles from {:?}", source.len(), config.grid_path);

    let grid = resolve_grid(&source)?;
    let mask = LandMask::open(&config.land_mask_path)?;
    let land = filter_land(&grid, &mask);

    fs::create_dir_all(&config.output_dir).map_err(|e| {
        GridError::write(format!(
            "Failed to create output directory {:?}: {}",
            config.output_dir, e
        ))
    })?;
    let full_path = config.output_dir.join(&config.full_file_name);
    let land_path = config.output_dir.join(&config.land_file_name);

    let outputs = [(&grid, full_path.as_path()), (&land, land_path.as_path())];
    if let Err(e) = commit_outputs(&GeoParquetWriter::new(config.writer.clone()), &outputs, config.verify) {
        for (_, path) in &outputs {
            remove_if_exists(&partial_path(path));
        }
        return Err(e);
    }

    let summary = PipelineSummary {
        total_tiles: grid.len(),
        land_tiles: land.len(),
        full_path,
        land_path,
        elapsed: start_time.elapsed(),
    };
    info!(
        "Wrote {} tiles ({} on land) in {:?}",
        summary.total_tiles, summary.land_tiles, summary.elapsed
    );
    Ok(summary)
}

/// 全出力を `.partial` に書いてから一括でリネームする
fn commit_outputs(
    writer: &GeoParquetWriter,
    outputs: &[(&GridCollection, &Path)],
    verify: bool,
) -> Result<()> {
    for (grid, path) in outputs {
        let partial = partial_path(path);
        writer.write(grid, &partial)?;
        if verify {
            verify_output(grid, &partial)?;
        }
    }

    let mut committed: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(outputs.len());
    for (_, path) in outputs {
        match commit_one(path) {
            Ok(backup) => committed.push((*path, backup)),
            Err(e) => {
                rollback(&committed);
                return Err(e);
            }
        }
    }

    // 全てリネームできたら旧ファイルを消す
    for (_, backup) in &committed {
        if let Some(backup) = backup {
            remove_if_exists(backup);
        }
    }
    Ok(())
}

/// `.partial` を最終パスへリネームする。既存ファイルは `.backup` に退避してそのパスを返す。
fn commit_one(path: &Path) -> Result<Option<PathBuf>> {
    let partial = partial_path(path);
    let backup = if path.is_file() {
        let backup = backup_path(path);
        fs::rename(path, &backup).map_err(|e| {
            GridError::write(format!("Failed to move {:?} aside: {}", path, e))
        })?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(&partial, path) {
        if let Some(backup) = &backup {
            restore_backup(path, backup);
        }
        return Err(GridError::write(format!(
            "Failed to rename {:?} to {:?}: {}",
            partial, path, e
        )));
    }
    debug!("Committed {:?}", path);
    Ok(backup)
}

/// コミット済みの出力を取り消し、退避した旧ファイルを戻す
fn rollback(committed: &[(&Path, Option<PathBuf>)]) {
    for (path, backup) in committed.iter().rev() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove committed output {:?}: {}", path, e);
        }
        if let Some(backup) = backup {
            restore_backup(path, backup);
        }
    }
}

fn restore_backup(path: &Path, backup: &Path) {
    if let Err(e) = fs::rename(backup, path) {
        warn!("Failed to restore {:?} from {:?}: {}", path, backup, e);
    }
}

fn verify_output(expected: &GridCollection, path: &Path) -> Result<()> {
    let read = read_grid(path)?;
    if read != *expected {
        return Err(GridError::read(format!(
            "{:?} does not read back as written ({} tiles, expected {})",
            path,
            read.len(),
            expected.len()
        )));
    }
    debug!("Verified {} tiles in {:?}", read.len(), path);
    Ok(())
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}
