use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use s2_grid::{
    run, Compression, Downloader, PipelineConfig, WriterOptions, GRID_KML_URL, LAND_GEOJSON_URL,
};
use std::path::PathBuf;
use tracing::{error, info};

/// Sentinel-2 のMGRSタイリンググリッドをGeoParquetに変換する
///
/// `--download` を付けると、GRID と `--land-mask` のパスにファイルが無い場合に取得する。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力グリッド (KMLまたはKMZ)
    #[arg(value_name = "GRID")]
    grid: PathBuf,

    /// 陸域ポリゴンのGeoJSON（例: ne_10m_land.geojson）
    #[arg(long, value_name = "GEOJSON")]
    land_mask: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// 全タイルの出力ファイル名
    #[arg(long, default_value = "s2_grid.parquet")]
    full_name: String,

    /// 陸域タイルの出力ファイル名
    #[arg(long, default_value = "s2_grid_land.parquet")]
    land_name: String,

    /// 圧縮方式 (snappy, zstd, uncompressed)
    #[arg(long, default_value = "snappy")]
    compression: Compression,

    /// 1行グループあたりの最大行数
    #[arg(long, default_value_t = 16_384)]
    row_group_size: usize,

    /// bbox covering列を追加（リモートクエリの絞り込み用）
    #[arg(long)]
    bbox_covering: bool,

    /// 書き出し後にファイルを読み戻して検証
    #[arg(long)]
    verify: bool,

    /// 入力ファイルが無ければダウンロードする
    #[arg(long)]
    download: bool,

    /// グリッドの取得元
    #[arg(long, value_name = "URL", default_value = GRID_KML_URL)]
    grid_url: String,

    /// 陸域マスクの取得元
    #[arg(long, value_name = "URL", default_value = LAND_GEOJSON_URL)]
    land_mask_url: String,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    if args.download {
        let downloader = Downloader::new()?;
        downloader
            .fetch_if_missing(&args.grid_url, &args.grid)
            .context("Failed to fetch grid")?;
        downloader
            .fetch_if_missing(&args.land_mask_url, &args.land_mask)
            .context("Failed to fetch land mask")?;
    }

    if !args.grid.is_file() {
        error!("Invalid grid path: {:?}", args.grid);
        anyhow::bail!("Grid path must be a .kml or .kmz file");
    }

    let config = PipelineConfig {
        grid_path: args.grid,
        land_mask_path: args.land_mask,
        output_dir: args.output,
        full_file_name: args.full_name,
        land_file_name: args.land_name,
        writer: WriterOptions {
            compression: args.compression,
            max_row_group_size: args.row_group_size,
            bbox_covering: args.bbox_covering,
        },
        verify: args.verify,
    };

    let summary = run(&config)?;
    info!("Full grid: {:?} ({} tiles)", summary.full_path, summary.total_tiles);
    info!("Land grid: {:?} ({} tiles)", summary.land_path, summary.land_tiles);

    info!("Total processing time: {:?}", start_time.elapsed());
    Ok(())
}
