use rayon::prelude::*;
use tracing::info;

use crate::land::LandMask;
use crate::model::GridCollection;

/// 陸域マスクと交わるタイルだけを元の順序のまま残す
pub fn filter_land(grid: &GridCollection, mask: &LandMask) -> GridCollection {
    let start_time = std::time::Instant::now();

    let keep: Vec<bool> = grid
        .tiles()
        .par_iter()
        .map(|tile| mask.intersects(&tile.geometry))
        .collect();

    let land: GridCollection = grid
        .tiles()
        .iter()
        .zip(keep)
        .filter(|(_, keep)| *keep)
        .map(|(tile, _)| tile.clone())
        .collect();

    info!(
        "Land filter kept {} of {} tiles in {:?}",
        land.len(),
        grid.len(),
        start_time.elapsed()
    );
    land
}
