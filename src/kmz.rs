use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::info;
use zip::ZipArchive;

use crate::error::{GridError, Result};
use crate::model::SourceGrid;
use crate::parser::parse_grid_kml;

/// KMZ (ZIP圧縮されたKML) の読み込み
pub struct KmzHandler {
    path: PathBuf,
}

impl KmzHandler {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn parse_grid(&self) -> Result<SourceGrid> {
        let file = File::open(&self.path)?;
        parse_kmz(BufReader::new(file))
    }
}

/// アーカイブ内で最初に見つかった `.kml` を解析する（通常は `doc.kml`）
pub fn parse_kmz<R: Read + Seek>(reader: R) -> Result<SourceGrid> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| GridError::malformed(format!("Failed to open KMZ archive: {}", e)))?;

    let kml_index = (0..archive.len())
        .find(|&i| {
            archive
                .name_for_index(i)
                .map(|name| name.to_ascii_lowercase().ends_with(".kml"))
                .unwrap_or(false)
        })
        .ok_or_else(|| GridError::malformed("KMZ archive contains no .kml entry"))?;

    let entry = archive
        .by_index(kml_index)
        .map_err(|e| GridError::malformed(format!("Failed to read KMZ entry: {}", e)))?;
    info!("Reading {} from KMZ archive", entry.name());

    parse_grid_kml(BufReader::new(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const KML: &str = r#"<kml><Document><Placemark><name>32TNT</name><Polygon><outerBoundaryIs><LinearRing><coordinates>9,45 10,45 10,46 9,46 9,45</coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark></Document></kml>"#;

    fn kmz(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_kmz_finds_kml_entry() {
        let bytes = kmz(&[("files/readme.txt", "not a grid"), ("doc.kml", KML)]);
        let grid = parse_kmz(Cursor::new(bytes)).unwrap();
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.records[0].tile_id.to_string(), "32TNT");
    }

    #[test]
    fn test_kmz_without_kml_is_malformed() {
        let bytes = kmz(&[("readme.txt", "nothing here")]);
        assert!(matches!(
            parse_kmz(Cursor::new(bytes)),
            Err(GridError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_not_a_zip_is_malformed() {
        assert!(matches!(
            parse_kmz(Cursor::new(b"plain text".to_vec())),
            Err(GridError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_handler_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("grid.kmz");
        std::fs::write(&path, kmz(&[("doc.kml", KML)])).unwrap();
        assert_eq!(KmzHandler::new(&path).parse_grid().unwrap().len(), 1);
    }
}
