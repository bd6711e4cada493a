use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridError>;

#[derive(Debug, Error)]
pub enum GridError {
    /// 入力グリッドのジオメトリまたはタイルIDが不正
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// タイルIDがUTMゾーン/緯度帯に解決できない
    #[error("Unresolvable UTM zone for tile '{tile_id}': {reason}")]
    UnresolvableZone { tile_id: String, reason: String },

    #[error("Projection failed for tile '{tile_id}': {reason}")]
    Projection { tile_id: String, reason: String },

    #[error("Land mask error: {0}")]
    LandMask(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Read error: {0}")]
    Read(String),

    /// 入力データの取得に失敗
    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GridError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        GridError::MalformedInput(message.into())
    }

    pub(crate) fn unresolvable(tile_id: &str, reason: impl Into<String>) -> Self {
        GridError::UnresolvableZone {
            tile_id: tile_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(message: impl std::fmt::Display) -> Self {
        GridError::Write(message.to_string())
    }

    pub(crate) fn download(url: &str, reason: impl std::fmt::Display) -> Self {
        GridError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(message: impl std::fmt::Display) -> Self {
        GridError::Read(message.to_string())
    }
}
