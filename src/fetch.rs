//! Byte fetching for asset URLs.
//!
//! Avatar bundles and motion clips are referenced by URL. Plain paths and
//! `file://` URLs are read through `tokio::fs`; `http://`/`https://` go
//! through `reqwest`.

use bytes::Bytes;
use std::path::PathBuf;

/// Where an asset URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    File(PathBuf),
    Http(String),
}

impl AssetSource {
    pub fn parse(url: &str) -> Self {
        let trimmed = url.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Http(trimmed.to_string())
        } else if let Some(path) = trimmed.strip_prefix("file://") {
            Self::File(PathBuf::from(path))
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

/// Fetch the raw bytes behind `url`.
pub async fn fetch_bytes(url: &str) -> Result<Bytes, String> {
    match AssetSource::parse(url) {
        AssetSource::File(path) => tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| format!("{}: {}", path.display(), e)),
        AssetSource::Http(url) => {
            let response = reqwest::get(&url).await.map_err(|e| e.to_string())?;
            let response = response.error_for_status().map_err(|e| e.to_string())?;
            response.bytes().await.map_err(|e| e.to_string())
        }
    }
}
