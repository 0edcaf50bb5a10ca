//! Object storage access.
//!
//! Jobs reference an uploaded object only by its `storage_path`. Every
//! batch step of the ingestion chain re-downloads the bytes through this
//! module — steps share no memory, so the bytes must always be fetchable
//! from the path alone.
//!
//! Supported path forms:
//! - `http://` / `https://` URLs, fetched with `reqwest`
//! - absolute filesystem paths
//! - relative paths, resolved against `[storage] root`

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;

/// Download the raw bytes behind a job's storage path.
pub async fn fetch_bytes(config: &StorageConfig, storage_path: &str) -> Result<Vec<u8>> {
    if storage_path.starts_with("http://") || storage_path.starts_with("https://") {
        let resp = reqwest::get(storage_path)
            .await
            .with_context(|| format!("Failed to fetch {}", storage_path))?;
        if !resp.status().is_success() {
            bail!("Fetch of {} returned HTTP {}", storage_path, resp.status());
        }
        return Ok(resp.bytes().await?.to_vec());
    }

    let path = resolve_local(config, storage_path)?;
    std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
}

fn resolve_local(config: &StorageConfig, storage_path: &str) -> Result<PathBuf> {
    let p = Path::new(storage_path);
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    match &config.root {
        Some(root) => Ok(root.join(p)),
        None => bail!(
            "Relative storage path '{}' requires [storage] root to be configured",
            storage_path
        ),
    }
}

/// Durable public URL recorded on the file record at finalization.
/// Remote paths are already URLs; local paths need a configured base.
pub fn public_url(config: &StorageConfig, storage_path: &str) -> Option<String> {
    if storage_path.starts_with("http://") || storage_path.starts_with("https://") {
        return Some(storage_path.to_string());
    }
    config.public_base_url.as_ref().map(|base| {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            storage_path.trim_start_matches('/')
        )
    })
}
