//! Digest marker persisted in a pulled destination directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use klaus_core::error::{ArtifactError, Result};
use serde::{Deserialize, Serialize};

/// Marker file name; starts with [`super::RESERVED_PREFIX`].
pub const CACHE_FILE_NAME: &str = ".klaus-cache.json";

/// Record of the last successful pull into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Manifest digest the directory was extracted from
    pub digest: String,
    /// Reference the pull was requested with
    #[serde(rename = "ref")]
    pub reference: String,
    /// When the pull completed
    pub pulled_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(digest: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            reference: reference.into(),
            pulled_at: Utc::now(),
        }
    }
}

fn entry_path(dest_dir: &Path) -> PathBuf {
    dest_dir.join(CACHE_FILE_NAME)
}

/// Read the marker in `dest_dir`.
///
/// A missing, unreadable or corrupt marker reads as `None`.
pub fn read(dest_dir: &Path) -> Option<CacheEntry> {
    let path = entry_path(dest_dir);
    let data = std::fs::read(&path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
            None
        }
    }
}

/// Whether `dest_dir` was last populated from exactly `digest`.
pub fn is_cached(dest_dir: &Path, digest: &str) -> bool {
    read(dest_dir).map_or(false, |entry| entry.digest == digest)
}

/// Persist `entry` in `dest_dir` atomically (write tmp, rename).
pub fn write(dest_dir: &Path, entry: &CacheEntry) -> Result<()> {
    let path = entry_path(dest_dir);
    let tmp_path = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(entry)?;

    std::fs::write(&tmp_path, &data).map_err(|e| {
        ArtifactError::Cache(format!(
            "Failed to write cache entry {}: {}",
            tmp_path.display(),
            e
        ))
    })?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        ArtifactError::Cache(format!(
            "Failed to rename cache entry {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;
    Ok(())
}
