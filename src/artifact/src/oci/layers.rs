//! Content layer packing and extraction.
//!
//! Artifacts carry their content as a single gzip-compressed tar layer.
//! Packing skips cache bookkeeping files; extraction validates every entry
//! path before writing and replaces the destination only once the whole
//! archive has been extracted.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use klaus_core::error::{ArtifactError, Result};
use tar::{Archive, Builder, EntryType, HeaderMode};

use crate::cache::RESERVED_PREFIX;

/// Maximum size of a single regular file inside a content layer.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Mode applied to extracted files whose header carries no permission bits.
const DEFAULT_FILE_MODE: u32 = 0o600;

/// Pack `source_dir` into a gzip-compressed tar stream.
///
/// Entry paths are relative to `source_dir` and always use `/` separators.
/// The root directory itself is not recorded, and anything whose base name
/// starts with the reserved cache prefix is left out along with its children.
/// Headers are written in deterministic mode so identical trees produce
/// identical bytes.
pub fn pack(source_dir: &Path) -> Result<Vec<u8>> {
    if !source_dir.is_dir() {
        return Err(ArtifactError::NotFound(format!(
            "Source directory not found: {}",
            source_dir.display()
        )));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    append_dir_entries(&mut builder, source_dir, "")?;

    let encoder = builder.into_inner().map_err(|e| {
        ArtifactError::ArchiveInvalid(format!("Failed to finalize archive: {}", e))
    })?;
    let data = encoder.finish().map_err(|e| {
        ArtifactError::ArchiveInvalid(format!("Failed to finish compression: {}", e))
    })?;

    tracing::debug!(
        source = %source_dir.display(),
        size = data.len(),
        "Packed content layer"
    );
    Ok(data)
}

fn append_dir_entries<W: Write>(builder: &mut Builder<W>, dir: &Path, prefix: &str) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with(RESERVED_PREFIX) {
            continue;
        }

        let relative = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            builder.append_dir(&relative, &path).map_err(|e| {
                ArtifactError::ArchiveInvalid(format!(
                    "Failed to add directory {} to archive: {}",
                    relative, e
                ))
            })?;
            append_dir_entries(builder, &path, &relative)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, &relative).map_err(|e| {
                ArtifactError::ArchiveInvalid(format!(
                    "Failed to add file {} to archive: {}",
                    relative, e
                ))
            })?;
        } else {
            tracing::warn!(path = %path.display(), "Skipping non-regular file while packing");
        }
    }

    Ok(())
}

/// Extract a gzip-compressed tar stream into `dest_dir`, replacing its
/// previous contents.
///
/// The archive is first extracted into a staging directory beside
/// `dest_dir`. Absolute entry paths, paths escaping the root, and regular
/// files larger than [`MAX_FILE_SIZE`] abort the whole extraction; in that
/// case `dest_dir` is left exactly as it was. Symlinks, hard links and
/// device entries are skipped.
pub fn unpack<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
    let parent = match dest_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let staging = tempfile::Builder::new()
        .prefix(&format!("{}staging-", RESERVED_PREFIX))
        .tempdir_in(&parent)?;

    extract_entries(reader, staging.path())?;
    replace_dir(staging.path(), dest_dir)?;

    tracing::debug!(target = %dest_dir.display(), "Extracted content layer");
    Ok(())
}

fn extract_entries<R: Read>(reader: R, root: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let entries = archive.entries().map_err(|e| {
        ArtifactError::ArchiveInvalid(format!("Failed to read archive: {}", e))
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| {
            ArtifactError::ArchiveInvalid(format!("Failed to read archive entry: {}", e))
        })?;
        let raw_path = entry
            .path()
            .map_err(|e| ArtifactError::ArchiveInvalid(format!("Invalid entry path: {}", e)))?
            .into_owned();

        let Some(relative) = sanitize_entry_path(&raw_path)? else {
            continue;
        };
        let target = root.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let declared = entry.header().size().map_err(|e| {
                    ArtifactError::ArchiveInvalid(format!(
                        "Invalid size for {}: {}",
                        raw_path.display(),
                        e
                    ))
                })?;
                if declared > MAX_FILE_SIZE {
                    return Err(oversized(&raw_path));
                }

                if let Some(dir) = target.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let mut file = File::create(&target)?;
                let written = std::io::copy(&mut (&mut entry).take(MAX_FILE_SIZE + 1), &mut file)
                    .map_err(|e| {
                        ArtifactError::ArchiveInvalid(format!(
                            "Failed to extract {}: {}",
                            raw_path.display(),
                            e
                        ))
                    })?;
                if written > MAX_FILE_SIZE {
                    return Err(oversized(&raw_path));
                }

                let mode = entry.header().mode().unwrap_or(0) & 0o7777;
                set_file_mode(&target, if mode == 0 { DEFAULT_FILE_MODE } else { mode })?;
            }
            other => {
                tracing::warn!(
                    path = %raw_path.display(),
                    entry_type = ?other,
                    "Skipping non-regular archive entry"
                );
            }
        }
    }

    Ok(())
}

/// Normalize an entry path, rejecting absolute paths and parent escapes.
///
/// Returns `None` for entries that normalize to the archive root.
fn sanitize_entry_path(raw: &Path) -> Result<Option<PathBuf>> {
    let mut normalized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(ArtifactError::ArchiveInvalid(format!(
                    "Absolute path in archive: {}",
                    raw.display()
                )));
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ArtifactError::ArchiveInvalid(format!(
                        "Path escapes destination: {}",
                        raw.display()
                    )));
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

fn oversized(path: &Path) -> ArtifactError {
    ArtifactError::ArchiveInvalid(format!(
        "File {} exceeds maximum size of {} bytes",
        path.display(),
        MAX_FILE_SIZE
    ))
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Swap `staging` into place at `dest`, restoring the old tree on failure.
fn replace_dir(staging: &Path, dest: &Path) -> Result<()> {
    if !dest.exists() {
        std::fs::rename(staging, dest)?;
        return Ok(());
    }

    let staging_name = staging
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let backup = staging.with_file_name(format!("{}-replaced", staging_name));

    std::fs::rename(dest, &backup)?;
    if let Err(e) = std::fs::rename(staging, dest) {
        let _ = std::fs::rename(&backup, dest);
        return Err(e.into());
    }
    if let Err(e) = std::fs::remove_dir_all(&backup) {
        tracing::warn!(path = %backup.display(), error = %e, "Failed to remove replaced directory");
    }
    Ok(())
}
