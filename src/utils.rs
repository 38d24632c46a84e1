//! Utility functions shared across the crate
//!
//! Hashing, tree path handling and the small filesystem helpers used by the
//! shadow repository and by every component that writes trees to disk.

use crate::error::{Result, SrcsError};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// SHA-256 of a buffer as lowercase hex
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-1 digest of a buffer, as used by segment checksums
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Convert a path relative to a tree root into its `/`-separated form
///
/// Tree paths inside containers are always UTF-8 with forward slashes so a
/// recording made on one platform replays on another.
pub fn to_tree_path(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(s) => parts.push(s),
                None => return Err(SrcsError::PathConversion(relative.to_path_buf())),
            },
            Component::CurDir => {}
            _ => return Err(SrcsError::PathConversion(relative.to_path_buf())),
        }
    }
    Ok(parts.join("/"))
}

/// Resolve a tree path read from a container under `root`
///
/// Rejects empty, absolute and escaping paths so a crafted container cannot
/// write outside the destination.
pub fn safe_join(root: &Path, tree_path: &str) -> Result<PathBuf> {
    if tree_path.is_empty() {
        return Err(SrcsError::invalid_format("empty tree path"));
    }
    let mut resolved = root.to_path_buf();
    for part in tree_path.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return Err(SrcsError::invalid_format(format!(
                "unsafe tree path '{}'",
                tree_path
            )));
        }
        if cfg!(windows) && part.contains(':') {
            return Err(SrcsError::invalid_format(format!(
                "unsafe tree path '{}'",
                tree_path
            )));
        }
        resolved.push(part);
    }
    Ok(resolved)
}

/// Make `path` relative to `base`, falling back to canonical forms
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            SrcsError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Whether a mode carries any execute bit
pub fn is_executable_mode(mode: u32) -> bool {
    mode & 0o111 != 0
}

/// Read the unix mode of a file (synthesized on windows)
#[cfg(unix)]
pub fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(windows)]
pub fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Set or clear the execute bits on a written file
#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    let new_mode = if executable {
        mode | ((mode & 0o444) >> 2)
    } else {
        mode & !0o111
    };
    if new_mode != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(new_mode))?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    if target.is_dir() {
        symlink_dir(target, link)?;
    } else {
        symlink_file(target, link)?;
    }
    Ok(())
}

/// Remove a file or symlink if present
pub fn remove_entry_if_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path)?;
            Ok(true)
        }
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove now-empty parent directories of `path` up to (excluding) `root`
pub fn prune_empty_parents(path: &Path, root: &Path) -> Result<()> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if !remove_dir_if_empty(dir)? {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}

/// Remove a directory if it is empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Delete everything inside `dir` except the entries named in `keep`
pub fn clear_directory(dir: &Path, keep: &[&str]) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if keep.iter().any(|k| name.to_str() == Some(*k)) {
            continue;
        }
        remove_entry_if_exists(&entry.path())?;
    }
    Ok(())
}

/// Check that `dir` is absent or empty, creating it if needed
pub fn ensure_empty_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(SrcsError::InvalidDestination {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        if fs::read_dir(dir)?.next().is_some() {
            return Err(SrcsError::InvalidDestination {
                path: dir.to_path_buf(),
                reason: "directory is not empty".to_string(),
            });
        }
    } else {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Write a file atomically via a sibling temp file and rename
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
