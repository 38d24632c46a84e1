//! Exporting parts of a recording
//!
//! - [`export_tree_at`] rebuilds the tree as it was at one segment
//! - [`export_segments`] cuts a shorter, self-contained container
//! - [`list_segments`] describes every segment without decoding bodies
//!
//! Selectors are resolved with a first pass over the container, so an
//! unknown timestamp or tag fails before any output is produced.

use crate::container::{ContainerFile, ContainerWriter};
use crate::error::{Result, SrcsError};
use crate::replay::TreeReplayer;
use crate::types::{RestoreStats, SegmentInfo, Selector};
use crate::utils;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Index of the first segment matching `selector`
///
/// Corrupt segments before the match fail the lookup.
pub fn resolve_selector(container: &Path, selector: &Selector) -> Result<usize> {
    let reader = ContainerFile::new(container).reader()?;
    for (index, item) in reader.enumerate() {
        let segment = item?;
        if selector.matches(segment.timestamp_sec, &segment.tag) {
            debug!("{} resolved to segment #{}", selector, index);
            return Ok(index);
        }
    }
    Err(SrcsError::UnresolvedSelector(selector.to_string()))
}

/// Write the tree recorded at `selector` into the empty directory `dest`
///
/// The tree is rebuilt in a staging directory beside `dest` and moved into
/// place only once every segment applied, so a failed export leaves `dest`
/// as it was.
#[instrument(skip_all, fields(container = ?container, selector = %selector))]
pub fn export_tree_at(container: &Path, selector: &Selector, dest: &Path) -> Result<RestoreStats> {
    let selected = resolve_selector(container, selector)?;
    let parent = parent_dir(dest);
    if dest.exists() {
        utils::ensure_empty_dir(dest)?;
    } else {
        fs::create_dir_all(parent)?;
    }

    let staging = tempfile::Builder::new()
        .prefix(".srcs-export-")
        .tempdir_in(parent)?;
    let mut replayer = TreeReplayer::new(staging.path());
    let reader = ContainerFile::new(container).reader()?;
    let last = replayer.apply_all(reader.take(selected + 1))?;

    if dest.exists() {
        fs::remove_dir(dest)?;
    }
    fs::rename(staging.path(), dest)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o755))?;
    }
    info!("Exported tree at {} into {:?}", selector, dest);
    Ok(last)
}

/// Write segments up to and including `selector` into a new container `out`
///
/// Returns the number of segments written. Nothing is left at `out` when
/// the export fails.
#[instrument(skip_all, fields(container = ?container, selector = %selector))]
pub fn export_segments(container: &Path, selector: &Selector, out: &Path) -> Result<usize> {
    let selected = resolve_selector(container, selector)?;

    let reader = ContainerFile::new(container).reader()?;
    let created = reader.header().timestamp;
    let temp = NamedTempFile::new_in(parent_dir(out))?;
    let mut writer = ContainerWriter::new(BufWriter::new(temp.reopen()?), created)?;

    for item in reader.take(selected + 1) {
        writer.append(&item?)?;
    }
    let written = writer.segments_written();
    writer.finish()?;
    temp.persist(out).map_err(|e| e.error)?;

    info!("Exported {} segments into {:?}", written, out);
    Ok(written)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Restartable listing of a container's segments
#[derive(Debug, Clone)]
pub struct SegmentListing {
    file: ContainerFile,
}

impl SegmentListing {
    /// List the segments of the container at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: ContainerFile::new(path),
        }
    }

    /// Read the container from the start
    ///
    /// Each call opens the file again, so a listing can be iterated any
    /// number of times.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<SegmentInfo>>> {
        let reader = self.file.reader()?;
        Ok(reader.enumerate().map(|(index, item)| {
            item.map(|segment| SegmentInfo {
                index,
                timestamp_sec: segment.timestamp_sec,
                snapshot_type: segment.segment_type,
                size: segment.body.len() as u64,
                tag: segment.tag,
            })
        }))
    }

    /// Collect the whole listing, failing on the first bad segment
    pub fn collect_all(&self) -> Result<Vec<SegmentInfo>> {
        self.iter()?.collect()
    }
}

/// Describe the segments of the container at `path`
pub fn list_segments(path: &Path) -> SegmentListing {
    SegmentListing::new(path)
}
