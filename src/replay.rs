//! Rebuilding trees from segments
//!
//! A [`TreeReplayer`] applies segments in order to one target directory.
//! Key segments replace everything except `.git`; patch segments are
//! validated against the current state before anything is written.
//!
//! Patches recorded against the last key snapshot are applied to the
//! remembered key archive in memory and the result restored as a whole, so
//! those segments never depend on what the previous segment left on disk.
//!
//! When a caller skips a segment it cannot read, the target no longer holds
//! the state the next patch expects. After [`TreeReplayer::mark_out_of_sync`]
//! patches are applied with [`ApplyMode::Force`] until the next key segment
//! restores a known state.

use crate::error::{Result, SrcsError};
use crate::format::Segment;
use crate::snapshot::{ApplyMode, KeySnapshot, Snapshot, TreeArchive};
use crate::types::{PatchBase, RestoreStats};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Applies a stream of segments to a directory
#[derive(Debug)]
pub struct TreeReplayer {
    target: PathBuf,
    last_key: Option<KeySnapshot>,
    applied: usize,
    out_of_sync: bool,
}

impl TreeReplayer {
    /// Replay into `target`, which is created if missing
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            last_key: None,
            applied: 0,
            out_of_sync: false,
        }
    }

    /// Directory being rebuilt
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Segments applied so far
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Whether patches are being forced since a skipped segment
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    /// Record that a segment was skipped without being applied
    ///
    /// Patches are forced over the current state until the next key segment.
    pub fn mark_out_of_sync(&mut self) {
        if !self.out_of_sync {
            warn!("Replay of {:?} is out of sync until the next key segment", self.target);
        }
        self.out_of_sync = true;
    }

    /// Decode `segment` and apply it to the target
    ///
    /// On error the target is left as it was before the call.
    pub fn apply_segment(&mut self, segment: &Segment) -> Result<RestoreStats> {
        let snapshot = Snapshot::decompress(segment.segment_type, &segment.body)?;
        let mode = if self.out_of_sync {
            ApplyMode::Force
        } else {
            ApplyMode::Strict
        };
        let stats = match snapshot {
            Snapshot::Key(key) => {
                let stats = key.restore(&self.target)?;
                self.last_key = Some(key);
                if self.out_of_sync {
                    debug!("Key segment at {}s resynchronised the replay", segment.timestamp_sec);
                    self.out_of_sync = false;
                }
                stats
            }
            Snapshot::Patch(patch) => match patch.patch().base {
                PatchBase::Previous => patch.restore_with(&self.target, mode)?,
                PatchBase::LastKey => {
                    let empty = TreeArchive::default();
                    let base = match (&self.last_key, mode) {
                        (Some(key), _) => key.archive(),
                        (None, ApplyMode::Force) => &empty,
                        (None, ApplyMode::Strict) => {
                            return Err(SrcsError::patch_apply(
                                "/",
                                "patch refers to a key snapshot never seen",
                            ))
                        }
                    };
                    let (archive, conflicts) = patch.apply_to_archive_with(base, mode)?;
                    let mut stats = KeySnapshot::from_archive(archive).restore(&self.target)?;
                    stats.conflicts = conflicts;
                    stats
                }
            },
        };

        self.applied += 1;
        trace!(
            "Applied {} segment at {}s: {} written, {} removed",
            segment.segment_type,
            segment.timestamp_sec,
            stats.files_written,
            stats.files_removed
        );
        Ok(stats)
    }

    /// Apply segments in order, stopping at the first failure
    ///
    /// Returns the stats of the last segment applied.
    pub fn apply_all(
        &mut self,
        segments: impl IntoIterator<Item = Result<Segment>>,
    ) -> Result<RestoreStats> {
        let mut last = RestoreStats::default();
        for segment in segments {
            last = self.apply_segment(&segment?)?;
        }
        debug!("Replayed {} segments into {:?}", self.applied, self.target);
        Ok(last)
    }
}
