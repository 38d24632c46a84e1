//! Key and patch snapshots
//!
//! A [`KeySnapshot`] carries every tracked file of a committed tree and
//! restores it wholesale. A [`PatchSnapshot`] carries only what changed
//! between two committed trees and can only be applied to the state it was
//! taken from.
//!
//! ## Body encoding
//!
//! Both are serialized with bincode and wrapped by the
//! [`CompressionEngine`]. The segment type in the container says which of
//! the two a body holds.
//!
//! ## Applying patches
//!
//! Every operation is checked against the target before anything is
//! written: an `Add` must not find an existing file, and `Remove`/`Modify`
//! must find exactly the content the patch was computed from. A patch that
//! fails this check leaves the target untouched.
//!
//! [`ApplyMode::Force`] drops those checks for replaying past a skipped
//! segment: additions overwrite, removals of missing paths are no-ops, and
//! line deltas are tried against whatever the file holds now. Each such
//! mismatch is counted in [`RestoreStats::conflicts`].

use crate::compression::CompressionEngine;
use crate::delta::{self, DeltaOp};
use crate::error::{Result, SrcsError};
use crate::format::SnapshotType;
use crate::shadow::ShadowRepository;
use crate::tree::{EntryKind, NodeContent, TreeManifest, VCS_DIR};
use crate::types::{PatchBase, RestoreStats};
use crate::utils;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// How strictly a patch is checked against the state it is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Every operation must find the state it was computed from
    #[default]
    Strict,
    /// Apply over whatever is there, counting mismatches as conflicts
    Force,
}

/// Every file of a tree, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeArchive {
    /// Tree path and content
    pub entries: Vec<(String, NodeContent)>,
}

/// How a modified file changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentChange {
    /// Replace with this content
    Full(NodeContent),
    /// Edit the old file line by line
    Lines {
        /// Line delta from the old content
        delta: Vec<DeltaOp>,
        /// Execute bit of the new file
        executable: bool,
    },
}

/// One change to one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    /// Create a path that did not exist
    Add { path: String, node: NodeContent },
    /// Delete a path that held `base_hash`
    Remove { path: String, base_hash: String },
    /// Change a path that held `base_hash`
    Modify {
        path: String,
        base_hash: String,
        change: ContentChange,
    },
}

impl PatchOp {
    /// Tree path the operation touches
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path, .. } | PatchOp::Modify { path, .. } => {
                path
            }
        }
    }
}

/// Ordered changes plus the state they apply to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePatch {
    /// State the patch was computed against
    pub base: PatchBase,
    /// Removals first, then additions and modifications, each sorted by path
    pub ops: Vec<PatchOp>,
}

/// Full capture of a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySnapshot {
    archive: TreeArchive,
}

impl KeySnapshot {
    /// Archive a committed tree of the shadow repository
    pub fn capture(shadow: &ShadowRepository, commit: &TreeManifest) -> Result<Self> {
        let entries = commit
            .entries
            .par_iter()
            .map(|(path, entry)| -> Result<(String, NodeContent)> {
                Ok((path.clone(), shadow.read_node(entry)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            archive: TreeArchive { entries },
        })
    }

    /// Wrap an already built archive
    pub fn from_archive(archive: TreeArchive) -> Self {
        Self { archive }
    }

    /// The archived tree
    pub fn archive(&self) -> &TreeArchive {
        &self.archive
    }

    /// Replace the contents of `target` with the archived tree
    ///
    /// A top-level `.git` directory in the target is left alone.
    pub fn restore(&self, target: &Path) -> Result<RestoreStats> {
        let resolved = self
            .archive
            .entries
            .iter()
            .map(|(path, node)| -> Result<(PathBuf, &NodeContent)> {
                Ok((utils::safe_join(target, path)?, node))
            })
            .collect::<Result<Vec<_>>>()?;

        utils::clear_directory(target, &[VCS_DIR])?;

        let mut stats = RestoreStats::default();
        for (path, node) in resolved {
            node.write(&path)?;
            stats.files_written += 1;
            stats.bytes_written += node.size();
        }
        debug!("Restored key snapshot: {} files", stats.files_written);
        Ok(stats)
    }
}

/// Differential capture between two trees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSnapshot {
    patch: TreePatch,
}

enum Planned {
    Remove(PathBuf),
    Write(PathBuf, NodeContent),
}

/// Planned effect plus whether the base check had to be overridden
struct PlannedOp {
    step: Planned,
    conflict: bool,
}

impl PatchSnapshot {
    /// Diff two committed trees of the shadow repository
    pub fn capture_diff(
        shadow: &ShadowRepository,
        previous: &TreeManifest,
        current: &TreeManifest,
        base: PatchBase,
    ) -> Result<Self> {
        let mut ops: Vec<PatchOp> = previous
            .entries
            .iter()
            .filter(|(path, _)| !current.entries.contains_key(*path))
            .map(|(path, entry)| PatchOp::Remove {
                path: path.clone(),
                base_hash: entry.content_hash.clone(),
            })
            .collect();

        let changed: Vec<_> = current
            .entries
            .iter()
            .filter(|(path, entry)| previous.entries.get(*path) != Some(*entry))
            .collect();

        let upserts = changed
            .par_iter()
            .map(|(path, entry)| -> Result<PatchOp> {
                let node = shadow.read_node(entry)?;
                let Some(old_entry) = previous.entries.get(*path) else {
                    return Ok(PatchOp::Add {
                        path: (*path).clone(),
                        node,
                    });
                };
                let line_delta = match (&node, old_entry.kind) {
                    (NodeContent::File { data, executable }, EntryKind::File) => {
                        let old = shadow.read_node(old_entry)?;
                        let old_data = match &old {
                            NodeContent::File { data, .. } => data.as_slice(),
                            NodeContent::Symlink { .. } => &[][..],
                        };
                        delta::compute_line_delta(old_data, data)
                            .filter(|ops| delta::inserted_bytes(ops) < data.len())
                            .map(|ops| (ops, *executable))
                    }
                    _ => None,
                };
                let change = match line_delta {
                    Some((delta, executable)) => ContentChange::Lines { delta, executable },
                    None => ContentChange::Full(node),
                };
                Ok(PatchOp::Modify {
                    path: (*path).clone(),
                    base_hash: old_entry.content_hash.clone(),
                    change,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ops.extend(upserts);

        trace!("Captured patch with {} operations", ops.len());
        Ok(Self {
            patch: TreePatch { base, ops },
        })
    }

    /// Wrap an already built patch
    pub fn from_patch(patch: TreePatch) -> Self {
        Self { patch }
    }

    /// The recorded changes
    pub fn patch(&self) -> &TreePatch {
        &self.patch
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.patch.ops.is_empty()
    }

    /// Apply the patch to the files in `target`
    pub fn restore(&self, target: &Path) -> Result<RestoreStats> {
        self.restore_with(target, ApplyMode::Strict)
    }

    /// Apply the patch to the files in `target` under `mode`
    ///
    /// Every operation is planned before the first write, so an error leaves
    /// `target` untouched in either mode.
    pub fn restore_with(&self, target: &Path, mode: ApplyMode) -> Result<RestoreStats> {
        let mut planned = Vec::with_capacity(self.patch.ops.len());
        for op in &self.patch.ops {
            let path = utils::safe_join(target, op.path())?;
            planned.push(plan_op(op, NodeContent::read(&path)?, path, mode)?);
        }

        let mut stats = RestoreStats::default();
        for PlannedOp { step, conflict } in planned {
            stats.conflicts += usize::from(conflict);
            match step {
                Planned::Remove(path) => {
                    utils::remove_entry_if_exists(&path)?;
                    utils::prune_empty_parents(&path, target)?;
                    stats.files_removed += 1;
                }
                Planned::Write(path, node) => {
                    node.write(&path)?;
                    stats.files_written += 1;
                    stats.bytes_written += node.size();
                }
            }
        }
        debug!(
            "Applied patch: {} written, {} removed, {} conflicts",
            stats.files_written, stats.files_removed, stats.conflicts
        );
        Ok(stats)
    }

    /// Apply the patch to an in-memory tree, producing the new full tree
    pub fn apply_to_archive(&self, archive: &TreeArchive) -> Result<TreeArchive> {
        self.apply_to_archive_with(archive, ApplyMode::Strict)
            .map(|(archive, _)| archive)
    }

    /// Like [`apply_to_archive`](Self::apply_to_archive), also returning the
    /// number of conflicts `mode` let through
    pub fn apply_to_archive_with(
        &self,
        archive: &TreeArchive,
        mode: ApplyMode,
    ) -> Result<(TreeArchive, usize)> {
        let mut tree: BTreeMap<String, NodeContent> = archive.entries.iter().cloned().collect();
        let mut conflicts = 0;
        for op in &self.patch.ops {
            let current = tree.get(op.path()).cloned();
            let planned = plan_op(op, current, PathBuf::from(op.path()), mode)?;
            conflicts += usize::from(planned.conflict);
            match planned.step {
                Planned::Remove(_) => {
                    tree.remove(op.path());
                }
                Planned::Write(_, node) => {
                    tree.insert(op.path().to_string(), node);
                }
            }
        }
        let archive = TreeArchive {
            entries: tree.into_iter().collect(),
        };
        Ok((archive, conflicts))
    }
}

/// Check one operation against the current node and work out its effect
fn plan_op(
    op: &PatchOp,
    current: Option<NodeContent>,
    path: PathBuf,
    mode: ApplyMode,
) -> Result<PlannedOp> {
    let (step, conflict) = match op {
        PatchOp::Add { path: tree_path, node } => {
            let conflict = current.is_some();
            if conflict {
                forgive(tree_path, "path already exists", mode)?;
            }
            (Planned::Write(path, node.clone()), conflict)
        }
        PatchOp::Remove {
            path: tree_path,
            base_hash,
        } => {
            let conflict = check_base(tree_path, current.as_ref(), base_hash, mode)?;
            (Planned::Remove(path), conflict)
        }
        PatchOp::Modify {
            path: tree_path,
            base_hash,
            change,
        } => {
            let conflict = check_base(tree_path, current.as_ref(), base_hash, mode)?;
            let node = match change {
                ContentChange::Full(node) => node.clone(),
                ContentChange::Lines { delta, executable } => {
                    let old = match &current {
                        Some(NodeContent::File { data, .. }) => data.as_slice(),
                        None if conflict => &[][..],
                        _ => {
                            return Err(SrcsError::patch_apply(
                                tree_path,
                                "line delta against a non-file",
                            ))
                        }
                    };
                    let data = delta::apply_line_delta(old, delta)
                        .map_err(|reason| SrcsError::patch_apply(tree_path, reason))?;
                    NodeContent::File {
                        data,
                        executable: *executable,
                    }
                }
            };
            (Planned::Write(path, node), conflict)
        }
    };
    Ok(PlannedOp { step, conflict })
}

/// Returns whether the current node differs from the patch base
fn check_base(
    tree_path: &str,
    current: Option<&NodeContent>,
    base_hash: &str,
    mode: ApplyMode,
) -> Result<bool> {
    match current {
        None => forgive(tree_path, "path does not exist", mode).map(|_| true),
        Some(node) if node.content_hash() != base_hash => {
            forgive(tree_path, "content does not match patch base", mode).map(|_| true)
        }
        Some(_) => Ok(false),
    }
}

fn forgive(tree_path: &str, reason: &str, mode: ApplyMode) -> Result<()> {
    match mode {
        ApplyMode::Strict => Err(SrcsError::patch_apply(tree_path, reason)),
        ApplyMode::Force => {
            warn!("Forcing patch at {}: {}", tree_path, reason);
            Ok(())
        }
    }
}

/// A decoded snapshot of either kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// Full capture
    Key(KeySnapshot),
    /// Differential capture
    Patch(PatchSnapshot),
}

impl Snapshot {
    /// Segment type this snapshot is written as
    pub fn snapshot_type(&self) -> SnapshotType {
        match self {
            Snapshot::Key(_) => SnapshotType::Key,
            Snapshot::Patch(_) => SnapshotType::Patch,
        }
    }

    /// Serialize and compress into a segment body
    pub fn compress(&self, engine: &mut CompressionEngine) -> Result<Vec<u8>> {
        let config = bincode::config::standard();
        let encoded = match self {
            Snapshot::Key(key) => bincode::serde::encode_to_vec(&key.archive, config)?,
            Snapshot::Patch(patch) => bincode::serde::encode_to_vec(&patch.patch, config)?,
        };
        engine.compress(&encoded)
    }

    /// Decompress and deserialize a segment body
    pub fn decompress(snapshot_type: SnapshotType, body: &[u8]) -> Result<Self> {
        let config = bincode::config::standard();
        let raw = CompressionEngine::new(Default::default()).decompress(body)?;
        match snapshot_type {
            SnapshotType::Key => {
                let (archive, _) = bincode::serde::decode_from_slice(&raw, config)?;
                Ok(Snapshot::Key(KeySnapshot { archive }))
            }
            SnapshotType::Patch => {
                let (patch, _) = bincode::serde::decode_from_slice(&raw, config)?;
                Ok(Snapshot::Patch(PatchSnapshot { patch }))
            }
        }
    }
}
