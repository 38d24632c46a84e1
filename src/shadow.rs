//! Private shadow repository used as the diffing substrate
//!
//! The shadow holds a mirror of the tracked directory (`work/`) and a
//! content-addressed [`ObjectStore`] of committed tree states. The engine
//! syncs the mirror, commits it, and diffs committed manifests against each
//! other; nothing outside the engine ever reads it.
//!
//! It lives in a temporary directory that is removed when the repository is
//! dropped, unless it was created with `keep_shadow` for inspection.

use crate::error::{Result, SrcsError};
use crate::file_tracking::FileTracker;
use crate::storage::{ObjectStore, PruneStats};
use crate::tree::{self, EntryKind, NodeContent, TreeEntry, TreeManifest};
use crate::types::{EngineConfig, SyncStats};
use crate::utils;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, trace};

/// Engine-private mirror plus object store
pub struct ShadowRepository {
    temp: Option<TempDir>,
    root: PathBuf,
    work_dir: PathBuf,
    store: ObjectStore,
    ignore_patterns: Vec<String>,
    parallel_workers: usize,
    keep: bool,
}

impl ShadowRepository {
    /// Create an empty shadow repository in a fresh temporary directory
    pub fn create(config: &EngineConfig) -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("srcs-shadow-").tempdir()?;
        let root = temp.path().to_path_buf();
        let work_dir = root.join("work");
        fs::create_dir_all(&work_dir)?;
        let store = ObjectStore::init(root.clone(), config.compression.clone())?;
        debug!("Created shadow repository at {:?}", root);

        Ok(Self {
            temp: Some(temp),
            root,
            work_dir,
            store,
            ignore_patterns: config.ignore_patterns.clone(),
            parallel_workers: config.parallel_workers.max(1),
            keep: config.keep_shadow,
        })
    }

    /// Root of the shadow repository
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Mirrored working area
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Mirror `source` into the working area
    ///
    /// Files are compared by content and only rewritten when they differ;
    /// paths that vanished from `source` are removed.
    pub fn sync_from(&self, source: &Path) -> Result<SyncStats> {
        let tracked = FileTracker::new(source.to_path_buf())
            .with_ignore_patterns(self.ignore_patterns.clone())
            .with_parallel_workers(self.parallel_workers)
            .scan()?;
        let mut stats = SyncStats::default();

        let wanted: HashSet<&str> = tracked.iter().map(|f| f.tree_path.as_str()).collect();
        for (tree_path, path) in tree::list_tree_files(&self.work_dir)? {
            if !wanted.contains(tree_path.as_str()) {
                trace!("Shadow remove {}", tree_path);
                utils::remove_entry_if_exists(&path)?;
                utils::prune_empty_parents(&path, &self.work_dir)?;
                stats.files_removed += 1;
            }
        }

        let copies: Vec<Option<u64>> = tracked
            .par_iter()
            .map(|file| -> Result<Option<u64>> {
                let dest = utils::safe_join(&self.work_dir, &file.tree_path)?;
                let Some(node) = NodeContent::read(&file.path)? else {
                    // Vanished between scan and copy
                    return Ok(None);
                };
                if NodeContent::read(&dest)?.as_ref() == Some(&node) {
                    return Ok(None);
                }
                trace!("Shadow copy {}", file.tree_path);
                node.write(&dest)?;
                Ok(Some(node.size()))
            })
            .collect::<Result<_>>()?;

        for copied in copies {
            match copied {
                Some(bytes) => {
                    stats.files_copied += 1;
                    stats.bytes_copied += bytes;
                }
                None => stats.files_unchanged += 1,
            }
        }

        debug!(
            "Synced {:?}: {} copied, {} unchanged, {} removed",
            source, stats.files_copied, stats.files_unchanged, stats.files_removed
        );
        Ok(stats)
    }

    /// Commit the working area and return its manifest
    pub fn commit(&self) -> Result<TreeManifest> {
        let files = tree::list_tree_files(&self.work_dir)?;
        let entries: Vec<(String, TreeEntry)> = files
            .par_iter()
            .map(|(tree_path, path)| -> Result<Option<(String, TreeEntry)>> {
                let Some(node) = NodeContent::read(path)? else {
                    return Ok(None);
                };
                let entry = match &node {
                    NodeContent::File { data, executable } => TreeEntry {
                        kind: EntryKind::File,
                        content_hash: self.store.store_object(data, path)?,
                        size: data.len() as u64,
                        executable: *executable,
                    },
                    NodeContent::Symlink { target } => TreeEntry {
                        kind: EntryKind::Symlink,
                        content_hash: self.store.store_object(target.as_bytes(), path)?,
                        size: target.len() as u64,
                        executable: false,
                    },
                };
                Ok(Some((tree_path.clone(), entry)))
            })
            .filter_map(|r| r.transpose())
            .collect::<Result<_>>()?;

        let manifest = TreeManifest::new(entries.into_iter().collect::<BTreeMap<_, _>>())?;
        self.store.store_manifest(&manifest)?;
        debug!(
            "Committed shadow tree {} ({} entries, {})",
            &manifest.id[..8],
            manifest.len(),
            utils::format_bytes(manifest.total_size)
        );
        Ok(manifest)
    }

    /// Load a committed manifest by id
    pub fn load_commit(&self, id: &str) -> Result<TreeManifest> {
        self.store.load_manifest(id)
    }

    /// Content of one committed entry
    pub fn read_node(&self, entry: &TreeEntry) -> Result<NodeContent> {
        let bytes = self.store.load_object(&entry.content_hash)?;
        match entry.kind {
            EntryKind::File => Ok(NodeContent::File {
                data: bytes,
                executable: entry.executable,
            }),
            EntryKind::Symlink => {
                let target = String::from_utf8(bytes)
                    .map_err(|e| SrcsError::internal(format!("symlink target: {}", e)))?;
                Ok(NodeContent::Symlink { target })
            }
        }
    }

    /// Drop every commit except `keep`, along with unreferenced objects
    pub fn retain(&self, keep: &[&str]) -> Result<PruneStats> {
        self.store.retain(keep)
    }

    /// Ids of the commits currently held
    pub fn commits(&self) -> Result<Vec<String>> {
        self.store.list_manifests()
    }
}

impl Drop for ShadowRepository {
    fn drop(&mut self) {
        if self.keep {
            if let Some(temp) = self.temp.take() {
                let path = temp.keep();
                info!("Shadow repository kept at {:?}", path);
            }
        }
    }
}

impl std::fmt::Debug for ShadowRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowRepository")
            .field("root", &self.root)
            .field("keep", &self.keep)
            .finish()
    }
}
