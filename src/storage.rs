//! Content-addressable object store backing the shadow repository
//!
//! File contents committed to the shadow repository are stored once per
//! distinct SHA-256, compressed, in a sharded directory layout:
//!
//! ```text
//! store_root/
//! ├── objects/
//! │   └── <prefix>/      # first 2 hex chars of the hash
//! │       └── <suffix>   # remaining 62 chars
//! └── commits/
//!     └── <id>.bin       # bincode TreeManifest
//! ```
//!
//! The store is private to one engine and short-lived, so there is no
//! reference counting on disk: unreachable objects are found by walking the
//! manifests that are still retained and dropping everything else.

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::error::{Result, SrcsError};
use crate::tree::TreeManifest;
use crate::utils;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// Sharded, compressed, content-addressed storage
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    compression: Mutex<CompressionEngine>,
}

/// Result of a pruning pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    /// Commit manifests removed
    pub commits_removed: usize,
    /// Objects removed
    pub objects_removed: usize,
}

impl ObjectStore {
    /// Create the store layout under `root`
    pub fn init(root: PathBuf, strategy: CompressionStrategy) -> Result<Self> {
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("commits"))?;
        Ok(Self {
            root,
            compression: Mutex::new(CompressionEngine::new(strategy)),
        })
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `content` read from `path`; returns its hash
    ///
    /// Identical content is written only once.
    pub fn store_object(&self, content: &[u8], path: &Path) -> Result<String> {
        let hash = utils::hash_data(content);
        let object_path = self.object_path(&hash);
        if object_path.exists() {
            trace!("Object {} already stored", &hash[..8]);
            return Ok(hash);
        }

        let compressed = self.compression.lock().compress_file(path, content)?;
        let object_dir = object_path.parent().unwrap_or(&self.root);
        fs::create_dir_all(object_dir)?;

        // Unique temp name: identical content may be stored from several workers at once
        let mut temp = NamedTempFile::new_in(object_dir)?;
        temp.write_all(&compressed)?;
        temp.persist(&object_path).map_err(|e| e.error)?;
        trace!("Stored object {} ({} bytes)", &hash[..8], compressed.len());
        Ok(hash)
    }

    /// Load and decompress an object
    pub fn load_object(&self, hash: &str) -> Result<Vec<u8>> {
        let object_path = self.object_path(hash);
        let compressed = match fs::read(&object_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SrcsError::ObjectNotFound(hash.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.compression.lock().decompress(&compressed)
    }

    /// Whether an object is present
    pub fn object_exists(&self, hash: &str) -> bool {
        self.object_path(hash).exists()
    }

    /// Persist a manifest under its id
    pub fn store_manifest(&self, manifest: &TreeManifest) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(manifest, bincode::config::standard())?;
        utils::atomic_write(&self.manifest_path(&manifest.id), &bytes)?;
        Ok(())
    }

    /// Load a manifest by id
    pub fn load_manifest(&self, id: &str) -> Result<TreeManifest> {
        let bytes = match fs::read(self.manifest_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SrcsError::CommitNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let (manifest, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(manifest)
    }

    /// Ids of every stored manifest
    pub fn list_manifests(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("commits"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".bin") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Hashes of every stored object
    pub fn list_all_objects(&self) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let objects_dir = self.root.join("objects");
        for shard_entry in fs::read_dir(objects_dir)? {
            let shard_entry = shard_entry?;
            if !shard_entry.path().is_dir() {
                continue;
            }
            let shard_name = shard_entry.file_name().to_string_lossy().to_string();
            for object_entry in fs::read_dir(shard_entry.path())? {
                let object_entry = object_entry?;
                if object_entry.path().is_file() {
                    let object_name = object_entry.file_name().to_string_lossy().to_string();
                    objects.push(format!("{}{}", shard_name, object_name));
                }
            }
        }
        Ok(objects)
    }

    /// Drop every manifest not in `keep` and every object they do not reference
    pub fn retain(&self, keep: &[&str]) -> Result<PruneStats> {
        let mut stats = PruneStats::default();
        let mut live = HashSet::new();

        for id in self.list_manifests()? {
            if keep.contains(&id.as_str()) {
                let manifest = self.load_manifest(&id)?;
                live.extend(manifest.entries.into_values().map(|e| e.content_hash));
            } else {
                fs::remove_file(self.manifest_path(&id))?;
                stats.commits_removed += 1;
            }
        }

        for hash in self.list_all_objects()? {
            if !live.contains(&hash) {
                let path = self.object_path(&hash);
                fs::remove_file(&path)?;
                utils::remove_dir_if_empty(path.parent().unwrap_or(&self.root))?;
                stats.objects_removed += 1;
            }
        }

        if stats.commits_removed > 0 || stats.objects_removed > 0 {
            debug!(
                "Pruned {} commits and {} objects",
                stats.commits_removed, stats.objects_removed
            );
        }
        Ok(stats)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let split = hash.len().min(2);
        let (prefix, suffix) = hash.split_at(split);
        self.root.join("objects").join(prefix).join(suffix)
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.root.join("commits").join(format!("{}.bin", id))
    }
}
