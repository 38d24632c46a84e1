//! Snapshot engine: syncs the tracked directory and picks key or patch
//!
//! Each call to [`SnapshotEngine::take_snapshot`] mirrors the tracked
//! directory into the shadow repository, commits it, and decides what to
//! emit:
//!
//! 1. the first snapshot is always a key snapshot
//! 2. a provider hint of `Key` or `Patch` is followed
//! 3. every `key_snapshot_spacing`-th snapshot is a key snapshot
//! 4. otherwise a patch is computed, and replaced by a key snapshot when it
//!    is both at least `min_key_cost_bytes` long and at least
//!    `key_cost_ratio` times the size of the equivalent key snapshot
//!
//! Only the commits a future patch can refer to are kept in the shadow;
//! everything older is pruned after each snapshot.

use crate::compression::CompressionEngine;
use crate::error::Result;
use crate::format::SnapshotType;
use crate::shadow::ShadowRepository;
use crate::snapshot::{KeySnapshot, PatchSnapshot, Snapshot};
use crate::tree::TreeManifest;
use crate::types::{EngineConfig, PatchBase, SnapshotTypeHint, SyncStats};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A snapshot ready to be framed into a segment
#[derive(Debug, Clone)]
pub struct EncodedSnapshot {
    /// Key or patch
    pub snapshot_type: SnapshotType,
    /// Compressed snapshot body
    pub body: Vec<u8>,
    /// Shadow commit the snapshot describes
    pub commit_id: String,
    /// Files in the committed tree
    pub file_count: usize,
}

/// Owns the shadow repository of one recording
#[derive(Debug)]
pub struct SnapshotEngine {
    tracked_dir: PathBuf,
    config: EngineConfig,
    shadow: ShadowRepository,
    compression: CompressionEngine,
    last_commit: Option<TreeManifest>,
    last_key_commit: Option<TreeManifest>,
    snapshot_count: u64,
}

impl SnapshotEngine {
    /// Create an engine tracking `tracked_dir`
    pub fn new(tracked_dir: PathBuf, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let shadow = ShadowRepository::create(&config)?;
        let compression = CompressionEngine::new(config.compression.clone());
        Ok(Self {
            tracked_dir,
            config,
            shadow,
            compression,
            last_commit: None,
            last_key_commit: None,
            snapshot_count: 0,
        })
    }

    /// Directory being tracked
    pub fn tracked_dir(&self) -> &Path {
        &self.tracked_dir
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Root of the shadow repository
    pub fn shadow_path(&self) -> &Path {
        self.shadow.path()
    }

    /// Snapshots taken so far
    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count
    }

    /// Mirror the tracked directory into the shadow working area
    pub fn sync_to_shadow(&self) -> Result<SyncStats> {
        self.shadow.sync_from(&self.tracked_dir)
    }

    /// Capture the tracked directory as the next snapshot
    #[instrument(skip(self), fields(index = self.snapshot_count))]
    pub fn take_snapshot(&mut self, hint: SnapshotTypeHint) -> Result<EncodedSnapshot> {
        self.sync_to_shadow()?;
        let current = self.shadow.commit()?;
        let index = self.snapshot_count;

        let (snapshot_type, body) = match self.patch_base_commit().cloned() {
            None => (SnapshotType::Key, self.encode_key(&current)?),
            Some(base) => {
                match hint {
                    SnapshotTypeHint::Key => (SnapshotType::Key, self.encode_key(&current)?),
                    SnapshotTypeHint::Patch => {
                        (SnapshotType::Patch, self.encode_patch(&base, &current)?)
                    }
                    SnapshotTypeHint::Any if index % self.config.key_snapshot_spacing == 0 => {
                        (SnapshotType::Key, self.encode_key(&current)?)
                    }
                    SnapshotTypeHint::Any => self.choose_by_cost(&base, &current)?,
                }
            }
        };

        debug!(
            "Snapshot #{} is {} ({} bytes, hint {:?})",
            index,
            snapshot_type,
            body.len(),
            hint
        );

        if snapshot_type == SnapshotType::Key {
            self.last_key_commit = Some(current.clone());
        }
        let encoded = EncodedSnapshot {
            snapshot_type,
            body,
            commit_id: current.id.clone(),
            file_count: current.len(),
        };
        self.last_commit = Some(current);
        self.snapshot_count += 1;
        self.prune()?;

        Ok(encoded)
    }

    fn patch_base_commit(&self) -> Option<&TreeManifest> {
        match self.config.patch_base {
            PatchBase::Previous => self.last_commit.as_ref(),
            PatchBase::LastKey => self.last_key_commit.as_ref(),
        }
    }

    fn choose_by_cost(
        &mut self,
        base: &TreeManifest,
        current: &TreeManifest,
    ) -> Result<(SnapshotType, Vec<u8>)> {
        let patch = self.encode_patch(base, current)?;
        if (patch.len() as u64) < self.config.min_key_cost_bytes {
            return Ok((SnapshotType::Patch, patch));
        }
        let key = self.encode_key(current)?;
        let threshold = self.config.key_cost_ratio * key.len() as f64;
        debug!(
            "Patch {} bytes vs key {} bytes (threshold {:.0})",
            patch.len(),
            key.len(),
            threshold
        );
        if patch.len() as f64 >= threshold {
            Ok((SnapshotType::Key, key))
        } else {
            Ok((SnapshotType::Patch, patch))
        }
    }

    fn encode_key(&mut self, commit: &TreeManifest) -> Result<Vec<u8>> {
        let key = KeySnapshot::capture(&self.shadow, commit)?;
        Snapshot::Key(key).compress(&mut self.compression)
    }

    fn encode_patch(&mut self, base: &TreeManifest, current: &TreeManifest) -> Result<Vec<u8>> {
        let patch =
            PatchSnapshot::capture_diff(&self.shadow, base, current, self.config.patch_base)?;
        Snapshot::Patch(patch).compress(&mut self.compression)
    }

    fn prune(&self) -> Result<()> {
        let keep: Vec<&str> = [self.last_commit.as_ref(), self.last_key_commit.as_ref()]
            .into_iter()
            .flatten()
            .map(|m| m.id.as_str())
            .collect();
        self.shadow.retain(&keep)?;
        Ok(())
    }
}
