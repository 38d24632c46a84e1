//! Ignore-aware scanning of tracked directories
//!
//! [`FileTracker`] walks a directory the way `git status` would see it:
//! `.gitignore` files at every level are honoured (including ones in parent
//! directories), extra patterns can be layered on top, and `.git` metadata
//! is never visited. Untracked and uncommitted files are included; there is
//! no index involved, only what is on disk right now.
//!
//! The walk runs on the `ignore` crate's parallel walker. Results are sorted
//! by tree path so every consumer sees a deterministic order.

use crate::error::Result;
use crate::tree::{EntryKind, VCS_DIR};
use crate::utils;
use ignore::{overrides::OverrideBuilder, WalkBuilder, WalkState};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A file or symlink found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// `/`-separated path relative to the scan root
    pub tree_path: String,
    /// Absolute path on disk
    pub path: PathBuf,
    /// File or symlink
    pub kind: EntryKind,
    /// Size on disk
    pub size: u64,
}

/// Scanner for a tracked directory
#[derive(Debug, Clone)]
pub struct FileTracker {
    root_path: PathBuf,
    ignore_patterns: Vec<String>,
    parallel_workers: usize,
}

impl FileTracker {
    /// Create a tracker for `root_path`
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            ignore_patterns: Vec::new(),
            parallel_workers: num_cpus::get(),
        }
    }

    /// Add gitignore-style patterns applied on top of `.gitignore` files
    ///
    /// A pattern prefixed with `!` re-includes paths instead.
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Set the walker thread count
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Root being scanned
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Scan the tree, returning every tracked file sorted by tree path
    pub fn scan(&self) -> Result<Vec<TrackedFile>> {
        let mut walker_builder = WalkBuilder::new(&self.root_path);
        walker_builder
            .follow_links(false)
            .hidden(false)
            .parents(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.parallel_workers)
            .filter_entry(|entry| entry.file_name() != VCS_DIR);

        if !self.ignore_patterns.is_empty() {
            let mut override_builder = OverrideBuilder::new(&self.root_path);
            for pattern in &self.ignore_patterns {
                // Overrides are whitelists, so an ignore pattern needs the `!` prefix
                let final_pattern = match pattern.strip_prefix('!') {
                    Some(include) => include.to_string(),
                    None => format!("!{}", pattern),
                };
                if let Err(e) = override_builder.add(&final_pattern) {
                    warn!("Invalid ignore pattern '{}': {}", pattern, e);
                }
            }
            match override_builder.build() {
                Ok(overrides) => {
                    walker_builder.overrides(overrides);
                }
                Err(e) => warn!("Ignoring custom patterns: {}", e),
            }
        }

        let found = Arc::new(Mutex::new(Vec::<(PathBuf, EntryKind, u64)>::new()));
        walker_builder.build_parallel().run(|| {
            let found = Arc::clone(&found);
            Box::new(move |entry_result| {
                match entry_result {
                    Ok(entry) => {
                        let kind = match entry.file_type() {
                            Some(ft) if ft.is_symlink() => EntryKind::Symlink,
                            Some(ft) if ft.is_file() => EntryKind::File,
                            _ => return WalkState::Continue,
                        };
                        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                        found.lock().push((entry.path().to_path_buf(), kind, size));
                    }
                    Err(e) => {
                        warn!("Walk error: {}", e);
                    }
                }
                WalkState::Continue
            })
        });

        let mut files = Vec::new();
        for (path, kind, size) in found.lock().drain(..) {
            let relative = utils::make_relative(&path, &self.root_path)?;
            let tree_path = utils::to_tree_path(&relative)?;
            trace!("Tracked {}", tree_path);
            files.push(TrackedFile {
                tree_path,
                path,
                kind,
                size,
            });
        }
        files.sort_by(|a, b| a.tree_path.cmp(&b.tree_path));

        debug!("Scanned {:?}: {} files", self.root_path, files.len());
        Ok(files)
    }
}
