//! Suppliers of the tree to record
//!
//! The recorder asks its provider, once per capture, to write the current
//! tree into an empty staging directory. The provider may also hint which
//! kind of snapshot it wants.
//!
//! Any `Fn(&Path) -> Result<SnapshotTypeHint> + Send` closure is a provider,
//! which is how tests script a sequence of tree states.

use crate::error::Result;
use crate::file_tracking::FileTracker;
use crate::tree::NodeContent;
use crate::types::SnapshotTypeHint;
use crate::utils;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Writes the current tree into a directory on request
pub trait SourceCodeProvider: Send {
    /// Save the current tree into the empty directory `dest`
    fn retrieve_and_save_to(&self, dest: &Path) -> Result<SnapshotTypeHint>;
}

impl<F> SourceCodeProvider for F
where
    F: Fn(&Path) -> Result<SnapshotTypeHint> + Send,
{
    fn retrieve_and_save_to(&self, dest: &Path) -> Result<SnapshotTypeHint> {
        self(dest)
    }
}

/// Copies a working directory as `git status` sees it
///
/// `.gitignore` rules are honoured and `.git` is skipped; untracked and
/// uncommitted files are included.
#[derive(Debug, Clone)]
pub struct CopyFromDirectorySourceCodeProvider {
    source_dir: PathBuf,
    ignore_patterns: Vec<String>,
}

impl CopyFromDirectorySourceCodeProvider {
    /// Provide the contents of `source_dir`
    pub fn new(source_dir: PathBuf) -> Self {
        Self {
            source_dir,
            ignore_patterns: Vec::new(),
        }
    }

    /// Exclude extra gitignore-style patterns
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Directory being copied
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }
}

impl SourceCodeProvider for CopyFromDirectorySourceCodeProvider {
    fn retrieve_and_save_to(&self, dest: &Path) -> Result<SnapshotTypeHint> {
        let files = FileTracker::new(self.source_dir.clone())
            .with_ignore_patterns(self.ignore_patterns.clone())
            .scan()?;

        files.par_iter().try_for_each(|file| -> Result<()> {
            if let Some(node) = NodeContent::read(&file.path)? {
                trace!("Copy {}", file.tree_path);
                node.write(&utils::safe_join(dest, &file.tree_path)?)?;
            }
            Ok(())
        })?;

        debug!("Copied {} files from {:?}", files.len(), self.source_dir);
        Ok(SnapshotTypeHint::Any)
    }
}
