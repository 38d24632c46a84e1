//! In-memory model of a recorded tree
//!
//! A tree is a sorted map from `/`-separated relative paths to
//! [`TreeEntry`] values. Only regular files and symlinks are tracked; a
//! directory exists implicitly while it contains something, which matches
//! what the git destination can represent.

use crate::error::{Result, SrcsError};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of version-control metadata directories, never part of a tree
pub const VCS_DIR: &str = ".git";

/// What a tree path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Symbolic link
    Symlink,
}

/// A tracked path in a committed tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// File or symlink
    pub kind: EntryKind,
    /// SHA-256 of the file content, or of the link target
    pub content_hash: String,
    /// Content size in bytes (target length for symlinks)
    pub size: u64,
    /// Whether any execute bit is set
    pub executable: bool,
}

/// A committed tree state in the shadow repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeManifest {
    /// Content id of the manifest
    pub id: String,
    /// Tracked entries by tree path
    pub entries: BTreeMap<String, TreeEntry>,
    /// Sum of entry sizes
    pub total_size: u64,
}

impl TreeManifest {
    /// Build a manifest and derive its id from the entries
    pub fn new(entries: BTreeMap<String, TreeEntry>) -> Result<Self> {
        let encoded = bincode::serde::encode_to_vec(&entries, bincode::config::standard())?;
        let total_size = entries.values().map(|e| e.size).sum();
        Ok(Self {
            id: utils::hash_data(&encoded),
            entries,
            total_size,
        })
    }

    /// Manifest of the empty tree
    pub fn empty() -> Result<Self> {
        Self::new(BTreeMap::new())
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Content of one entry as carried inside snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeContent {
    /// Regular file bytes
    File {
        /// Raw content
        data: Vec<u8>,
        /// Execute bit
        executable: bool,
    },
    /// Symlink target, `/`-separated
    Symlink {
        /// Link target as recorded
        target: String,
    },
}

impl NodeContent {
    /// Hash compatible with [`TreeEntry::content_hash`]
    pub fn content_hash(&self) -> String {
        match self {
            NodeContent::File { data, .. } => utils::hash_data(data),
            NodeContent::Symlink { target } => utils::hash_data(target.as_bytes()),
        }
    }

    /// Read the node at `path` from disk, if one exists
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        if meta.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            let target = target
                .to_str()
                .ok_or_else(|| SrcsError::PathConversion(target.clone()))?
                .replace('\\', "/");
            Ok(Some(NodeContent::Symlink { target }))
        } else if meta.is_file() {
            Ok(Some(NodeContent::File {
                data: fs::read(path)?,
                executable: utils::is_executable_mode(utils::file_mode(&meta)),
            }))
        } else {
            Ok(None)
        }
    }

    /// Write this node at `path`, replacing whatever is there
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        utils::remove_entry_if_exists(path)?;
        match self {
            NodeContent::File { data, executable } => {
                fs::write(path, data)?;
                utils::set_executable(path, *executable)?;
            }
            NodeContent::Symlink { target } => {
                utils::create_symlink(Path::new(target), path)?;
            }
        }
        Ok(())
    }

    /// Size as accounted in manifests
    pub fn size(&self) -> u64 {
        match self {
            NodeContent::File { data, .. } => data.len() as u64,
            NodeContent::Symlink { target } => target.len() as u64,
        }
    }
}

/// List every file and symlink under `root`, keyed by tree path
///
/// No ignore rules are applied, only `.git` directories are skipped. Used
/// for areas the crate owns (the shadow working copy, replay targets).
pub fn list_tree_files(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == VCS_DIR));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = utils::make_relative(entry.path(), root)?;
        files.insert(utils::to_tree_path(&relative)?, entry.path().to_path_buf());
    }
    Ok(files)
}

/// Read a whole directory into memory as tree path -> content
pub fn read_tree(root: &Path) -> Result<BTreeMap<String, NodeContent>> {
    let mut nodes = BTreeMap::new();
    for (tree_path, path) in list_tree_files(root)? {
        if let Some(node) = NodeContent::read(&path)? {
            nodes.insert(tree_path, node);
        }
    }
    Ok(nodes)
}
