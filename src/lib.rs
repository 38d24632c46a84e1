//! # srcs - Source code recordings
//!
//! Records how a source tree evolves over time into a compact, append-only
//! `.srcs` stream, and replays that stream into git history or into plain
//! directories.
//!
//! ## Overview
//!
//! A recording is a sequence of checksummed segments. Each segment holds
//! either a **key snapshot** (the complete tree) or a **patch snapshot**
//! (the changes since an earlier state). With it you can:
//! - Record a directory at a fixed interval, tagging interesting moments
//! - Convert a recording into a git repository, one commit per segment
//! - Export the tree as it was at any timestamp or tag
//! - Cut a recording down to a shorter, valid recording
//!
//! ## Architecture
//!
//! - **Container codec** ([`format`], [`container`]): the 14-byte header and
//!   the 38-byte segment framing with SHA-1 checksums
//! - **Snapshots** ([`snapshot`], [`delta`], [`tree`], [`compression`]):
//!   bincode archives and patches with line deltas, LZ4 compressed
//! - **Shadow repository** ([`shadow`], [`storage`]): a private mirror plus
//!   a content-addressed object store that every diff is computed against
//! - **Engine** ([`engine`]): decides key or patch for each capture
//! - **Scheduler** ([`recorder`], [`time`], [`provider`]): the recording
//!   loop, with tag and stop requests arriving over a channel
//! - **Replay** ([`replay`], [`convert`], [`git`], [`export`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use srcs::{CopyFromDirectorySourceCodeProvider, SourceCodeRecorderBuilder, ToGitConverter};
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = CopyFromDirectorySourceCodeProvider::new(PathBuf::from("./my_project"));
//! let mut recorder = SourceCodeRecorderBuilder::new(provider, "session.srcs")
//!     .snapshot_every(Duration::from_secs(2))
//!     .build()?;
//! recorder.start(Duration::from_secs(60))?;
//! recorder.close()?;
//!
//! let report = ToGitConverter::new("session.srcs", "./session-history").convert()?;
//! println!("{} commits, {} tags", report.commits, report.tags);
//! # Ok(())
//! # }
//! ```
//!
//! ## Exporting
//!
//! ```rust,no_run
//! use srcs::{export_tree_at, list_segments, Selector};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! for info in list_segments(Path::new("session.srcs")).iter()? {
//!     println!("{}", info?);
//! }
//! export_tree_at(
//!     Path::new("session.srcs"),
//!     &Selector::Tag("before-refactor".to_string()),
//!     Path::new("./restored"),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`SrcsError`]. Damaged input
//! surfaces as `InvalidFormat`, `CorruptSegment` or `PatchApplyError`;
//! [`SrcsError::is_corruption`] groups them.

pub mod compression;
pub mod container;
pub mod convert;
pub mod delta;
pub mod engine;
pub mod error;
pub mod export;
pub mod format;
pub mod git;
pub mod provider;
pub mod recorder;
pub mod replay;
pub mod shadow;
pub mod snapshot;
pub mod storage;
pub mod time;
pub mod tree;
pub mod types;

// Internal modules
mod file_tracking;
mod utils;

pub use compression::{CompressionEngine, CompressionStrategy};
pub use container::{ContainerFile, ContainerReader, ContainerWriter};
pub use convert::ToGitConverter;
pub use engine::{EncodedSnapshot, SnapshotEngine};
pub use error::{Result, SrcsError};
pub use export::{export_segments, export_tree_at, list_segments, SegmentListing};
pub use format::{Header, Segment, SegmentHeader, SnapshotType};
pub use provider::{CopyFromDirectorySourceCodeProvider, SourceCodeProvider};
pub use recorder::{RecorderHandle, SourceCodeRecorder, SourceCodeRecorderBuilder};
pub use replay::TreeReplayer;
pub use snapshot::{KeySnapshot, PatchSnapshot, Snapshot};
pub use time::{FakeTimeSource, RecorderRequest, SystemMonotonicTimeSource, TimeSource};
pub use types::*;
