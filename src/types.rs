//! Shared data types
//!
//! Configuration, recorder state and metrics, listener hooks, export
//! selectors and the report types returned by the batch operations.
//!
//! ## Examples
//!
//! ```rust
//! use srcs::types::{EngineConfig, PatchBase};
//!
//! let config = EngineConfig {
//!     key_snapshot_spacing: 10,
//!     patch_base: PatchBase::LastKey,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::compression::CompressionStrategy;
use crate::error::{Result, SrcsError};
use crate::format::SnapshotType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What a provider would like the next snapshot to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTypeHint {
    /// Let the engine decide
    #[default]
    Any,
    /// Force a key snapshot
    Key,
    /// Force a patch snapshot
    Patch,
}

/// State a patch snapshot is taken against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchBase {
    /// The immediately preceding recorded state
    #[default]
    Previous,
    /// The state of the most recent key snapshot
    LastKey,
}

/// Tuning of the snapshot engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Every n-th snapshot is forced to be a key snapshot
    pub key_snapshot_spacing: u64,
    /// A patch at least this fraction of the key size is not worth keeping
    pub key_cost_ratio: f64,
    /// Patches smaller than this are always kept
    pub min_key_cost_bytes: u64,
    /// Base state of patch snapshots
    pub patch_base: PatchBase,
    /// Compression for snapshot bodies and shadow objects
    pub compression: CompressionStrategy,
    /// Extra gitignore-style patterns excluded from the tracked directory
    pub ignore_patterns: Vec<String>,
    /// Leave the shadow repository on disk when the engine is dropped
    pub keep_shadow: bool,
    /// Worker threads for scanning and hashing
    pub parallel_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_snapshot_spacing: 5,
            key_cost_ratio: 0.9,
            min_key_cost_bytes: 4096,
            patch_base: PatchBase::Previous,
            compression: CompressionStrategy::Fast,
            ignore_patterns: Vec::new(),
            keep_shadow: false,
            parallel_workers: num_cpus::get(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.key_snapshot_spacing == 0 {
            return Err(SrcsError::InvalidConfiguration(
                "key snapshot spacing must be at least 1".to_string(),
            ));
        }
        if !self.key_cost_ratio.is_finite() || self.key_cost_ratio <= 0.0 {
            return Err(SrcsError::InvalidConfiguration(format!(
                "key cost ratio must be positive, got {}",
                self.key_cost_ratio
            )));
        }
        if self.parallel_workers == 0 {
            return Err(SrcsError::InvalidConfiguration(
                "parallel workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recorder configuration, as loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Tick period in milliseconds
    pub snapshot_every_ms: u64,
    /// Engine tuning
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_every_ms: 1000,
            engine: EngineConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// Tick period
    pub fn snapshot_every(&self) -> Duration {
        Duration::from_millis(self.snapshot_every_ms)
    }

    /// Reject values the recorder cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_every_ms == 0 {
            return Err(SrcsError::InvalidConfiguration(
                "snapshot period must be positive".to_string(),
            ));
        }
        self.engine.validate()
    }
}

/// Lifecycle of a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Built, not started
    Idle,
    /// Capturing on the tick grid
    Running,
    /// Stop received; draining queued tags
    Stopping,
    /// Finished; no more segments will be written
    Stopped,
}

/// Emitted to the listener after every appended segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEvent {
    /// Position of the segment in the container
    pub index: u64,
    /// Key or patch
    pub snapshot_type: SnapshotType,
    /// Seconds since the recording started
    pub timestamp_sec: u64,
    /// Tag, empty when untagged
    pub tag: String,
    /// Encoded segment size, header included
    pub segment_bytes: u64,
    /// Time spent capturing, deciding and writing
    pub processing_time: Duration,
}

/// Hook notified by the recorder
///
/// Runs on the recording thread, so implementations should return quickly.
///
/// # Examples
///
/// ```rust
/// use srcs::types::{RecordingListener, SnapshotEvent};
///
/// struct PrintListener;
///
/// impl RecordingListener for PrintListener {
///     fn on_snapshot(&self, event: &SnapshotEvent) {
///         println!("#{} {} at {}s", event.index, event.snapshot_type, event.timestamp_sec);
///     }
/// }
/// ```
pub trait RecordingListener: Send + Sync {
    /// Called after a segment has been appended
    fn on_snapshot(&self, event: &SnapshotEvent);

    /// Called once when the recording loop ends
    fn on_finished(&self, _metrics: &MetricsSnapshot) {}
}

/// Listener that ignores everything
#[derive(Debug, Default)]
pub struct NoOpListener;

impl RecordingListener for NoOpListener {
    fn on_snapshot(&self, _event: &SnapshotEvent) {}
}

/// Live counters shared between the recording thread and handles
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    total_snapshots: AtomicU64,
    key_snapshots: AtomicU64,
    patch_snapshots: AtomicU64,
    tagged_snapshots: AtomicU64,
    bytes_written: AtomicU64,
    last_processing_nanos: AtomicU64,
}

impl RecordingMetrics {
    /// Account for one appended segment
    pub fn record(&self, event: &SnapshotEvent) {
        self.total_snapshots.fetch_add(1, Ordering::Relaxed);
        match event.snapshot_type {
            SnapshotType::Key => self.key_snapshots.fetch_add(1, Ordering::Relaxed),
            SnapshotType::Patch => self.patch_snapshots.fetch_add(1, Ordering::Relaxed),
        };
        if !event.tag.is_empty() {
            self.tagged_snapshots.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_written
            .fetch_add(event.segment_bytes, Ordering::Relaxed);
        self.last_processing_nanos.store(
            u64::try_from(event.processing_time.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_snapshots: self.total_snapshots.load(Ordering::Relaxed),
            key_snapshots: self.key_snapshots.load(Ordering::Relaxed),
            patch_snapshots: self.patch_snapshots.load(Ordering::Relaxed),
            tagged_snapshots: self.tagged_snapshots.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            last_processing_nanos: self.last_processing_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`RecordingMetrics`] at one moment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Segments appended
    pub total_snapshots: u64,
    /// Key segments appended
    pub key_snapshots: u64,
    /// Patch segments appended
    pub patch_snapshots: u64,
    /// Segments carrying a tag
    pub tagged_snapshots: u64,
    /// Segment bytes written, container header excluded
    pub bytes_written: u64,
    /// Processing time of the latest segment
    pub last_processing_nanos: u64,
}

/// Picks one segment of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// First segment recorded at this many seconds after the start
    Timestamp(u64),
    /// First segment carrying this tag
    Tag(String),
}

impl Selector {
    /// Whether a segment with this timestamp and tag is selected
    pub fn matches(&self, timestamp_sec: u64, tag: &str) -> bool {
        match self {
            Selector::Timestamp(ts) => *ts == timestamp_sec,
            Selector::Tag(name) => name.trim() == tag,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Timestamp(ts) => write!(f, "timestamp {}s", ts),
            Selector::Tag(name) => write!(f, "tag '{}'", name),
        }
    }
}

/// One line of a segment listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Position in the container
    pub index: usize,
    /// Seconds since the recording started
    pub timestamp_sec: u64,
    /// Key or patch
    pub snapshot_type: SnapshotType,
    /// Snapshot body size in bytes
    pub size: u64,
    /// Tag, empty when untagged
    pub tag: String,
}

impl fmt::Display for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} | time {}s | type {} | size {}",
            self.index, self.timestamp_sec, self.snapshot_type, self.size
        )?;
        if !self.tag.is_empty() {
            write!(f, " | tag {}", self.tag)?;
        }
        Ok(())
    }
}

/// Progress events reported during a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertProgress {
    /// A segment was replayed and committed
    Committed {
        /// Segment position
        index: usize,
        /// Commit id in the destination
        commit: String,
    },
    /// A tag was created
    Tagged {
        /// Segment position
        index: usize,
        /// Tag name
        tag: String,
    },
    /// A tag name was seen again and not re-created
    DuplicateTag {
        /// Segment position
        index: usize,
        /// Tag name
        tag: String,
    },
    /// A segment failed and was skipped
    Skipped {
        /// Segment position
        index: usize,
        /// Why it failed
        reason: String,
    },
}

/// Outcome of a conversion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Commits created
    pub commits: usize,
    /// Tags created
    pub tags: usize,
    /// Segments skipped in lenient mode
    pub skipped: usize,
    /// Patch operations forced over a mismatched state after a skip
    pub conflicts: usize,
    /// Failure and duplicate-tag descriptions, in stream order
    ///
    /// Segments that fail only because an earlier one was skipped are
    /// folded into that earlier segment's entry.
    pub diagnostics: Vec<String>,
}

/// Work done while applying one snapshot to a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Files and links written
    pub files_written: usize,
    /// Files and links removed
    pub files_removed: usize,
    /// Content bytes written
    pub bytes_written: u64,
    /// Operations forced over a state other than their patch base
    pub conflicts: usize,
}

/// Work done while mirroring a tracked directory into the shadow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Files copied because they were new or changed
    pub files_copied: usize,
    /// Files left alone because they were unchanged
    pub files_unchanged: usize,
    /// Files removed because they disappeared from the source
    pub files_removed: usize,
    /// Bytes copied
    pub bytes_copied: u64,
}
