//! Recording scheduler
//!
//! A [`SourceCodeRecorder`] owns everything that writes: the provider, the
//! snapshot engine, the container writer and the receiving end of the
//! request channel. Other threads talk to it through cloneable
//! [`RecorderHandle`]s, which can only enqueue requests, so there is exactly
//! one writer for the lifetime of the recording.
//!
//! ## Timeline
//!
//! `start` captures a snapshot at every point of a fixed grid
//! (`start + n * period`). Between grid points it waits on its
//! [`TimeSource`], which wakes up early for any queued request:
//!
//! - `Tag(name)` captures an extra segment carrying `name`, in request order
//! - `Stop` drains every tag still queued, appends one final untagged
//!   snapshot and ends the recording
//!
//! When the requested duration runs out the loop ends without a final
//! snapshot. Any capture failure ends the recording with that error, since a
//! missing segment would break every later patch.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use srcs::provider::CopyFromDirectorySourceCodeProvider;
//! use srcs::recorder::SourceCodeRecorderBuilder;
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! # fn main() -> srcs::Result<()> {
//! let provider = CopyFromDirectorySourceCodeProvider::new(PathBuf::from("./my-project"));
//! let mut recorder = SourceCodeRecorderBuilder::new(provider, "session.srcs")
//!     .snapshot_every(Duration::from_secs(1))
//!     .key_snapshot_spacing(10)
//!     .build()?;
//!
//! let handle = recorder.handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(5));
//!     handle.tag_current_state("before-refactor").ok();
//!     handle.stop().ok();
//! });
//!
//! recorder.start(Duration::MAX)?;
//! recorder.close()?;
//! # Ok(())
//! # }
//! ```

use crate::compression::CompressionStrategy;
use crate::container::ContainerWriter;
use crate::engine::SnapshotEngine;
use crate::error::{Result, SrcsError};
use crate::format::Segment;
use crate::provider::SourceCodeProvider;
use crate::time::{RecorderRequest, SystemMonotonicTimeSource, TimeSource};
use crate::types::{
    MetricsSnapshot, NoOpListener, PatchBase, RecorderConfig, RecorderState, RecordingListener,
    RecordingMetrics, SnapshotEvent,
};
use crate::utils;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Cloneable control surface of a recorder
#[derive(Clone)]
pub struct RecorderHandle {
    sender: Sender<RecorderRequest>,
    /// Set once no further request may be queued; held for reading while sending
    closed: Arc<RwLock<bool>>,
    state: Arc<RwLock<RecorderState>>,
    metrics: Arc<RecordingMetrics>,
}

impl RecorderHandle {
    /// Ask for a segment carrying `tag` as soon as possible
    ///
    /// Fails with [`SrcsError::RecorderClosed`] once a stop was requested or
    /// the recording ended; an accepted tag is always captured.
    pub fn tag_current_state(&self, tag: impl Into<String>) -> Result<()> {
        let closed = self.closed.read();
        if *closed || self.state() == RecorderState::Stopped {
            return Err(SrcsError::RecorderClosed);
        }
        self.send(RecorderRequest::Tag(tag.into()))
    }

    /// Ask the recording to finish
    ///
    /// Tags accepted before this call are captured first; later ones are
    /// refused. Repeated calls are no-ops.
    pub fn stop(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if self.state() == RecorderState::Stopped {
            return Err(SrcsError::RecorderClosed);
        }
        if *closed {
            return Ok(());
        }
        *closed = true;
        self.send(RecorderRequest::Stop)
    }

    /// Current lifecycle state
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// Counters so far
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn send(&self, request: RecorderRequest) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| SrcsError::RecorderClosed)
    }
}

impl std::fmt::Debug for RecorderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Time-driven recorder writing one `.srcs` container
pub struct SourceCodeRecorder {
    provider: Box<dyn SourceCodeProvider>,
    engine: Option<SnapshotEngine>,
    writer: Option<ContainerWriter>,
    output: PathBuf,
    staging: TempDir,
    time_source: Box<dyn TimeSource>,
    listener: Arc<dyn RecordingListener>,
    sender: Sender<RecorderRequest>,
    requests: Receiver<RecorderRequest>,
    closed: Arc<RwLock<bool>>,
    state: Arc<RwLock<RecorderState>>,
    metrics: Arc<RecordingMetrics>,
    period: Duration,
    start_nanos: u64,
}

impl SourceCodeRecorder {
    /// Handle for tagging and stopping from other threads
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            sender: self.sender.clone(),
            closed: Arc::clone(&self.closed),
            state: Arc::clone(&self.state),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// Counters so far
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Container being written
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Record for `duration`, or until stopped when it is `Duration::MAX`
    ///
    /// Blocks the calling thread for the whole recording.
    #[instrument(skip(self), fields(output = ?self.output))]
    pub fn start(&mut self, duration: Duration) -> Result<()> {
        if self.state() != RecorderState::Idle {
            return Err(SrcsError::InvalidState(format!(
                "recorder cannot start from {:?}",
                self.state()
            )));
        }
        if self.engine.is_none() {
            return Err(SrcsError::RecorderClosed);
        }

        let created_millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.writer = Some(ContainerWriter::create(&self.output, created_millis)?);
        self.start_nanos = self.time_source.current_time_nanos();
        self.set_state(RecorderState::Running);
        info!("Recording every {:?} into {:?}", self.period, self.output);

        let result = self.run(duration);
        *self.closed.write() = true;
        self.set_state(RecorderState::Stopped);
        let metrics = self.metrics.snapshot();
        self.listener.on_finished(&metrics);

        match &result {
            Ok(()) => info!(
                "Recording finished: {} segments, {}",
                metrics.total_snapshots,
                utils::format_bytes(metrics.bytes_written)
            ),
            Err(e) => warn!("Recording aborted: {}", e),
        }
        result
    }

    /// Flush the container and release the engine
    ///
    /// Safe to call any number of times; also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        self.engine.take();
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
            debug!("Closed container {:?}", self.output);
        }
        self.set_state(RecorderState::Stopped);
        Ok(())
    }

    fn run(&mut self, duration: Duration) -> Result<()> {
        let period_nanos = u64::try_from(self.period.as_nanos()).unwrap_or(u64::MAX).max(1);
        let limit_nanos = if duration == Duration::MAX {
            None
        } else {
            Some(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
        };

        loop {
            let elapsed = self.elapsed_nanos();
            if limit_nanos.is_some_and(|limit| elapsed >= limit) {
                break;
            }
            self.capture("")?;

            // Next grid point strictly after now; ticks missed during a slow capture are skipped
            let tick = self.elapsed_nanos() / period_nanos + 1;
            let deadline = self
                .start_nanos
                .saturating_add(tick.saturating_mul(period_nanos));

            while let Some(request) = self.time_source.wake_up_at(deadline, &self.requests) {
                match request {
                    RecorderRequest::Tag(tag) => self.capture(&tag)?,
                    RecorderRequest::Stop => return self.finish_stopping(),
                }
            }
        }

        // Once the gate is closed every accepted tag is already queued
        *self.closed.write() = true;
        self.set_state(RecorderState::Stopping);
        debug!("Duration elapsed, draining queued tags");
        self.drain_tags()
    }

    /// Requests are FIFO and the handle refuses tags once it queued the
    /// stop, so every accepted tag has been captured by now
    fn finish_stopping(&mut self) -> Result<()> {
        self.set_state(RecorderState::Stopping);
        debug!("Stop requested, taking the final snapshot");
        self.capture("")
    }

    /// Capture queued tags up to the first stop request
    fn drain_tags(&mut self) -> Result<()> {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                RecorderRequest::Tag(tag) => self.capture(&tag)?,
                RecorderRequest::Stop => break,
            }
        }
        Ok(())
    }

    fn capture(&mut self, tag: &str) -> Result<()> {
        let started = Instant::now();
        let staging = self.staging.path();
        utils::clear_directory(staging, &[])?;
        let hint = self.provider.retrieve_and_save_to(staging)?;

        let engine = self.engine.as_mut().ok_or(SrcsError::RecorderClosed)?;
        let index = engine.snapshot_count();
        let snapshot = engine.take_snapshot(hint)?;

        let timestamp_sec = self.elapsed_nanos() / NANOS_PER_SEC;
        let segment = Segment::new(snapshot.snapshot_type, timestamp_sec, tag, snapshot.body);
        let writer = self.writer.as_mut().ok_or(SrcsError::RecorderClosed)?;
        let segment_bytes = writer.append(&segment)?;

        let event = SnapshotEvent {
            index,
            snapshot_type: segment.segment_type,
            timestamp_sec,
            tag: segment.tag,
            segment_bytes,
            processing_time: started.elapsed(),
        };
        self.metrics.record(&event);
        info!(
            "Segment #{} {} at {}s: {} files, {}{}",
            event.index,
            event.snapshot_type,
            event.timestamp_sec,
            snapshot.file_count,
            utils::format_bytes(event.segment_bytes),
            if event.tag.is_empty() {
                String::new()
            } else {
                format!(", tag '{}'", event.tag)
            }
        );
        self.listener.on_snapshot(&event);
        Ok(())
    }

    fn elapsed_nanos(&self) -> u64 {
        self.time_source
            .current_time_nanos()
            .saturating_sub(self.start_nanos)
    }

    fn set_state(&self, state: RecorderState) {
        *self.state.write() = state;
    }
}

impl Drop for SourceCodeRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close recorder: {}", e);
        }
    }
}

impl std::fmt::Debug for SourceCodeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCodeRecorder")
            .field("output", &self.output)
            .field("period", &self.period)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`SourceCodeRecorder`]
///
/// # Default Values
///
/// - `snapshot_every`: 1 second
/// - `key_snapshot_spacing`: 5
/// - `key_cost_ratio`: 0.9
/// - `min_key_cost_bytes`: 4096
/// - `patch_base`: `PatchBase::Previous`
/// - `time_source`: [`SystemMonotonicTimeSource`]
/// - `recording_listener`: [`NoOpListener`]
pub struct SourceCodeRecorderBuilder {
    provider: Box<dyn SourceCodeProvider>,
    output: PathBuf,
    config: RecorderConfig,
    time_source: Option<Box<dyn TimeSource>>,
    listener: Arc<dyn RecordingListener>,
}

impl SourceCodeRecorderBuilder {
    /// Record what `provider` supplies into the container at `output`
    pub fn new(provider: impl SourceCodeProvider + 'static, output: impl Into<PathBuf>) -> Self {
        Self {
            provider: Box::new(provider),
            output: output.into(),
            config: RecorderConfig::default(),
            time_source: None,
            listener: Arc::new(NoOpListener),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    /// Tick period
    pub fn snapshot_every(mut self, period: Duration) -> Self {
        self.config.snapshot_every_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Force a key snapshot every `spacing` snapshots
    pub fn key_snapshot_spacing(mut self, spacing: u64) -> Self {
        self.config.engine.key_snapshot_spacing = spacing;
        self
    }

    /// Patch-to-key size ratio above which a key snapshot is written instead
    pub fn key_cost_ratio(mut self, ratio: f64) -> Self {
        self.config.engine.key_cost_ratio = ratio;
        self
    }

    /// Patches below this size are never replaced by key snapshots
    pub fn min_key_cost_bytes(mut self, bytes: u64) -> Self {
        self.config.engine.min_key_cost_bytes = bytes;
        self
    }

    /// State patches are computed against
    pub fn patch_base(mut self, base: PatchBase) -> Self {
        self.config.engine.patch_base = base;
        self
    }

    /// Compression of snapshot bodies
    pub fn compression(mut self, strategy: CompressionStrategy) -> Self {
        self.config.engine.compression = strategy;
        self
    }

    /// Extra gitignore-style exclusions applied when syncing the shadow
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.engine.ignore_patterns = patterns;
        self
    }

    /// Keep the shadow repository on disk after the recording
    pub fn keep_shadow(mut self, keep: bool) -> Self {
        self.config.engine.keep_shadow = keep;
        self
    }

    /// Worker threads for scanning
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.config.engine.parallel_workers = workers.max(1);
        self
    }

    /// Clock driving the tick grid
    pub fn time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = Some(Box::new(time_source));
        self
    }

    /// Listener notified after every segment
    pub fn recording_listener(mut self, listener: Arc<dyn RecordingListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Validate the configuration and set up the engine
    pub fn build(self) -> Result<SourceCodeRecorder> {
        self.config.validate()?;

        let staging = tempfile::Builder::new().prefix("srcs-staging-").tempdir()?;
        let engine = SnapshotEngine::new(staging.path().to_path_buf(), self.config.engine.clone())?;
        let (sender, requests) = unbounded();

        Ok(SourceCodeRecorder {
            provider: self.provider,
            engine: Some(engine),
            writer: None,
            output: self.output,
            staging,
            time_source: self
                .time_source
                .unwrap_or_else(|| Box::new(SystemMonotonicTimeSource::new())),
            listener: self.listener,
            sender,
            requests,
            closed: Arc::new(RwLock::new(false)),
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            metrics: Arc::new(RecordingMetrics::default()),
            period: self.config.snapshot_every(),
            start_nanos: 0,
        })
    }
}
