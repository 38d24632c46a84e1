//! Converting a recording into git history
//!
//! Every segment becomes one commit in a fresh repository, dated at the
//! moment it was recorded. Tagged segments also get a lightweight git tag.
//!
//! ## Error Modes
//!
//! By default the first damaged segment aborts the conversion; everything
//! committed before it stays in the destination. With
//! [`ToGitConverter::stop_on_error`] set to `false`, damaged segments are
//! reported through the progress callback, listed in the report and
//! skipped. Failures of git itself or of the filesystem always abort.
//!
//! A skipped segment leaves the working tree short of the state later
//! patches were computed from. Replay continues out of sync, forcing those
//! patches over what is there, until the next key segment. A later segment
//! that still cannot be applied in that window is counted as skipped but
//! reported under the diagnostic of the segment that caused it.

use crate::container::ContainerReader;
use crate::error::{Result, SrcsError};
use crate::format::Segment;
use crate::git::GitRepository;
use crate::replay::TreeReplayer;
use crate::types::{ConversionReport, ConvertProgress};
use crate::utils;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

type ProgressCallback = Box<dyn Fn(&ConvertProgress) + Send + Sync>;

/// One-shot converter from a `.srcs` container to a git repository
pub struct ToGitConverter {
    input: PathBuf,
    output: PathBuf,
    stop_on_error: bool,
    progress: Option<ProgressCallback>,
}

impl ToGitConverter {
    /// Convert `input` into a new repository at `output`
    ///
    /// `output` must be missing or empty.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            stop_on_error: true,
            progress: None,
        }
    }

    /// Abort on the first damaged segment (default) or skip it
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Receive an event per commit, tag and skipped segment
    pub fn with_progress(mut self, callback: impl Fn(&ConvertProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Run the conversion
    #[instrument(skip(self), fields(input = ?self.input, output = ?self.output))]
    pub fn convert(&self) -> Result<ConversionReport> {
        let reader = ContainerReader::open(&self.input)?;
        let base_secs = reader.header().timestamp_secs();

        utils::ensure_empty_dir(&self.output)?;
        let repo = GitRepository::init(&self.output)?;
        let mut replayer = TreeReplayer::new(&self.output);
        let mut seen_tags = HashSet::new();
        let mut report = ConversionReport::default();

        // Diagnostic entry of the skip the replay has not recovered from
        let mut open_skip: Option<usize> = None;

        for (index, item) in reader.enumerate() {
            let segment = match item {
                Ok(segment) => segment,
                Err(e) => {
                    self.skip_or_abort(index, e, &mut open_skip, &mut report)?;
                    replayer.mark_out_of_sync();
                    continue;
                }
            };
            match replayer.apply_segment(&segment) {
                Ok(stats) => report.conflicts += stats.conflicts,
                Err(e) => {
                    self.skip_or_abort(index, e, &mut open_skip, &mut report)?;
                    replayer.mark_out_of_sync();
                    continue;
                }
            }
            if !replayer.is_out_of_sync() {
                open_skip = None;
            }

            let commit = repo.commit_all(
                &commit_message(index, &segment),
                base_secs.saturating_add(segment.timestamp_sec),
            )?;
            report.commits += 1;
            debug!("Segment #{} committed as {}", index, commit);
            self.emit(ConvertProgress::Committed {
                index,
                commit: commit.clone(),
            });

            if segment.has_tag() {
                if seen_tags.insert(segment.tag.clone()) {
                    repo.tag(&segment.tag, &commit)?;
                    report.tags += 1;
                    self.emit(ConvertProgress::Tagged {
                        index,
                        tag: segment.tag.clone(),
                    });
                } else {
                    warn!("Segment #{} repeats tag '{}', keeping the first", index, segment.tag);
                    report
                        .diagnostics
                        .push(format!("segment #{}: duplicate tag '{}'", index, segment.tag));
                    self.emit(ConvertProgress::DuplicateTag {
                        index,
                        tag: segment.tag.clone(),
                    });
                }
            }
        }

        info!(
            "Converted {:?}: {} commits, {} tags, {} skipped, {} conflicts",
            self.input, report.commits, report.tags, report.skipped, report.conflicts
        );
        Ok(report)
    }

    /// Source container
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Destination repository
    pub fn output(&self) -> &Path {
        &self.output
    }

    fn skip_or_abort(
        &self,
        index: usize,
        error: SrcsError,
        open_skip: &mut Option<usize>,
        report: &mut ConversionReport,
    ) -> Result<()> {
        if self.stop_on_error || !error.is_corruption() {
            return Err(error);
        }
        report.skipped += 1;
        match open_skip.and_then(|at| report.diagnostics.get_mut(at)) {
            Some(diagnostic) => {
                warn!("Skipping segment #{} after an earlier skip: {}", index, error);
                diagnostic.push_str(&format!("; segment #{} skipped as a consequence", index));
            }
            None => {
                warn!("Skipping segment #{}: {}", index, error);
                report
                    .diagnostics
                    .push(format!("segment #{}: {}", index, error));
                *open_skip = Some(report.diagnostics.len() - 1);
            }
        }
        self.emit(ConvertProgress::Skipped {
            index,
            reason: error.to_string(),
        });
        Ok(())
    }

    fn emit(&self, event: ConvertProgress) {
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }
}

impl std::fmt::Debug for ToGitConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToGitConverter")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("stop_on_error", &self.stop_on_error)
            .finish()
    }
}

fn commit_message(index: usize, segment: &Segment) -> String {
    let mut message = format!(
        "Snapshot #{} ({}) at +{}s",
        index, segment.segment_type, segment.timestamp_sec
    );
    if segment.has_tag() {
        message.push_str(&format!("\n\nTag: {}", segment.tag));
    }
    message
}
