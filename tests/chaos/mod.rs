//! Chaos tests for srcs
//!
//! Damages recorded containers the ways real files get damaged (flipped
//! bits, truncation, garbage, wrong magic) and checks that every reader
//! reports it instead of replaying bad data.

use crate::integration::{read_frame, record_frames, FileGenerator, Frame, Recording};
use ::srcs::format::{HEADER_SIZE, SEGMENT_HEADER_SIZE};
use ::srcs::git::{is_git_available, GitRepository};
use ::srcs::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Byte range of every segment (header plus payload) in a container
pub fn segment_ranges(bytes: &[u8]) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset + SEGMENT_HEADER_SIZE <= bytes.len() {
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[offset + 10..offset + 18]);
        let end = offset + SEGMENT_HEADER_SIZE + u64::from_le_bytes(len) as usize;
        ranges.push(offset..end.min(bytes.len()));
        offset = end;
    }
    ranges
}

/// Applies one kind of damage to a container file
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip one random payload bit of segment `index`
    pub fn flip_payload_bit(&mut self, path: &Path, index: usize) -> anyhow::Result<()> {
        let mut bytes = fs::read(path)?;
        let range = segment_ranges(&bytes)[index].clone();
        let at = self.rng.random_range(range.start + SEGMENT_HEADER_SIZE..range.end);
        bytes[at] ^= 1 << self.rng.random_range(0..8);
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Cut the file in the middle of segment `index`
    pub fn truncate_inside(&mut self, path: &Path, index: usize) -> anyhow::Result<()> {
        let bytes = fs::read(path)?;
        let range = segment_ranges(&bytes)[index].clone();
        let cut = self.rng.random_range(range.start + 1..range.end);
        fs::write(path, &bytes[..cut])?;
        Ok(())
    }

    /// Overwrite the magic byte of segment `index`
    pub fn break_segment_magic(&mut self, path: &Path, index: usize) -> anyhow::Result<()> {
        let mut bytes = fs::read(path)?;
        let start = segment_ranges(&bytes)[index].start;
        bytes[start] = 0;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Append a segment whose checksum is right but whose body is garbage
    pub fn append_garbage_segment(&mut self, path: &Path) -> anyhow::Result<()> {
        let body: Vec<u8> = (0..256).map(|_| self.rng.random()).collect();
        let segment = Segment::new(SnapshotType::Patch, 999, "", body);
        let mut bytes = fs::read(path)?;
        bytes.extend_from_slice(&segment.encode()?);
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Six segments, KEY PATCH PATCH KEY PATCH PATCH, plus the recorded frames
fn six_segment_recording() -> anyhow::Result<(Recording, Vec<Frame>)> {
    let frames = FileGenerator::new(3).project_history(6, 5);
    let recording = record_frames(frames.clone(), |b| b.key_snapshot_spacing(3))?;
    Ok((recording, frames))
}

fn collect_errors(path: &Path) -> anyhow::Result<Vec<(usize, SrcsError)>> {
    Ok(ContainerReader::open(path)?
        .enumerate()
        .filter_map(|(i, item)| item.err().map(|e| (i, e)))
        .collect())
}

#[test]
fn test_flipped_bit_is_reported_and_reading_continues() -> anyhow::Result<()> {
    let (recording, _) = six_segment_recording()?;
    ChaosEngine::new(1).flip_payload_bit(&recording.path, 2)?;

    let items: Vec<_> = ContainerReader::open(&recording.path)?.collect();
    assert_eq!(items.len(), 6);
    assert!(matches!(
        items[2],
        Err(SrcsError::CorruptSegment { index: 2, .. })
    ));
    assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    Ok(())
}

#[test]
fn test_truncation_ends_reading() -> anyhow::Result<()> {
    let (recording, _) = six_segment_recording()?;
    ChaosEngine::new(2).truncate_inside(&recording.path, 4)?;

    let items: Vec<_> = ContainerReader::open(&recording.path)?.collect();
    assert_eq!(items.len(), 5);
    assert!(items[..4].iter().all(|i| i.is_ok()));
    match &items[4] {
        Err(e @ SrcsError::CorruptSegment { index: 4, .. }) => assert!(e.is_corruption()),
        other => panic!("expected corrupt segment, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_bad_segment_magic_is_invalid_format() -> anyhow::Result<()> {
    let (recording, _) = six_segment_recording()?;
    ChaosEngine::new(3).break_segment_magic(&recording.path, 1)?;

    let errors = collect_errors(&recording.path)?;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], (1, SrcsError::InvalidFormat(_))));
    Ok(())
}

#[test]
fn test_bad_header_rejected_everywhere() -> anyhow::Result<()> {
    let (recording, _) = six_segment_recording()?;
    let mut bytes = fs::read(&recording.path)?;
    bytes[0] = b'X';
    fs::write(&recording.path, bytes)?;

    assert!(matches!(
        ContainerReader::open(&recording.path),
        Err(SrcsError::InvalidFormat(_))
    ));
    assert!(list_segments(&recording.path).iter().is_err());
    let dest = recording.dir.path().join("never");
    assert!(export_tree_at(&recording.path, &Selector::Timestamp(0), &dest).is_err());
    assert!(!dest.exists());
    Ok(())
}

#[test]
fn test_garbage_body_with_valid_checksum_fails_replay() -> anyhow::Result<()> {
    let (recording, _) = six_segment_recording()?;
    ChaosEngine::new(4).append_garbage_segment(&recording.path)?;

    // The codec accepts it; only decoding notices
    let segments = recording.segments()?;
    assert_eq!(segments.len(), 7);
    let dest = recording.dir.path().join("out");
    let err = export_tree_at(&recording.path, &Selector::Timestamp(999), &dest).unwrap_err();
    assert!(err.is_corruption(), "{:?}", err);
    assert!(!dest.exists());
    Ok(())
}

#[test]
fn test_export_before_damage_still_works() -> anyhow::Result<()> {
    let (recording, frames) = six_segment_recording()?;
    ChaosEngine::new(5).flip_payload_bit(&recording.path, 5)?;

    let dest = recording.dir.path().join("ok");
    export_tree_at(&recording.path, &Selector::Timestamp(4), &dest)?;
    assert_eq!(read_frame(&dest)?, frames[4]);

    let listing: Vec<_> = list_segments(&recording.path).iter()?.collect();
    assert!(listing[5].is_err());

    let prefix = recording.dir.path().join("prefix.srcs");
    assert_eq!(export_segments(&recording.path, &Selector::Timestamp(4), &prefix)?, 5);
    assert!(ContainerReader::open(&prefix)?.read_all().is_ok());
    Ok(())
}

#[test]
fn test_strict_convert_stops_at_damage() -> anyhow::Result<()> {
    if !is_git_available() {
        return Ok(());
    }
    let (recording, _) = six_segment_recording()?;
    ChaosEngine::new(6).flip_payload_bit(&recording.path, 2)?;

    let repo_dir = recording.dir.path().join("strict");
    let result = ToGitConverter::new(&recording.path, &repo_dir).convert();
    assert!(matches!(result, Err(SrcsError::CorruptSegment { index: 2, .. })));
    let commits = GitRepository::open(&repo_dir).commits_oldest_first()?;
    assert_eq!(commits.len(), 2);
    Ok(())
}

#[test]
fn test_lenient_convert_skips_damage() -> anyhow::Result<()> {
    if !is_git_available() {
        return Ok(());
    }
    let (recording, frames) = six_segment_recording()?;
    // Segment 2 is a patch nothing depends on: segment 3 is a key
    ChaosEngine::new(7).flip_payload_bit(&recording.path, 2)?;

    let repo_dir = recording.dir.path().join("lenient");
    let skipped = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = skipped.clone();
    let report = ToGitConverter::new(&recording.path, &repo_dir)
        .stop_on_error(false)
        .with_progress(move |event| {
            if let ConvertProgress::Skipped { index, .. } = event {
                sink.lock().push(*index);
            }
        })
        .convert()?;

    assert_eq!(report.commits, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(*skipped.lock(), vec![2]);
    assert_eq!(read_frame(&repo_dir)?, frames[5]);
    Ok(())
}

#[test]
fn test_lenient_convert_resynchronises_after_skip() -> anyhow::Result<()> {
    if !is_git_available() {
        return Ok(());
    }
    let (recording, frames) = six_segment_recording()?;
    // Segment 2 patches the state segment 1 produced
    ChaosEngine::new(8).flip_payload_bit(&recording.path, 1)?;

    let repo_dir = recording.dir.path().join("cascade");
    let report = ToGitConverter::new(&recording.path, &repo_dir)
        .stop_on_error(false)
        .convert()?;
    for diagnostic in &report.diagnostics {
        warn!("{}", diagnostic);
    }

    // Later patches are forced until the key at segment 3 resynchronises
    // the tree, and any that still fail are folded into the one diagnostic
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    assert!(report.diagnostics[0].starts_with("segment #1:"));
    assert!(report.skipped >= 1);
    assert_eq!(report.commits + report.skipped, 6);
    assert_eq!(read_frame(&repo_dir)?, frames[5]);
    Ok(())
}
