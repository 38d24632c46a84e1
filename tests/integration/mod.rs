//! Integration tests for srcs
//!
//! Records scripted project histories with a fake clock, then checks the
//! container, the converted git history and the exported trees against
//! the states that were recorded.

use ::srcs::git::{is_git_available, GitRepository};
use ::srcs::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

/// One tree state: path to content
pub type Frame = BTreeMap<String, Vec<u8>>;

/// Write `frame` into the empty directory `dir`
pub fn write_frame(dir: &Path, frame: &Frame) -> std::io::Result<()> {
    for (path, content) in frame {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)?;
    }
    Ok(())
}

/// Read a directory back into a frame, skipping `.git`
pub fn read_frame(dir: &Path) -> anyhow::Result<Frame> {
    let mut frame = Frame::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(dir)?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            frame.insert(key, fs::read(entry.path())?);
        }
    }
    Ok(frame)
}

/// Provider that hands out `frames` one per capture, repeating the last
pub fn scripted_provider(frames: Vec<Frame>) -> impl SourceCodeProvider + 'static {
    let next = AtomicUsize::new(0);
    move |dir: &Path| -> Result<SnapshotTypeHint> {
        let index = next.fetch_add(1, Ordering::SeqCst).min(frames.len() - 1);
        write_frame(dir, &frames[index])?;
        Ok(SnapshotTypeHint::Any)
    }
}

/// Deterministic content generator
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Source-like text with `lines` lines
    pub fn text(&mut self, lines: usize) -> Vec<u8> {
        const WORDS: &[&str] = &["let", "fn", "value", "return", "match", "self", "Ok", "None", "=>", "{", "}"];
        let mut out = String::new();
        for _ in 0..lines {
            let words = self.rng.random_range(1..8);
            let line: Vec<&str> = (0..words)
                .map(|_| WORDS[self.rng.random_range(0..WORDS.len())])
                .collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Incompressible bytes
    pub fn binary(&mut self, size: usize) -> Vec<u8> {
        (0..size).map(|_| self.rng.random()).collect()
    }

    /// A history of `count` frames with edits, additions and deletions
    pub fn project_history(&mut self, count: usize, initial_files: usize) -> Vec<Frame> {
        let mut current = Frame::new();
        for i in 0..initial_files {
            let lines = self.rng.random_range(5..60);
            current.insert(format!("src/module_{}/file_{}.rs", i % 4, i), self.text(lines));
        }

        let mut frames = vec![current.clone()];
        for step in 1..count {
            let paths: Vec<String> = current.keys().cloned().collect();
            match self.rng.random_range(0..4) {
                // Delete a file
                0 if paths.len() > 2 => {
                    let victim = &paths[self.rng.random_range(0..paths.len())];
                    current.remove(victim);
                }
                // Add a file, sometimes nested deeper
                1 => {
                    let lines = self.rng.random_range(1..30);
                    current.insert(format!("added/{}/new_{}.txt", step % 3, step), self.text(lines));
                }
                // Append lines to a file
                _ => {
                    let target = paths[self.rng.random_range(0..paths.len())].clone();
                    let extra = self.text(3);
                    if let Some(content) = current.get_mut(&target) {
                        content.extend_from_slice(&extra);
                    }
                }
            }
            frames.push(current.clone());
        }
        frames
    }
}

/// A finished recording on disk
pub struct Recording {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl Recording {
    pub fn segments(&self) -> anyhow::Result<Vec<Segment>> {
        Ok(ContainerReader::open(&self.path)?.read_all()?)
    }
}

/// Record `frames` at one frame per second on a fake clock
pub fn record_frames(
    frames: Vec<Frame>,
    configure: impl FnOnce(SourceCodeRecorderBuilder) -> SourceCodeRecorderBuilder,
) -> anyhow::Result<Recording> {
    let dir = TempDir::new()?;
    let path = dir.path().join("recording.srcs");
    let count = frames.len() as u64;

    let builder = SourceCodeRecorderBuilder::new(scripted_provider(frames), &path)
        .snapshot_every(Duration::from_secs(1))
        .time_source(FakeTimeSource::new());
    let mut recorder = configure(builder).build()?;
    recorder.start(Duration::from_secs(count))?;
    recorder.close()?;

    info!("Recorded {} frames into {:?}", count, path);
    Ok(Recording { dir, path })
}

#[test]
fn test_spacing_produces_key_patch_pattern() -> anyhow::Result<()> {
    let frames: Vec<Frame> = (0..6)
        .map(|i| Frame::from([("counter.txt".to_string(), format!("{}\n", i).into_bytes())]))
        .collect();
    let recording = record_frames(frames, |b| b.key_snapshot_spacing(3))?;

    let segments = recording.segments()?;
    let types: Vec<_> = segments.iter().map(|s| s.segment_type).collect();
    use SnapshotType::*;
    assert_eq!(types, vec![Key, Patch, Patch, Key, Patch, Patch]);
    let timestamps: Vec<_> = segments.iter().map(|s| s.timestamp_sec).collect();
    assert_eq!(timestamps, vec![0, 1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_tag_then_stop_round_trips_to_git() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tagged.srcs");
    let frame = Frame::from([("README.md".to_string(), b"# demo\n".to_vec())]);
    let mut recorder = SourceCodeRecorderBuilder::new(scripted_provider(vec![frame]), &path)
        .time_source(FakeTimeSource::new())
        .build()?;

    let handle = recorder.handle();
    handle.tag_current_state("testTag")?;
    handle.stop()?;
    recorder.start(Duration::MAX)?;
    recorder.close()?;

    let segments = ContainerReader::open(&path)?.read_all()?;
    let tags: Vec<_> = segments.iter().map(|s| s.tag.as_str()).collect();
    assert_eq!(tags, vec!["", "testTag", ""]);

    if !is_git_available() {
        return Ok(());
    }
    let repo_dir = dir.path().join("repo");
    let report = ToGitConverter::new(&path, &repo_dir).convert()?;
    assert_eq!(report.commits, 3);
    assert_eq!(report.tags, 1);

    let repo = GitRepository::open(&repo_dir);
    assert_eq!(repo.tags()?, vec!["testTag".to_string()]);
    assert_eq!(repo.resolve("testTag")?, repo.commits_oldest_first()?[1]);
    Ok(())
}

#[test]
fn test_tag_burst_before_stop_keeps_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("burst.srcs");
    let frame = Frame::from([("a".to_string(), b"a".to_vec())]);
    let mut recorder = SourceCodeRecorderBuilder::new(scripted_provider(vec![frame]), &path)
        .time_source(FakeTimeSource::new())
        .build()?;

    let handle = recorder.handle();
    let names: Vec<String> = (0..25).map(|i| format!("burst-{}", i)).collect();
    let senders: Vec<_> = names
        .chunks(5)
        .map(|chunk| {
            let handle = handle.clone();
            let chunk = chunk.to_vec();
            std::thread::spawn(move || {
                for name in chunk {
                    handle.tag_current_state(name).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }
    handle.stop()?;
    recorder.start(Duration::MAX)?;
    recorder.close()?;

    let segments = ContainerReader::open(&path)?.read_all()?;
    assert_eq!(segments.len(), names.len() + 2);
    assert!(!segments[0].has_tag());
    assert!(!segments[segments.len() - 1].has_tag());

    let mut recorded: Vec<String> = segments[1..=names.len()]
        .iter()
        .map(|s| s.tag.clone())
        .collect();
    // Each sender's tags stay in order; across senders any interleaving is fine
    for chunk in names.chunks(5) {
        let positions: Vec<usize> = chunk
            .iter()
            .map(|n| recorded.iter().position(|r| r == n).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
    recorded.sort();
    let mut expected = names.clone();
    expected.sort();
    assert_eq!(recorded, expected);
    assert_eq!(handle.metrics().tagged_snapshots, names.len() as u64);
    Ok(())
}

#[test]
fn test_export_matches_every_recorded_state() -> anyhow::Result<()> {
    let mut generator = FileGenerator::new(42);
    let frames = generator.project_history(12, 10);

    for base in [PatchBase::Previous, PatchBase::LastKey] {
        let recording = record_frames(frames.clone(), |b| b.key_snapshot_spacing(4).patch_base(base))?;
        for (ts, expected) in frames.iter().enumerate() {
            let dest = recording.dir.path().join(format!("export-{:?}-{}", base, ts));
            export_tree_at(&recording.path, &Selector::Timestamp(ts as u64), &dest)?;
            assert_eq!(&read_frame(&dest)?, expected, "state {} with base {:?}", ts, base);
        }
    }
    Ok(())
}

#[test]
fn test_convert_matches_export_at_every_commit() -> anyhow::Result<()> {
    if !is_git_available() {
        return Ok(());
    }
    let mut generator = FileGenerator::new(7);
    let frames = generator.project_history(8, 6);
    let recording = record_frames(frames.clone(), |b| b.key_snapshot_spacing(3))?;

    let repo_dir = recording.dir.path().join("repo");
    let report = ToGitConverter::new(&recording.path, &repo_dir).convert()?;
    assert_eq!(report.commits, frames.len());
    assert!(report.diagnostics.is_empty());

    let repo = GitRepository::open(&repo_dir);
    let commits = repo.commits_oldest_first()?;
    let created = ContainerReader::open(&recording.path)?.header().timestamp_secs();
    for (index, commit) in commits.iter().enumerate() {
        repo.checkout(commit)?;
        let exported = recording.dir.path().join(format!("export-{}", index));
        export_tree_at(&recording.path, &Selector::Timestamp(index as u64), &exported)?;

        assert_eq!(read_frame(&repo_dir)?, read_frame(&exported)?);
        assert_eq!(read_frame(&exported)?, frames[index]);
        assert_eq!(repo.commit_time(commit)?, created + index as u64);
    }
    Ok(())
}

#[test]
fn test_static_tree_compresses_with_patches() -> anyhow::Result<()> {
    let mut generator = FileGenerator::new(99);
    let mut frame = Frame::new();
    for i in 0..40 {
        frame.insert(format!("assets/blob_{}.bin", i), generator.binary(8 * 1024));
    }
    let frames = vec![frame; 10];

    let all_keys = record_frames(frames.clone(), |b| b.key_snapshot_spacing(1))?;
    let spaced = record_frames(frames, |b| b.key_snapshot_spacing(5))?;

    let all_keys_size = fs::metadata(&all_keys.path)?.len();
    let spaced_size = fs::metadata(&spaced.path)?.len();
    info!("K=1: {} bytes, K=5: {} bytes", all_keys_size, spaced_size);
    assert!(
        all_keys_size >= 4 * spaced_size,
        "{} vs {}",
        all_keys_size,
        spaced_size
    );
    Ok(())
}

#[test]
fn test_directory_provider_tracks_deletions_and_gitignore() -> anyhow::Result<()> {
    let source = TempDir::new()?;
    let root = source.path().to_path_buf();
    fs::write(root.join(".gitignore"), "*.log\n")?;
    fs::write(root.join("keep.txt"), "keep\n")?;
    fs::write(root.join("debug.log"), "noise\n")?;
    fs::create_dir_all(root.join("nested"))?;
    fs::write(root.join("nested/gone.txt"), "soon gone\n")?;

    let copier = CopyFromDirectorySourceCodeProvider::new(root.clone());
    let calls = AtomicUsize::new(0);
    let provider = move |dest: &Path| -> Result<SnapshotTypeHint> {
        // Second capture sees the file deleted and the nested dir replaced by a file
        if calls.fetch_add(1, Ordering::SeqCst) == 1 {
            fs::remove_dir_all(root.join("nested"))?;
            fs::write(root.join("nested"), "now a file\n")?;
        }
        copier.retrieve_and_save_to(dest)
    };

    let out = TempDir::new()?;
    let path = out.path().join("dir.srcs");
    let mut recorder = SourceCodeRecorderBuilder::new(provider, &path)
        .time_source(FakeTimeSource::new())
        .build()?;
    recorder.start(Duration::from_secs(2))?;
    recorder.close()?;

    let first = out.path().join("first");
    export_tree_at(&path, &Selector::Timestamp(0), &first)?;
    assert_eq!(
        read_frame(&first)?.keys().cloned().collect::<Vec<_>>(),
        vec![".gitignore", "keep.txt", "nested/gone.txt"]
    );

    let second = out.path().join("second");
    export_tree_at(&path, &Selector::Timestamp(1), &second)?;
    let frame = read_frame(&second)?;
    assert_eq!(frame.keys().cloned().collect::<Vec<_>>(), vec![".gitignore", "keep.txt", "nested"]);
    assert_eq!(frame["nested"], b"now a file\n".to_vec());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_symlinks_and_executable_bits_survive() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let provider = |dest: &Path| -> Result<SnapshotTypeHint> {
        let script = dest.join("run.sh");
        fs::write(&script, "#!/bin/sh\necho hi\n")?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
        std::os::unix::fs::symlink("run.sh", dest.join("link"))?;
        Ok(SnapshotTypeHint::Any)
    };

    let out = TempDir::new()?;
    let path = out.path().join("modes.srcs");
    let mut recorder = SourceCodeRecorderBuilder::new(provider, &path)
        .time_source(FakeTimeSource::new())
        .build()?;
    recorder.start(Duration::from_secs(2))?;
    recorder.close()?;

    let dest = out.path().join("export");
    export_tree_at(&path, &Selector::Timestamp(1), &dest)?;
    let mode = fs::metadata(dest.join("run.sh"))?.permissions().mode();
    assert_ne!(mode & 0o111, 0);
    assert_eq!(fs::read_link(dest.join("link"))?, PathBuf::from("run.sh"));
    Ok(())
}

#[test]
fn test_real_clock_stops_promptly() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("live.srcs");
    let frame = Frame::from([("live.txt".to_string(), b"live\n".to_vec())]);
    let mut recorder = SourceCodeRecorderBuilder::new(scripted_provider(vec![frame]), &path)
        .snapshot_every(Duration::from_millis(50))
        .build()?;

    let handle = recorder.handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        handle.tag_current_state("midway").unwrap();
        handle.stop().unwrap();
    });

    let started = std::time::Instant::now();
    recorder.start(Duration::MAX)?;
    stopper.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    recorder.close()?;

    let segments = ContainerReader::open(&path)?.read_all()?;
    assert!(segments.len() >= 3);
    assert_eq!(segments[segments.len() - 2].tag, "midway");
    assert!(!segments[segments.len() - 1].has_tag());
    assert_eq!(recorder.state(), RecorderState::Stopped);
    Ok(())
}
