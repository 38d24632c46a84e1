//! Main test module for srcs
//!
//! This module includes all test suites:
//! - Integration tests for recording, conversion and export scenarios
//! - Chaos tests for damaged and truncated containers
//! - Property-based tests for codec and snapshot invariants

pub mod chaos;
pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use crate::integration::{read_frame, record_frames, Frame};
    use ::srcs::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_tree_is_recorded() {
        let recording = record_frames(vec![Frame::new(), Frame::new()], |b| b).unwrap();
        let segments = recording.segments().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].segment_type, SnapshotType::Key);

        let dest = recording.dir.path().join("empty");
        export_tree_at(&recording.path, &Selector::Timestamp(1), &dest).unwrap();
        assert!(read_frame(&dest).unwrap().is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
            "日本語.txt",
            "émoji_🚀.md",
        ];
        let first: Frame = names
            .iter()
            .map(|n| (n.to_string(), format!("Content of {}\n", n).into_bytes()))
            .collect();
        let mut second = first.clone();
        second.remove(names[0]);
        second.insert(names[5].to_string(), b"changed\n".to_vec());

        let recording = record_frames(vec![first, second.clone()], |b| b).unwrap();
        let dest = recording.dir.path().join("out");
        export_tree_at(&recording.path, &Selector::Timestamp(1), &dest).unwrap();
        assert_eq!(read_frame(&dest).unwrap(), second);
    }

    #[test]
    fn test_empty_and_crlf_files() {
        let first = Frame::from([
            ("empty".to_string(), Vec::new()),
            ("windows.txt".to_string(), b"a\r\nb\r\n".to_vec()),
            ("no_newline".to_string(), b"tail".to_vec()),
        ]);
        let second = Frame::from([
            ("empty".to_string(), b"now has content\n".to_vec()),
            ("windows.txt".to_string(), b"a\r\nx\r\nb\r\n".to_vec()),
            ("no_newline".to_string(), b"tail\nmore".to_vec()),
        ]);
        let recording = record_frames(vec![first, second.clone(), Frame::new()], |b| b).unwrap();
        let segments = recording.segments().unwrap();
        assert_eq!(segments[1].segment_type, SnapshotType::Patch);

        let dest = recording.dir.path().join("out");
        export_tree_at(&recording.path, &Selector::Timestamp(1), &dest).unwrap();
        assert_eq!(read_frame(&dest).unwrap(), second);
    }

    #[test]
    fn test_large_text_file_small_edit_stays_patch() {
        let body: String = (0..20_000).map(|i| format!("line number {}\n", i)).collect();
        let mut edited = body.clone();
        edited.insert_str(body.len() / 2, "inserted in the middle\n");

        let frames = vec![
            Frame::from([("big.txt".to_string(), body.into_bytes())]),
            Frame::from([("big.txt".to_string(), edited.clone().into_bytes())]),
        ];
        let recording = record_frames(frames, |b| b.key_snapshot_spacing(100)).unwrap();
        let segments = recording.segments().unwrap();
        assert_eq!(segments[1].segment_type, SnapshotType::Patch);
        assert!(segments[1].body.len() < segments[0].body.len() / 10);

        let dest = recording.dir.path().join("out");
        export_tree_at(&recording.path, &Selector::Timestamp(1), &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("big.txt")).unwrap(), edited);
    }

    #[test]
    fn test_keep_shadow_leaves_directory() {
        let tracked = TempDir::new().unwrap();
        fs::write(tracked.path().join("a"), "a").unwrap();
        let config = EngineConfig {
            keep_shadow: true,
            ..Default::default()
        };
        let shadow_path = {
            let mut engine = SnapshotEngine::new(tracked.path().to_path_buf(), config).unwrap();
            engine.take_snapshot(SnapshotTypeHint::Any).unwrap();
            engine.shadow_path().to_path_buf()
        };
        assert!(shadow_path.exists());
        fs::remove_dir_all(&shadow_path).unwrap();
    }
}
