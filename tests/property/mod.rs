//! Property-based testing for srcs
//!
//! Uses proptest to verify codec and snapshot invariants across randomly
//! generated inputs.

use crate::integration::{read_frame, write_frame, Frame};
use ::srcs::delta::{apply_line_delta, compute_line_delta};
use ::srcs::format::{decode_header, decode_segment_header, encode_header, encode_segment, verify};
use ::srcs::format::{HEADER_SIZE, SEGMENT_HEADER_SIZE};
use ::srcs::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Text made of a few distinct lines, so edits share structure
fn text_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        prop_oneof![
            Just("fn main() {\n".to_string()),
            Just("}\n".to_string()),
            Just("    let x = 1;\n".to_string()),
            Just("\r\n".to_string()),
            "[a-z ]{0,12}\n",
        ],
        0..40,
    )
    .prop_map(|lines| lines.concat().into_bytes())
}

fn frame_strategy() -> impl Strategy<Value = Frame> {
    prop::collection::btree_map(
        prop_oneof!["[a-d]{1,3}\\.txt", "dir[0-2]/[a-d]{1,3}\\.rs"],
        prop_oneof![text_strategy(), prop::collection::vec(any::<u8>(), 0..300)],
        0..8,
    )
    .prop_filter("a path cannot be both a file and a directory", |frame| {
        !frame
            .keys()
            .any(|p| frame.keys().any(|q| q.starts_with(&format!("{}/", p))))
    })
}

proptest! {
    #[test]
    fn compression_round_trips(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        for strategy in [CompressionStrategy::None, CompressionStrategy::Fast] {
            let mut engine = CompressionEngine::new(strategy);
            let compressed = engine.compress(&data).unwrap();
            prop_assert_eq!(engine.decompress(&compressed).unwrap(), data.clone());
        }
    }

    #[test]
    fn segment_checksum_detects_any_bit_flip(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        timestamp in any::<u64>(),
        bit in any::<prop::sample::Index>(),
    ) {
        let encoded = encode_segment(SnapshotType::Patch, timestamp, &payload);
        let header_bytes: [u8; SEGMENT_HEADER_SIZE] = encoded[..SEGMENT_HEADER_SIZE].try_into().unwrap();
        let header = decode_segment_header(&header_bytes).unwrap();
        prop_assert_eq!(header.timestamp_sec, timestamp);
        prop_assert_eq!(header.payload_len, payload.len() as u64);
        prop_assert!(verify(&header, &payload));

        let mut damaged = payload.clone();
        let position = bit.index(damaged.len() * 8);
        damaged[position / 8] ^= 1 << (position % 8);
        prop_assert!(!verify(&header, &damaged));
    }

    #[test]
    fn header_round_trips(timestamp in any::<u64>(), bad_magic in any::<[u8; 6]>()) {
        let bytes = encode_header(timestamp);
        prop_assert_eq!(bytes.len(), HEADER_SIZE);
        let header = decode_header(&bytes).unwrap();
        prop_assert!(header.is_valid());
        prop_assert_eq!(header.timestamp, timestamp);

        let mut wrong = bytes;
        wrong[..6].copy_from_slice(&bad_magic);
        prop_assert_eq!(Header::from_bytes(&wrong).is_valid(), &bad_magic == b"SRCSTM");
    }

    #[test]
    fn line_delta_reproduces_target(old in text_strategy(), new in text_strategy()) {
        if let Some(delta) = compute_line_delta(&old, &new) {
            prop_assert_eq!(apply_line_delta(&old, &delta).unwrap(), new);
        }
    }

    #[test]
    fn tag_framing_trims(tag in "[ ]{0,2}[a-zA-Z0-9_-]{0,20}[ ]{0,2}", body in prop::collection::vec(any::<u8>(), 0..64)) {
        let segment = Segment::new(SnapshotType::Key, 0, tag.clone(), body.clone());
        prop_assert_eq!(&segment.tag, tag.trim());
        let bytes = segment.encode().unwrap();
        let mut container = encode_header(0).to_vec();
        container.extend_from_slice(&bytes);
        let decoded = ContainerReader::new(std::io::Cursor::new(container)).unwrap().read_all().unwrap();
        prop_assert_eq!(&decoded[0], &segment);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn snapshots_replay_any_sequence_of_trees(frames in prop::collection::vec(frame_strategy(), 1..5)) {
        for base in [PatchBase::Previous, PatchBase::LastKey] {
            let tracked = TempDir::new().unwrap();
            let target = TempDir::new().unwrap();
            let mut engine = SnapshotEngine::new(
                tracked.path().to_path_buf(),
                EngineConfig { key_snapshot_spacing: 3, patch_base: base, ..Default::default() },
            ).unwrap();
            let mut replayer = TreeReplayer::new(target.path());

            for (i, frame) in frames.iter().enumerate() {
                for entry in std::fs::read_dir(tracked.path()).unwrap() {
                    let path = entry.unwrap().path();
                    if path.is_dir() {
                        std::fs::remove_dir_all(&path).unwrap();
                    } else {
                        std::fs::remove_file(&path).unwrap();
                    }
                }
                write_frame(tracked.path(), frame).unwrap();

                let encoded = engine.take_snapshot(SnapshotTypeHint::Any).unwrap();
                let segment = Segment::new(encoded.snapshot_type, i as u64, "", encoded.body);
                replayer.apply_segment(&segment).unwrap();
                prop_assert_eq!(&read_frame(target.path()).unwrap(), frame);
            }
        }
    }

    #[test]
    fn selector_picks_first_match(timestamps in prop::collection::vec(0u64..5, 1..10), wanted in 0u64..5) {
        let selector = Selector::Timestamp(wanted);
        let expected = timestamps.iter().position(|ts| *ts == wanted);
        let found = timestamps.iter().position(|ts| selector.matches(*ts, ""));
        prop_assert_eq!(found, expected);
    }
}

#[test]
fn frame_strategy_paths_are_relative() {
    let frame: Frame = BTreeMap::from([("dir0/a.rs".to_string(), b"x".to_vec())]);
    let dir = TempDir::new().unwrap();
    write_frame(dir.path(), &frame).unwrap();
    assert_eq!(read_frame(dir.path()).unwrap(), frame);
}
