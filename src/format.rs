//! Binary layout of `.srcs` containers
//!
//! A container is a 14-byte [`Header`] followed by any number of segments.
//! Each segment is a fixed 38-byte [`SegmentHeader`] and the payload it
//! describes:
//!
//! ```text
//! header   : "SRCSTM" | created_at_millis (u64 LE)
//! segment  : 99 | type (0 KEY, 1 PATCH) | timestamp_sec (u64 LE)
//!            | payload_len (u64 LE) | sha1(payload) [20]
//! payload  : tag_len (u16 LE) | tag (utf-8) | snapshot body
//! ```
//!
//! The codec only frames bytes; what a snapshot body means is decided by
//! [`crate::snapshot`].

use crate::error::{Result, SrcsError};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Magic bytes opening every container
pub const MAGIC: [u8; 6] = [0x53, 0x52, 0x43, 0x53, 0x54, 0x4d];

/// Size of the container header in bytes
pub const HEADER_SIZE: usize = 14;

/// Marker byte opening every segment header
pub const SEGMENT_MAGIC: u8 = 99;

/// Size of a segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 38;

/// Offset of the checksum inside a segment header
pub const CHECKSUM_OFFSET: usize = 18;

/// Longest tag that fits the payload framing
pub const MAX_TAG_LEN: usize = u16::MAX as usize;

/// Container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    magic: [u8; 6],
    /// Recording creation time, Unix epoch milliseconds
    pub timestamp: u64,
}

impl Header {
    /// Header for a new container
    pub fn new(timestamp: u64) -> Self {
        Self {
            magic: MAGIC,
            timestamp,
        }
    }

    /// Parse the raw header bytes without validating them
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 6];
        magic.copy_from_slice(&bytes[..6]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[6..]);
        Self {
            magic,
            timestamp: u64::from_le_bytes(ts),
        }
    }

    /// Whether the magic bytes match exactly
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// Creation time in whole seconds since the epoch
    pub fn timestamp_secs(&self) -> u64 {
        self.timestamp / 1000
    }

    /// Encode to the on-disk form
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..6].copy_from_slice(&self.magic);
        out[6..].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }
}

/// Encode a fresh header for `timestamp`
pub fn encode_header(timestamp: u64) -> [u8; HEADER_SIZE] {
    Header::new(timestamp).to_bytes()
}

/// Decode and validate a container header
///
/// # Errors
///
/// [`SrcsError::InvalidFormat`] if fewer than 14 bytes are given or the
/// magic does not match.
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    let raw: &[u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            SrcsError::invalid_format(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            ))
        })?;
    let header = Header::from_bytes(raw);
    if !header.is_valid() {
        return Err(SrcsError::invalid_format(format!(
            "bad container magic {}",
            hex::encode(&raw[..6])
        )));
    }
    Ok(header)
}

/// Kind of snapshot a segment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotType {
    /// Self-contained capture of the whole tree
    Key,
    /// Difference against the previously recorded state
    Patch,
}

impl SnapshotType {
    /// On-disk tag byte
    pub fn code(self) -> u8 {
        match self {
            SnapshotType::Key => 0,
            SnapshotType::Patch => 1,
        }
    }

    /// Parse an on-disk tag byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SnapshotType::Key),
            1 => Some(SnapshotType::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotType::Key => write!(f, "KEY"),
            SnapshotType::Patch => write!(f, "PATCH"),
        }
    }
}

/// Fixed-size header preceding every segment payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Snapshot kind
    pub segment_type: SnapshotType,
    /// Seconds since the recording started
    pub timestamp_sec: u64,
    /// Number of payload bytes that follow
    pub payload_len: u64,
    /// SHA-1 of the payload
    pub checksum: [u8; 20],
}

impl SegmentHeader {
    /// Encode to the on-disk form
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[0] = SEGMENT_MAGIC;
        out[1] = self.segment_type.code();
        out[2..10].copy_from_slice(&self.timestamp_sec.to_le_bytes());
        out[10..18].copy_from_slice(&self.payload_len.to_le_bytes());
        out[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum);
        out
    }
}

/// Decode a segment header
///
/// # Errors
///
/// [`SrcsError::InvalidFormat`] on a bad segment magic or an unknown type.
pub fn decode_segment_header(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Result<SegmentHeader> {
    if bytes[0] != SEGMENT_MAGIC {
        return Err(SrcsError::invalid_format(format!(
            "bad segment magic {} (expected {})",
            bytes[0], SEGMENT_MAGIC
        )));
    }
    let segment_type = SnapshotType::from_code(bytes[1]).ok_or_else(|| {
        SrcsError::invalid_format(format!("unknown segment type {}", bytes[1]))
    })?;

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&bytes[2..10]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[10..18]);
    let mut checksum = [0u8; 20];
    checksum.copy_from_slice(&bytes[CHECKSUM_OFFSET..]);

    Ok(SegmentHeader {
        segment_type,
        timestamp_sec: u64::from_le_bytes(ts),
        payload_len: u64::from_le_bytes(len),
        checksum,
    })
}

/// Frame `payload` as a complete segment, header included
pub fn encode_segment(segment_type: SnapshotType, timestamp_sec: u64, payload: &[u8]) -> Vec<u8> {
    let header = SegmentHeader {
        segment_type,
        timestamp_sec,
        payload_len: payload.len() as u64,
        checksum: utils::sha1_digest(payload),
    };
    let mut out = Vec::with_capacity(SEGMENT_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Check a payload against the checksum and length recorded in its header
pub fn verify(header: &SegmentHeader, payload: &[u8]) -> bool {
    header.payload_len == payload.len() as u64 && utils::sha1_digest(payload) == header.checksum
}

/// Wrap a snapshot body with its tag
pub fn frame_payload(tag: &str, body: &[u8]) -> Result<Vec<u8>> {
    let tag = tag.trim();
    if tag.len() > MAX_TAG_LEN {
        return Err(SrcsError::InvalidConfiguration(format!(
            "tag is {} bytes, limit is {}",
            tag.len(),
            MAX_TAG_LEN
        )));
    }
    let mut out = Vec::with_capacity(2 + tag.len() + body.len());
    out.extend_from_slice(&(tag.len() as u16).to_le_bytes());
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Split a payload into its trimmed tag and the snapshot body
pub fn unframe_payload(payload: &[u8]) -> std::result::Result<(String, &[u8]), String> {
    if payload.len() < 2 {
        return Err(format!("payload of {} bytes has no tag framing", payload.len()));
    }
    let tag_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let rest = &payload[2..];
    if rest.len() < tag_len {
        return Err(format!("tag length {} exceeds payload", tag_len));
    }
    let (tag_bytes, body) = rest.split_at(tag_len);
    let tag = std::str::from_utf8(tag_bytes).map_err(|e| format!("tag is not utf-8: {}", e))?;
    Ok((tag.trim().to_string(), body))
}

/// One decoded segment: type, timing, tag and snapshot body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Snapshot kind
    pub segment_type: SnapshotType,
    /// Seconds since the recording started
    pub timestamp_sec: u64,
    /// Tag, empty when the segment is untagged
    pub tag: String,
    /// Snapshot body (compressed key archive or patch)
    pub body: Vec<u8>,
}

impl Segment {
    /// Build a segment; the tag is trimmed
    pub fn new(
        segment_type: SnapshotType,
        timestamp_sec: u64,
        tag: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            segment_type,
            timestamp_sec,
            tag: tag.into().trim().to_string(),
            body,
        }
    }

    /// Whether the segment carries a tag
    pub fn has_tag(&self) -> bool {
        !self.tag.is_empty()
    }

    /// Payload bytes as they are checksummed on disk
    pub fn payload(&self) -> Result<Vec<u8>> {
        frame_payload(&self.tag, &self.body)
    }

    /// Encode header and payload as one contiguous buffer
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode_segment(self.segment_type, self.timestamp_sec, &self.payload()?))
    }

    /// Rebuild a segment from a verified header and payload
    pub fn from_parts(index: usize, header: &SegmentHeader, payload: &[u8]) -> Result<Self> {
        let (tag, body) =
            unframe_payload(payload).map_err(|reason| SrcsError::corrupt_segment(index, reason))?;
        Ok(Self {
            segment_type: header.segment_type,
            timestamp_sec: header.timestamp_sec,
            tag,
            body: body.to_vec(),
        })
    }
}
