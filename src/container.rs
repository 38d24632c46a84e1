//! Sequential reading and append-only writing of `.srcs` containers
//!
//! [`ContainerWriter`] writes the header once and then appends whole
//! segments; [`ContainerReader`] walks segments strictly front to back,
//! trusting each declared length to find the next header and re-verifying
//! every checksum on the way.
//!
//! ## Reading damaged containers
//!
//! The reader yields one `Result` per segment. A checksum mismatch is
//! reported for that segment only and reading continues with the next one,
//! because the length field still locates it. A truncated payload, a short
//! header or a bad segment magic ends iteration, since nothing after that
//! point can be framed reliably.

use crate::error::{Result, SrcsError};
use crate::format::{
    self, Header, Segment, SegmentHeader, HEADER_SIZE, SEGMENT_HEADER_SIZE,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Append-only container writer
///
/// Owns its output; there is no way to write a segment except through
/// [`append`](Self::append), which emits header and payload as one buffer.
pub struct ContainerWriter<W: Write = BufWriter<File>> {
    out: W,
    header: Header,
    segments_written: usize,
    bytes_written: u64,
}

impl ContainerWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write the header
    pub fn create(path: &Path, timestamp_millis: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        debug!("Creating container {:?}", path);
        Self::new(BufWriter::new(file), timestamp_millis)
    }
}

impl<W: Write> ContainerWriter<W> {
    /// Start a container on an arbitrary writer
    pub fn new(mut out: W, timestamp_millis: u64) -> Result<Self> {
        let header = Header::new(timestamp_millis);
        out.write_all(&header.to_bytes())?;
        out.flush()?;
        Ok(Self {
            out,
            header,
            segments_written: 0,
            bytes_written: HEADER_SIZE as u64,
        })
    }

    /// Header written at creation
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of segments appended so far
    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    /// Total bytes written, header included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one segment and flush it; returns the encoded size
    pub fn append(&mut self, segment: &Segment) -> Result<u64> {
        let encoded = segment.encode()?;
        self.append_encoded(&encoded)
    }

    fn append_encoded(&mut self, encoded: &[u8]) -> Result<u64> {
        self.out.write_all(encoded)?;
        self.out.flush()?;
        self.segments_written += 1;
        self.bytes_written += encoded.len() as u64;
        trace!(
            "Appended segment #{} ({} bytes)",
            self.segments_written - 1,
            encoded.len()
        );
        Ok(encoded.len() as u64)
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Sequential container reader
pub struct ContainerReader<R: Read = BufReader<File>> {
    input: R,
    header: Header,
    next_index: usize,
    finished: bool,
}

impl ContainerReader<BufReader<File>> {
    /// Open a container file and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> ContainerReader<R> {
    /// Read and validate the header from `input`
    pub fn new(mut input: R) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        read_exact_or_eof(&mut input, &mut raw).and_then(|n| {
            if n < HEADER_SIZE {
                Err(SrcsError::invalid_format(format!(
                    "truncated header: {} of {} bytes",
                    n, HEADER_SIZE
                )))
            } else {
                Ok(())
            }
        })?;
        let header = format::decode_header(&raw)?;
        Ok(Self {
            input,
            header,
            next_index: 0,
            finished: false,
        })
    }

    /// Container header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Read every segment, failing on the first problem
    pub fn read_all(self) -> Result<Vec<Segment>> {
        self.collect()
    }

    /// Read the next segment's header and raw payload, verifying the checksum
    fn read_raw(&mut self) -> Option<Result<(SegmentHeader, Vec<u8>)>> {
        if self.finished {
            return None;
        }
        let index = self.next_index;

        let mut raw = [0u8; SEGMENT_HEADER_SIZE];
        let got = match read_exact_or_eof(&mut self.input, &mut raw) {
            Ok(n) => n,
            Err(e) => return Some(Err(self.halt(e))),
        };
        if got == 0 {
            self.finished = true;
            return None;
        }
        self.next_index += 1;
        if got < SEGMENT_HEADER_SIZE {
            let err = SrcsError::corrupt_segment(
                index,
                format!("truncated header: {} of {} bytes", got, SEGMENT_HEADER_SIZE),
            );
            return Some(Err(self.halt(err)));
        }

        let header = match format::decode_segment_header(&raw) {
            Ok(h) => h,
            Err(e) => return Some(Err(self.halt(e))),
        };

        let mut payload = Vec::new();
        let read = (&mut self.input)
            .take(header.payload_len)
            .read_to_end(&mut payload);
        if let Err(e) = read {
            return Some(Err(self.halt(e.into())));
        }
        if (payload.len() as u64) < header.payload_len {
            let err = SrcsError::corrupt_segment(
                index,
                format!(
                    "length mismatch: declared {} bytes, found {}",
                    header.payload_len,
                    payload.len()
                ),
            );
            return Some(Err(self.halt(err)));
        }

        if !format::verify(&header, &payload) {
            return Some(Err(SrcsError::corrupt_segment(index, "checksum mismatch")));
        }
        Some(Ok((header, payload)))
    }

    fn halt(&mut self, err: SrcsError) -> SrcsError {
        self.finished = true;
        err
    }
}

impl<R: Read> Iterator for ContainerReader<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next_index;
        Some(
            self.read_raw()?
                .and_then(|(header, payload)| Segment::from_parts(index, &header, &payload)),
        )
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// A container on disk that can be read any number of times
#[derive(Debug, Clone)]
pub struct ContainerFile {
    path: PathBuf,
}

impl ContainerFile {
    /// Refer to a container by path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the container
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh reader from the start of the file
    pub fn reader(&self) -> Result<ContainerReader> {
        ContainerReader::open(&self.path)
    }
}
