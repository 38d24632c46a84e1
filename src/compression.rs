//! LZ4 compression engine for snapshot payloads and shadow objects
//!
//! Everything that gets compressed in srcs goes through [`CompressionEngine`]:
//! key archives, patch blobs and the file contents kept in the shadow object
//! store. LZ4 keeps the per-tick cost low enough that a recording can run
//! every second against a real project.
//!
//! ## Format
//!
//! Compressed data carries a 4-byte marker:
//! - `LZ4S` (0x4C5A3453): LZ4 block with prepended size follows
//! - `\0\0\0\0`: raw data follows
//!
//! The raw marker is used whenever compression does not pay off, so the
//! output is never more than four bytes larger than the input. An empty
//! input compresses to the bare raw marker and decompresses back to empty.
//!
//! ## Examples
//!
//! ```rust
//! use srcs::compression::{CompressionEngine, CompressionStrategy};
//!
//! let mut engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = b"fn main() {}\n".repeat(200);
//! let compressed = engine.compress(&data).unwrap();
//! assert!(compressed.len() < data.len());
//! assert_eq!(engine.decompress(&compressed).unwrap(), data);
//! ```

use crate::error::{Result, SrcsError};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, trace};

/// Compression strategies
///
/// Determines when data is compressed. Snapshot payloads usually use
/// [`CompressionStrategy::Fast`]; `Adaptive` additionally skips file types
/// that are already compressed when storing shadow objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// No compression
    None,

    /// LZ4 for everything above 64 bytes (default)
    #[default]
    Fast,

    /// Size and extension aware compression
    Adaptive {
        /// Skip compression for data smaller than this
        min_size: usize,
        /// Skip these file extensions (already compressed)
        skip_extensions: Vec<String>,
    },
}

impl CompressionStrategy {
    /// Parse a strategy name as used in configuration files and the CLI
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionStrategy::None),
            "fast" => Ok(CompressionStrategy::Fast),
            "adaptive" => Ok(CompressionStrategy::Adaptive {
                min_size: 4096,
                skip_extensions: default_skip_extensions(),
            }),
            other => Err(SrcsError::InvalidConfiguration(format!(
                "unknown compression strategy '{}'",
                other
            ))),
        }
    }
}

/// Compression statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Number of buffers compressed
    pub buffers_compressed: usize,
    /// Number of buffers stored raw
    pub buffers_stored_raw: usize,
    /// Total bytes saved by compression
    pub bytes_saved: usize,
    /// Total compression time in microseconds
    pub compression_time_us: u64,
    /// Total decompression time in microseconds
    pub decompression_time_us: u64,
}

impl CompressionStats {
    /// Fraction of buffers that ended up compressed
    pub fn compression_ratio(&self) -> f64 {
        let total = self.buffers_compressed + self.buffers_stored_raw;
        if total == 0 {
            return 0.0;
        }
        self.buffers_compressed as f64 / total as f64
    }
}

/// Compression engine
///
/// Not thread-safe; the shadow repository keeps one per worker via a lock
/// and the snapshot codecs create their own.
#[derive(Debug)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

const LZ4_MAGIC: &[u8; 4] = b"LZ4S";
const RAW_MAGIC: &[u8; 4] = &[0, 0, 0, 0];
const MIN_COMPRESSIBLE: usize = 64;

impl CompressionEngine {
    /// Create a new compression engine with the specified strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: CompressionStats::default(),
        }
    }

    /// Strategy in use
    pub fn strategy(&self) -> &CompressionStrategy {
        &self.strategy
    }

    /// Get current compression statistics
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Compress an anonymous buffer such as a snapshot payload
    pub fn compress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        let allowed = self.should_compress(None, content.len());
        self.compress_inner(content, allowed)
    }

    /// Compress file content, letting the strategy look at the path
    pub fn compress_file(&mut self, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
        let allowed = self.should_compress(Some(path), content.len());
        if !allowed {
            trace!("Skipping compression for {:?} (strategy)", path);
        }
        self.compress_inner(content, allowed)
    }

    fn compress_inner(&mut self, content: &[u8], allowed: bool) -> Result<Vec<u8>> {
        let start = Instant::now();

        if !allowed || content.len() < MIN_COMPRESSIBLE {
            self.stats.buffers_stored_raw += 1;
            return Ok(raw_frame(content));
        }

        let compressed = compress_prepend_size(content);
        if compressed.len() < content.len() {
            let saved = content.len() - compressed.len();
            self.stats.bytes_saved += saved;
            self.stats.buffers_compressed += 1;
            self.stats.compression_time_us += start.elapsed().as_micros() as u64;

            debug!(
                "Compressed {} -> {} bytes (saved {:.1}%)",
                content.len(),
                compressed.len(),
                (saved as f64 / content.len() as f64) * 100.0
            );

            let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
            result.extend_from_slice(LZ4_MAGIC);
            result.extend_from_slice(&compressed);
            Ok(result)
        } else {
            trace!("Compression not beneficial for {} bytes, storing raw", content.len());
            self.stats.buffers_stored_raw += 1;
            Ok(raw_frame(content))
        }
    }

    /// Decompress data produced by [`compress`](Self::compress) or
    /// [`compress_file`](Self::compress_file)
    ///
    /// # Errors
    ///
    /// Fails if the marker is missing or unknown, or if the LZ4 block is
    /// damaged.
    pub fn decompress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();

        if content.len() < 4 {
            return Err(SrcsError::decompression("Content too short"));
        }

        let (marker, body) = content.split_at(4);
        if marker == LZ4_MAGIC {
            let decompressed = decompress_size_prepended(body).map_err(|e| {
                SrcsError::decompression(format!("LZ4 decompression failed: {}", e))
            })?;
            self.stats.decompression_time_us += start.elapsed().as_micros() as u64;
            trace!("Decompressed {} bytes to {} bytes", content.len(), decompressed.len());
            Ok(decompressed)
        } else if marker == RAW_MAGIC {
            Ok(body.to_vec())
        } else {
            Err(SrcsError::decompression(format!(
                "Unknown compression marker {}",
                hex::encode(marker)
            )))
        }
    }

    fn should_compress(&self, path: Option<&Path>, size: usize) -> bool {
        match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => true,
            CompressionStrategy::Adaptive {
                min_size,
                skip_extensions,
            } => {
                if size < *min_size {
                    return false;
                }
                match path.and_then(|p| p.extension()).and_then(|e| e.to_str()) {
                    Some(ext) => !skip_extensions
                        .iter()
                        .any(|skip| skip.eq_ignore_ascii_case(ext)),
                    None => true,
                }
            }
        }
    }
}

fn raw_frame(content: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
    result.extend_from_slice(RAW_MAGIC);
    result.extend_from_slice(content);
    result
}

/// Extensions of formats that are already compressed
pub fn default_skip_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "webp", "zip", "gz", "bz2", "xz", "7z", "rar", "jar",
        "mp3", "mp4", "pdf", "woff", "woff2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
