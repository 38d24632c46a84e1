//! Error types for the srcs library
//!
//! Every fallible operation in the crate returns [`Result<T>`]. The variants
//! mirror the failure classes a recording or replay can run into: malformed
//! containers, corrupt segments, patches that no longer apply, unresolved
//! export selectors and plain I/O failures. Nothing is retried automatically;
//! callers get the first failure with as much context as is available.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the srcs library
pub type Result<T> = std::result::Result<T, SrcsError>;

/// Main error type for all srcs operations
#[derive(Debug, Error)]
pub enum SrcsError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Bad container or segment magic, or a truncated header
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A segment whose checksum or declared length does not hold
    #[error("Corrupt segment #{index}: {reason}")]
    CorruptSegment {
        /// Position of the segment in the stream
        index: usize,
        /// What was wrong with it
        reason: String,
    },

    /// A patch that does not apply to the current tree
    #[error("Patch does not apply at {path}: {reason}")]
    PatchApplyError {
        /// Tree path where application failed
        path: String,
        /// Why it failed
        reason: String,
    },

    /// Export selector matched no segment
    #[error("No segment matches {0}")]
    UnresolvedSelector(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Object not found in the shadow object store
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Commit manifest not found in the shadow repository
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// A git invocation failed
    #[error("git {command} failed: {message}")]
    Git {
        /// Subcommand that was run
        command: String,
        /// stderr or spawn error
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the current recorder state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The recorder behind a handle is gone
    #[error("Recorder is closed")]
    RecorderClosed,

    /// Destination for a conversion or export is not usable
    #[error("Destination not usable: {path:?} ({reason})")]
    InvalidDestination {
        /// Offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Walk directory error from walkdir crate
    #[error("Walk directory error")]
    WalkDir(#[from] walkdir::Error),

    /// UTF-8 conversion error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Path that cannot be represented in a container
    #[error("Path conversion error: {0:?}")]
    PathConversion(PathBuf),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for SrcsError {
    fn from(err: bincode::error::DecodeError) -> Self {
        SrcsError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for SrcsError {
    fn from(err: bincode::error::EncodeError) -> Self {
        SrcsError::Bincode(err.to_string())
    }
}

impl SrcsError {
    /// Create an invalid format error with a custom message
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        SrcsError::InvalidFormat(msg.into())
    }

    /// Create a corrupt segment error for the segment at `index`
    pub fn corrupt_segment(index: usize, reason: impl Into<String>) -> Self {
        SrcsError::CorruptSegment {
            index,
            reason: reason.into(),
        }
    }

    /// Create a patch application error
    pub fn patch_apply(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SrcsError::PatchApplyError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        SrcsError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        SrcsError::Decompression(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SrcsError::Internal(msg.into())
    }

    /// Check if this error means the container itself is damaged
    ///
    /// Bad magic, checksum and length failures, undecodable payloads and
    /// patches that no longer apply all point at the stream rather than the
    /// environment.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SrcsError::InvalidFormat(_)
                | SrcsError::CorruptSegment { .. }
                | SrcsError::PatchApplyError { .. }
                | SrcsError::Decompression(_)
                | SrcsError::Bincode(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SrcsError::InvalidFormat(_) => {
                format!("{}. Is this a .srcs recording?", self)
            }
            SrcsError::CorruptSegment { index, .. } => {
                format!(
                    "{}. Segments before #{} are intact; use 'srcs convert --lenient' to skip damaged segments.",
                    self, index
                )
            }
            SrcsError::UnresolvedSelector(_) => {
                format!("{}. Use 'srcs list' to see recorded timestamps and tags.", self)
            }
            SrcsError::Git { .. } => {
                format!("{}. Check that git is installed and on PATH.", self)
            }
            _ => self.to_string(),
        }
    }
}
