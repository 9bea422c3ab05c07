use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by artifact persistence and retrieval.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No artifact exists at the configured path.
    #[error("index artifact not found at {}", .path.display())]
    NotFound { path: PathBuf },

    /// The artifact exists but cannot be decoded, fails its checksum, or its
    /// corpus and scoring structure disagree.
    #[error("index artifact at {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// An in-memory corpus/index pair that does not describe the same documents.
    #[error("corpus and scoring structure disagree: {0}")]
    Inconsistent(String),

    #[error("i/o error on index artifact {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to encode index artifact: {0}")]
    Encode(String),
}
