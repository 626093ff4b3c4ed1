//! Error types for chunkstream-engine
//!
//! Chunk-level failures (decode, enhancement, cache write) are distinct
//! variants so the stream controller can report them with a recovery
//! position and the buffer worker can log and skip them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the streaming engine
#[derive(Error, Debug)]
pub enum Error {
    /// File stat failed; signature degraded to path-only hashing
    #[error("Signature unavailable for {path}: {reason}")]
    SignatureUnavailable { path: PathBuf, reason: String },

    /// Source audio could not be decoded for a chunk
    #[error("Chunk {chunk_index} decode failed: {reason}")]
    ChunkDecode { chunk_index: usize, reason: String },

    /// External enhancement capability failed for a chunk
    #[error("Chunk {chunk_index} enhancement failed: {reason}")]
    Enhancement { chunk_index: usize, reason: String },

    /// Processed chunk could not be persisted
    #[error("Cache write failed for {path}: {reason}")]
    CacheWrite { path: PathBuf, reason: String },

    /// Admission could not be granted within the allowed wait
    #[error("Stream capacity exceeded ({max_streams} concurrent streams)")]
    StreamCapacityExceeded { max_streams: usize },

    /// Client connection went away during delivery
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Track id not present in the catalog
    #[error("Track not found: {0}")]
    TrackNotFound(i64),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation interrupted by a stop request
    #[error("Cancelled")]
    Cancelled,

    /// Engine is shutting down and refuses new work
    #[error("Shutting down")]
    ShuttingDown,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures raised while producing a chunk
    pub fn is_chunk_failure(&self) -> bool {
        matches!(
            self,
            Error::ChunkDecode { .. } | Error::Enhancement { .. } | Error::CacheWrite { .. }
        )
    }
}

impl From<chunkstream_common::Error> for Error {
    fn from(err: chunkstream_common::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
