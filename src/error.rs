//! Error taxonomy for the sync and extraction runs.
//!
//! [`SyncError`] values are structural and abort the run. [`DecodeError`]
//! values are recovered per record: the record is skipped, logged and
//! counted.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A configured sensor name has no entry in the log's topic table
    #[error("stream not found in log: {0}")]
    StreamNotFound(String),

    #[error("failed to open log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("log read failed: {0}")]
    Log(#[from] rusqlite::Error),

    /// The index referenced a record the log no longer returns
    #[error("record {record_id} of stream {stream} is missing from the log")]
    MissingRecord { stream: String, record_id: i64 },

    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JPEG markers not found")]
    MarkersNotFound,

    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
