//! Error and Result types for zekta storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for zekta operations.
pub type Result<T> = std::result::Result<T, ZektaError>;

/// The error type for storage-engine operations.
#[derive(Debug, Error)]
pub enum ZektaError {
    /// Timestamp falls outside the accepting bucket's half-open range.
    #[error("time {time} outside bucket range [{from}, {to})")]
    OutOfRange {
        /// The rejected timestamp.
        time: f64,
        /// Start of the bucket range (inclusive).
        from: f64,
        /// End of the bucket range (exclusive).
        to: f64,
    },

    /// Value payload does not match the series-wide byte length.
    #[error("value is {actual} bytes, series expects {expected}")]
    BadValueLength {
        /// Byte length the series was opened with.
        expected: usize,
        /// Byte length of the rejected value.
        actual: usize,
    },

    /// Timestamp cannot be routed to a bucket (NaN, infinite, or beyond
    /// the representable bucket id range).
    #[error("unroutable time {0}")]
    InvalidTime(f64),

    /// Bucket filename stem is not a canonical integer id.
    #[error("invalid bucket file name: {}", .0.display())]
    BadBucketFile(PathBuf),

    /// Bucket file size is not a multiple of the record size.
    #[error("bucket file {} is {len} bytes, not a whole number of records", .path.display())]
    CorruptBucketFile {
        /// Path of the offending file.
        path: PathBuf,
        /// Observed file size in bytes.
        len: u64,
    },

    /// Unsupported series config file version.
    #[error("unsupported config version: {0}")]
    UnsupportedVersion(u32),

    /// Caller-supplied value byte length disagrees with the on-disk config.
    #[error("series stores {expected}-byte values, caller requested {actual}")]
    IncompatibleConfig {
        /// Byte length recorded in the config file.
        expected: usize,
        /// Byte length requested by the caller.
        actual: usize,
    },

    /// Creating a new series without specifying the value byte length.
    #[error("a value byte length is required to create a new series")]
    MissingValueByteLength,

    /// Opening an existing series that does not exist, with creation disabled.
    #[error("no series found at {}", .0.display())]
    SeriesNotFound(PathBuf),

    /// Bucket buffer growth past the hard capacity cap.
    #[error("requested {requested} bytes, bucket buffers are capped at {max}")]
    CapacityExceeded {
        /// Requested logical length in bytes.
        requested: usize,
        /// Hard capacity cap in bytes.
        max: usize,
    },

    /// A stored value could not be decoded to the requested type.
    #[error("invalid value encoding: {0}")]
    BadValue(String),

    /// Malformed series config file.
    #[error("invalid series config: {0}")]
    BadConfig(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A parallel fan-out produced more than one failure.
    #[error("{} of the dispatched operations failed", .0.len())]
    Aggregate(Vec<ZektaError>),

    /// The worker task serialising an operation is no longer running.
    #[error("storage worker task stopped")]
    TaskStopped,
}
