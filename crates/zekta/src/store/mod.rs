//! Time-bucketed storage engine.
//!
//! Entries are `(time, value)` pairs with an `f64` timestamp and a
//! fixed-width byte value. A [`Series`] partitions entries into buckets of
//! [`TIME_RANGE`] time units, each backed by one file under the series
//! directory; a [`Bucket`] keeps its records sorted in a single in-memory
//! byte run and writes them back whole on flush.

pub mod bucket;
pub mod buffer;
pub mod config;
pub mod search;
pub mod series;

use std::sync::Arc;

use crate::error::ZektaError;

pub use bucket::Bucket;
pub use buffer::GrowableBuffer;
pub use config::SeriesConfig;
pub use series::{DeleteOptions, SelectOptions, Series, SeriesOptions};

/// Width of one time bucket, in the same units as entry timestamps.
pub const TIME_RANGE: f64 = 512.0;

/// Bytes used to store one timestamp on disk.
pub const TIME_BYTES: usize = 8;

/// Receiver for failures raised by background maintenance (timer-driven
/// flushes and unloads) that have no caller to propagate to.
pub type ErrorSink = Arc<dyn Fn(&ZektaError) + Send + Sync>;

/// A single `(time, value)` record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Timestamp of the record.
    pub time: f64,
    /// Opaque value payload; its length is fixed per series.
    pub value: Vec<u8>,
}

impl Entry {
    /// Creates an entry from a timestamp and value bytes.
    pub fn new(time: f64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            time,
            value: value.into(),
        }
    }
}
