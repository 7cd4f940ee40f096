//! Zekta - embedded time-bucketed storage engine.
//!
//! This crate stores time series of fixed-width byte values, partitioned
//! into buckets of 512 time units that each map to one file on disk.
//!
//! # Components
//!
//! - [`Series`]: routes operations across a sorted sparse set of buckets,
//!   fanning range queries out in parallel
//! - [`Bucket`](store::Bucket): a single-file sorted run with binary
//!   insertion, in-place deletes, and idle flush/unload timers
//! - [`GrowableBuffer`](store::GrowableBuffer): the byte arena behind each
//!   bucket
//! - [`codec`]: fixed-width value codecs and a typed series wrapper
//!
//! # Example
//!
//! ```rust,ignore
//! use zekta::{SelectOptions, Series, SeriesOptions};
//!
//! // Open (or create) a series of 8-byte values.
//! let series = Series::open(
//!     SeriesOptions::new("/data/metrics").with_value_byte_length(8),
//! )
//! .await?;
//!
//! // Entries can arrive in any time order.
//! series.push(17.5, &42u64.to_le_bytes()).await?;
//! series.push(3.0, &7u64.to_le_bytes()).await?;
//!
//! // Select is inclusive on both ends and sorted.
//! let entries = series
//!     .select(SelectOptions::default().with_from(0.0).with_to(100.0))
//!     .await?;
//!
//! series.flush(true).await?;
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod store;

pub use error::{Result, ZektaError};
pub use store::{
    Bucket, DeleteOptions, Entry, SelectOptions, Series, SeriesOptions, TIME_BYTES, TIME_RANGE,
};
