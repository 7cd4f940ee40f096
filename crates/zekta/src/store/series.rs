//! Series: a sorted sparse collection of buckets spanning all time.
//!
//! The series routes each operation to the buckets whose time ranges it
//! touches. Range operations fan out to every covered bucket in parallel
//! and merge the results; single-entry writes route to exactly one bucket,
//! creating it on demand. Buckets are kept in a vector sorted by id, with
//! absent ids meaning "empty".
//!
//! Public operations are serialised by a fair async mutex held for the
//! whole operation, so operations issued on one series complete in
//! submission order even when the caller fires many of them without
//! awaiting each individually. Per-bucket parallelism happens below that
//! boundary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{Result, ZektaError};
use crate::store::bucket::{self, Bucket};
use crate::store::config::SeriesConfig;
use crate::store::search;
use crate::store::{Entry, ErrorSink, TIME_RANGE};

/// Name of the directory holding bucket files inside a series directory.
pub const BUCKETS_DIR_NAME: &str = "buckets";

/// Options for [`Series::open`].
#[derive(Clone)]
pub struct SeriesOptions {
    dir: PathBuf,
    value_byte_length: Option<usize>,
    create: bool,
    error_sink: Option<ErrorSink>,
}

impl SeriesOptions {
    /// Creates options for the series stored in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            value_byte_length: None,
            create: true,
            error_sink: None,
        }
    }

    /// Sets the fixed byte length of stored values.
    ///
    /// Required when creating a new series; optional when opening an
    /// existing one, where it must then match the stored config.
    pub fn with_value_byte_length(mut self, value_byte_length: usize) -> Self {
        self.value_byte_length = Some(value_byte_length);
        self
    }

    /// Controls whether a missing series is created on open. Default: true.
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Replaces the receiver for background maintenance failures.
    /// Default: log through `tracing::error!`.
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }
}

/// Range and direction for [`Series::select`]. Defaults to the full time
/// range, ascending; both ends are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions {
    /// Lower bound of the range (inclusive).
    pub from: f64,
    /// Upper bound of the range (inclusive).
    pub to: f64,
    /// Return entries in ascending time order.
    pub ascending: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            from: f64::NEG_INFINITY,
            to: f64::INFINITY,
            ascending: true,
        }
    }
}

impl SelectOptions {
    /// Sets the lower bound (inclusive).
    pub fn with_from(mut self, from: f64) -> Self {
        self.from = from;
        self
    }

    /// Sets the upper bound (inclusive).
    pub fn with_to(mut self, to: f64) -> Self {
        self.to = to;
        self
    }

    /// Returns entries newest-first.
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }
}

/// Range for [`Series::delete`]. Defaults to the full time range; both
/// ends are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Lower bound of the range (inclusive).
    pub from: f64,
    /// Upper bound of the range (inclusive).
    pub to: f64,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            from: f64::NEG_INFINITY,
            to: f64::INFINITY,
        }
    }
}

impl DeleteOptions {
    /// Sets the lower bound (inclusive).
    pub fn with_from(mut self, from: f64) -> Self {
        self.from = from;
        self
    }

    /// Sets the upper bound (inclusive).
    pub fn with_to(mut self, to: f64) -> Self {
        self.to = to;
        self
    }
}

struct SeriesInner {
    /// Buckets sorted by id, strictly ascending.
    buckets: Vec<Bucket>,
}

/// A time series of fixed-width values stored under one directory.
///
/// Layout: `<dir>/zekta.config.json` plus `<dir>/buckets/<id>.bucket`
/// files, one per non-empty time bucket.
///
/// Must be opened and used inside a tokio runtime.
pub struct Series {
    value_byte_length: usize,
    buckets_dir: PathBuf,
    sink: ErrorSink,
    inner: Mutex<SeriesInner>,
}

impl Series {
    /// Opens a series directory, creating it when allowed.
    ///
    /// An existing config file must be of a supported version and agree
    /// with a caller-supplied value byte length. A missing series is
    /// created when `create` is set (the default), which then requires a
    /// value byte length.
    ///
    /// # Errors
    ///
    /// `ZektaError::UnsupportedVersion`, `ZektaError::IncompatibleConfig`,
    /// `ZektaError::MissingValueByteLength`, `ZektaError::SeriesNotFound`,
    /// or `ZektaError::BadBucketFile` when the bucket directory contains a
    /// file that does not parse as a bucket id.
    pub async fn open(options: SeriesOptions) -> Result<Series> {
        let SeriesOptions {
            dir,
            value_byte_length,
            create,
            error_sink,
        } = options;
        let sink = error_sink.unwrap_or_else(default_error_sink);

        let value_byte_length = match SeriesConfig::load(&dir).await? {
            Some(config) => {
                if let Some(requested) = value_byte_length {
                    if requested != config.value_byte_length {
                        return Err(ZektaError::IncompatibleConfig {
                            expected: config.value_byte_length,
                            actual: requested,
                        });
                    }
                }
                config.value_byte_length
            }
            None if create => {
                let value_byte_length =
                    value_byte_length.ok_or(ZektaError::MissingValueByteLength)?;
                SeriesConfig::new(value_byte_length).store(&dir).await?;
                value_byte_length
            }
            None => return Err(ZektaError::SeriesNotFound(dir)),
        };

        let buckets_dir = dir.join(BUCKETS_DIR_NAME);
        let mut ids = list_bucket_ids(&buckets_dir).await?;
        ids.sort_unstable();
        debug!(dir = %dir.display(), buckets = ids.len(), "opened series");

        let buckets = ids
            .into_iter()
            .map(|id| Bucket::spawn(id, &buckets_dir, value_byte_length, sink.clone()))
            .collect();

        Ok(Series {
            value_byte_length,
            buckets_dir,
            sink,
            inner: Mutex::new(SeriesInner { buckets }),
        })
    }

    /// Returns the fixed byte length of stored values.
    pub fn value_byte_length(&self) -> usize {
        self.value_byte_length
    }

    /// Returns the ids of all buckets the series currently tracks,
    /// ascending. Buckets emptied by deletes stay tracked.
    pub async fn bucket_ids(&self) -> Vec<i64> {
        let inner = self.inner.lock().await;
        inner.buckets.iter().map(Bucket::id).collect()
    }

    /// Inserts one entry at `time`.
    ///
    /// # Errors
    ///
    /// `ZektaError::InvalidTime` for timestamps that cannot be routed to a
    /// bucket, `ZektaError::BadValueLength` for a wrong-width value.
    pub async fn push(&self, time: f64, value: &[u8]) -> Result<()> {
        let id = route(time)?;
        let mut inner = self.inner.lock().await;
        let bucket = get_or_create_bucket(
            &mut inner.buckets,
            id,
            &self.buckets_dir,
            self.value_byte_length,
            &self.sink,
        );
        bucket.push(time, value).await
    }

    /// Inserts a batch of entries, routing each to its bucket and awaiting
    /// all insertions in parallel.
    ///
    /// Entries are sorted by time first so same-bucket insertions arrive
    /// in time order. Every entry reports an outcome: a routing failure
    /// counts like a failed insertion and never aborts the rest of the
    /// batch. A single failing entry surfaces as its own error, several as
    /// `ZektaError::Aggregate`.
    pub async fn insert(&self, mut entries: Vec<Entry>) -> Result<()> {
        entries.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut inner = self.inner.lock().await;

        let jobs: Vec<Result<(Bucket, Entry)>> = entries
            .into_iter()
            .map(|entry| -> Result<(Bucket, Entry)> {
                let id = route(entry.time)?;
                let bucket = get_or_create_bucket(
                    &mut inner.buckets,
                    id,
                    &self.buckets_dir,
                    self.value_byte_length,
                    &self.sink,
                )
                .clone();
                Ok((bucket, entry))
            })
            .collect();

        let results = join_all(jobs.into_iter().map(|job| async move {
            let (bucket, entry) = job?;
            bucket.push(entry.time, &entry.value).await
        }))
        .await;
        settle(results).map(|_| ())
    }

    /// Returns all entries in the requested range and direction.
    ///
    /// Covered buckets are queried in parallel; each clips the range to
    /// its own bounds, so a bucket outside the range contributes nothing
    /// without being loaded.
    pub async fn select(&self, options: SelectOptions) -> Result<Vec<Entry>> {
        let SelectOptions {
            from,
            to,
            ascending,
        } = options;
        let inner = self.inner.lock().await;
        let Some(span) = covered_span(&inner.buckets, from, to) else {
            return Ok(Vec::new());
        };

        let results = if ascending {
            join_all(span.iter().map(|bucket| bucket.select(from, to, true))).await
        } else {
            join_all(
                span.iter()
                    .rev()
                    .map(|bucket| bucket.select(from, to, false)),
            )
            .await
        };
        let parts = settle(results)?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Removes all entries in the inclusive range, across every covered
    /// bucket in parallel.
    pub async fn delete(&self, options: DeleteOptions) -> Result<()> {
        let DeleteOptions { from, to } = options;
        let inner = self.inner.lock().await;
        let Some(span) = covered_span(&inner.buckets, from, to) else {
            return Ok(());
        };

        let results = join_all(span.iter().map(|bucket| bucket.delete(from, to))).await;
        settle(results).map(|_| ())
    }

    /// Removes every entry in the series. Bucket files disappear on the
    /// next flush.
    pub async fn clear(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        let results = join_all(inner.buckets.iter().map(Bucket::clear)).await;
        settle(results).map(|_| ())
    }

    /// Flushes every bucket, optionally unloading their in-memory runs.
    pub async fn flush(&self, unload: bool) -> Result<()> {
        let inner = self.inner.lock().await;
        let results = join_all(inner.buckets.iter().map(|bucket| bucket.flush(unload))).await;
        settle(results).map(|_| ())
    }
}

fn default_error_sink() -> ErrorSink {
    Arc::new(|err| error!("background bucket flush failed: {err}"))
}

/// Collects bucket ids from the bucket directory. A missing directory is
/// an empty series; any file that does not parse as a bucket id fails the
/// open.
async fn list_bucket_ids(buckets_dir: &Path) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    let mut entries = match tokio::fs::read_dir(buckets_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ids),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let id = name
            .to_str()
            .and_then(bucket::parse_bucket_file_name)
            .ok_or_else(|| ZektaError::BadBucketFile(entry.path()))?;
        ids.push(id);
    }
    Ok(ids)
}

/// Maps a timestamp to its bucket id: `floor(time / TIME_RANGE)`.
fn route(time: f64) -> Result<i64> {
    if !time.is_finite() {
        return Err(ZektaError::InvalidTime(time));
    }
    let id = (time / TIME_RANGE).floor();
    if id.abs() > bucket::MAX_SAFE_ID as f64 {
        return Err(ZektaError::InvalidTime(time));
    }
    Ok(id as i64)
}

/// Index at which `id` is, or would be inserted, in the sorted bucket
/// vector.
fn bucket_index(buckets: &[Bucket], id: i64) -> usize {
    search::lower_bound(buckets.len(), |index| buckets[index].id().cmp(&id))
}

fn get_or_create_bucket<'a>(
    buckets: &'a mut Vec<Bucket>,
    id: i64,
    buckets_dir: &Path,
    value_byte_length: usize,
    sink: &ErrorSink,
) -> &'a Bucket {
    let index = bucket_index(buckets, id);
    if index >= buckets.len() || buckets[index].id() != id {
        debug!(bucket = id, "creating bucket");
        let bucket = Bucket::spawn(id, buckets_dir, value_byte_length, sink.clone());
        buckets.insert(index, bucket);
    }
    &buckets[index]
}

/// Slice of buckets whose ids fall inside the inclusive time range.
///
/// The slice may include one trailing bucket past the range; it clips the
/// query to its own bounds and contributes nothing. Infinite bounds
/// saturate to the ends of the vector.
fn covered_span(buckets: &[Bucket], from: f64, to: f64) -> Option<&[Bucket]> {
    let from_id = (from / TIME_RANGE).floor() as i64;
    let to_id = (to / TIME_RANGE).floor() as i64;
    let start = bucket_index(buckets, from_id);
    let end = (bucket_index(buckets, to_id) + 1).min(buckets.len());
    if start >= end {
        None
    } else {
        Some(&buckets[start..end])
    }
}

/// Applies the fan-out failure rule to a batch of settled results:
/// no failures returns the values, exactly one failure re-raises it, and
/// two or more are wrapped in `ZektaError::Aggregate`.
fn settle<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) => failures.push(err),
        }
    }
    if failures.is_empty() {
        Ok(values)
    } else if failures.len() == 1 {
        Err(failures.remove(0))
    } else {
        Err(ZektaError::Aggregate(failures))
    }
}
