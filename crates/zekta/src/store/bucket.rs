//! Time buckets: one sorted run of fixed-size records per on-disk file.
//!
//! A bucket with id `b` accepts timestamps in `[b * TIME_RANGE,
//! (b + 1) * TIME_RANGE)` and stores them as consecutive
//! `(f64 time, value bytes)` records, little-endian, sorted by time. The
//! run lives in a [`GrowableBuffer`] that is loaded lazily from
//! `<id>.bucket` and written back whole on flush.
//!
//! Every operation is serialised by a dedicated worker task, so operations
//! issued on the same bucket complete in submission order and a failed
//! operation never stalls the ones queued behind it. While the run is
//! loaded the worker also drives two idle timers: a flush of dirty data
//! after [`AUTO_FLUSH_DELAY`] and a write-back-and-unload after
//! [`AUTO_UNLOAD_DELAY`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, ZektaError};
use crate::store::buffer::GrowableBuffer;
use crate::store::search;
use crate::store::{Entry, ErrorSink, TIME_BYTES, TIME_RANGE};

/// Idle delay before a loaded bucket persists dirty data.
pub const AUTO_FLUSH_DELAY: Duration = Duration::from_millis(1000);

/// Idle delay before a loaded bucket is written back and unloaded.
pub const AUTO_UNLOAD_DELAY: Duration = Duration::from_millis(5000);

/// Extension of bucket files inside the series' `buckets` directory.
pub const BUCKET_EXTENSION: &str = "bucket";

/// Largest bucket id magnitude that survives an exact round trip through
/// `f64` routing arithmetic.
pub(crate) const MAX_SAFE_ID: i64 = (1 << 53) - 1;

/// Builds the file name for a bucket id, e.g. `-3.bucket`.
pub fn bucket_file_name(id: i64) -> String {
    format!("{id}.{BUCKET_EXTENSION}")
}

/// Parses a bucket file name back into its id.
///
/// Only canonical decimal stems are accepted: `07.bucket` or `5.tmp` is
/// rejected, as is any id outside the routable range.
pub fn parse_bucket_file_name(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".bucket")?;
    let id: i64 = stem.parse().ok()?;
    if id.to_string() != stem {
        return None;
    }
    if !(-MAX_SAFE_ID..=MAX_SAFE_ID).contains(&id) {
        return None;
    }
    Some(id)
}

enum Command {
    Push {
        time: f64,
        value: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Insert {
        entries: Vec<Entry>,
        reply: oneshot::Sender<Result<()>>,
    },
    Select {
        from: f64,
        to: f64,
        ascending: bool,
        reply: oneshot::Sender<Result<Vec<Entry>>>,
    },
    Delete {
        from: f64,
        to: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear {
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        unload: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to one time bucket.
///
/// Handles are cheap to clone; all clones feed the same worker task. The
/// worker exits once every handle is dropped, flushing dirty data on the
/// way out on a best-effort basis.
///
/// Must be created inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct Bucket {
    id: i64,
    tx: mpsc::UnboundedSender<Command>,
}

impl Bucket {
    /// Spawns the worker task for bucket `id` under `buckets_dir`.
    pub fn spawn(
        id: i64,
        buckets_dir: impl AsRef<Path>,
        value_byte_length: usize,
        sink: ErrorSink,
    ) -> Bucket {
        Self::spawn_with_delays(
            id,
            buckets_dir,
            value_byte_length,
            sink,
            AUTO_FLUSH_DELAY,
            AUTO_UNLOAD_DELAY,
        )
    }

    fn spawn_with_delays(
        id: i64,
        buckets_dir: impl AsRef<Path>,
        value_byte_length: usize,
        sink: ErrorSink,
        flush_delay: Duration,
        unload_delay: Duration,
    ) -> Bucket {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            id,
            path: buckets_dir.as_ref().join(bucket_file_name(id)),
            value_byte_length,
            data: None,
            dirty: false,
            sink,
            flush_delay,
            unload_delay,
        };
        tokio::spawn(worker.run(rx));
        Bucket { id, tx }
    }

    /// Returns the bucket id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the first timestamp this bucket accepts (inclusive).
    pub fn start_time(&self) -> f64 {
        self.id as f64 * TIME_RANGE
    }

    /// Returns the first timestamp past this bucket's range (exclusive).
    pub fn end_time(&self) -> f64 {
        (self.id + 1) as f64 * TIME_RANGE
    }

    /// Inserts one entry, keeping the run sorted by time.
    ///
    /// # Errors
    ///
    /// Returns `ZektaError::OutOfRange` if `time` falls outside the bucket
    /// range and `ZektaError::BadValueLength` if the value width does not
    /// match the series.
    pub async fn push(&self, time: f64, value: &[u8]) -> Result<()> {
        let value = value.to_vec();
        self.request(|reply| Command::Push { time, value, reply })
            .await
    }

    /// Inserts a batch of entries, each validated like [`Bucket::push`].
    ///
    /// Entries are sorted by time before insertion; on the first failing
    /// entry the batch stops, leaving earlier entries inserted.
    pub async fn insert(&self, entries: Vec<Entry>) -> Result<()> {
        self.request(|reply| Command::Insert { entries, reply })
            .await
    }

    /// Returns entries with `from <= time <= to`, both ends inclusive, in
    /// the requested direction.
    ///
    /// A range that misses the bucket entirely returns an empty result
    /// without touching the file.
    pub async fn select(&self, from: f64, to: f64, ascending: bool) -> Result<Vec<Entry>> {
        self.request(|reply| Command::Select {
            from,
            to,
            ascending,
            reply,
        })
        .await
    }

    /// Removes entries with `from <= time <= to`, both ends inclusive.
    pub async fn delete(&self, from: f64, to: f64) -> Result<()> {
        self.request(|reply| Command::Delete { from, to, reply })
            .await
    }

    /// Removes every entry. The file is deleted on the next flush.
    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Persists dirty data: writes the run to the bucket file, or removes
    /// the file when the run is empty. With `unload` the in-memory run is
    /// released afterwards and the next operation re-reads the file.
    pub async fn flush(&self, unload: bool) -> Result<()> {
        self.request(|reply| Command::Flush { unload, reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .map_err(|_| ZektaError::TaskStopped)?;
        reply_rx.await.map_err(|_| ZektaError::TaskStopped)?
    }
}

struct Worker {
    id: i64,
    path: PathBuf,
    value_byte_length: usize,
    data: Option<GrowableBuffer>,
    dirty: bool,
    sink: ErrorSink,
    flush_delay: Duration,
    unload_delay: Duration,
}

/// Resolves when the deadline passes; pends forever when there is none.
async fn idle_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut flush_at: Option<Instant> = None;
        let mut unload_at: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                    if self.data.is_some() {
                        let now = Instant::now();
                        flush_at = Some(now + self.flush_delay);
                        unload_at = Some(now + self.unload_delay);
                    } else {
                        flush_at = None;
                        unload_at = None;
                    }
                }
                _ = idle_until(flush_at), if flush_at.is_some() => {
                    if let Err(err) = self.flush(false).await {
                        (self.sink)(&err);
                    }
                    // The unload deadline keeps measuring idleness from the
                    // last caller-issued operation.
                    flush_at = Some(Instant::now() + self.flush_delay);
                }
                _ = idle_until(unload_at), if unload_at.is_some() => {
                    if let Err(err) = self.flush(true).await {
                        (self.sink)(&err);
                    }
                    if self.data.is_none() {
                        flush_at = None;
                        unload_at = None;
                    } else {
                        unload_at = Some(Instant::now() + self.unload_delay);
                    }
                }
            }
        }
        // All handles gone: write back whatever is still dirty.
        if self.dirty {
            if let Err(err) = self.flush(false).await {
                (self.sink)(&err);
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Push { time, value, reply } => {
                let _ = reply.send(self.push(time, &value).await);
            }
            Command::Insert { entries, reply } => {
                let _ = reply.send(self.insert(entries).await);
            }
            Command::Select {
                from,
                to,
                ascending,
                reply,
            } => {
                let _ = reply.send(self.select(from, to, ascending).await);
            }
            Command::Delete { from, to, reply } => {
                let _ = reply.send(self.delete(from, to).await);
            }
            Command::Clear { reply } => {
                let _ = reply.send(self.clear().await);
            }
            Command::Flush { unload, reply } => {
                let _ = reply.send(self.flush(unload).await);
            }
        }
    }

    fn record_size(&self) -> usize {
        TIME_BYTES + self.value_byte_length
    }

    fn start_time(&self) -> f64 {
        self.id as f64 * TIME_RANGE
    }

    fn end_time(&self) -> f64 {
        (self.id + 1) as f64 * TIME_RANGE
    }

    fn check_time(&self, time: f64) -> Result<()> {
        if time >= self.start_time() && time < self.end_time() {
            Ok(())
        } else {
            Err(ZektaError::OutOfRange {
                time,
                from: self.start_time(),
                to: self.end_time(),
            })
        }
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() == self.value_byte_length {
            Ok(())
        } else {
            Err(ZektaError::BadValueLength {
                expected: self.value_byte_length,
                actual: value.len(),
            })
        }
    }

    /// Reads the bucket file into memory unless it is already loaded.
    /// A missing file loads as an empty run.
    async fn load(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        if bytes.len() % self.record_size() != 0 {
            return Err(ZektaError::CorruptBucketFile {
                path: self.path.clone(),
                len: bytes.len() as u64,
            });
        }
        debug!(bucket = self.id, bytes = bytes.len(), "loaded bucket");
        self.data = Some(GrowableBuffer::from_vec(bytes)?);
        Ok(())
    }

    async fn push(&mut self, time: f64, value: &[u8]) -> Result<()> {
        self.check_time(time)?;
        self.check_value(value)?;
        self.load().await?;
        let record_size = self.record_size();
        let data = self.data.get_or_insert_with(GrowableBuffer::new);
        let offset = insertion_offset(data, record_size, time);
        insert_record(data, record_size, offset, time, value)?;
        self.dirty = true;
        Ok(())
    }

    async fn insert(&mut self, mut entries: Vec<Entry>) -> Result<()> {
        entries.sort_by(|a, b| a.time.total_cmp(&b.time));
        for entry in entries {
            self.push(entry.time, &entry.value).await?;
        }
        Ok(())
    }

    async fn select(&mut self, from: f64, to: f64, ascending: bool) -> Result<Vec<Entry>> {
        if !self.overlaps(from, to) {
            return Ok(Vec::new());
        }
        self.load().await?;
        let record_size = self.record_size();
        let data = self.data.get_or_insert_with(GrowableBuffer::new);
        let start = range_start_offset(data, record_size, from);
        let end = range_end_offset(data, record_size, to);
        if end <= start {
            return Ok(Vec::new());
        }

        let bytes = data.as_slice();
        let mut entries = Vec::with_capacity((end - start) / record_size);
        let mut offset = start;
        while offset < end {
            entries.push(Entry {
                time: time_at_offset(bytes, offset),
                value: bytes[offset + TIME_BYTES..offset + record_size].to_vec(),
            });
            offset += record_size;
        }
        if !ascending {
            entries.reverse();
        }
        Ok(entries)
    }

    async fn delete(&mut self, from: f64, to: f64) -> Result<()> {
        if !self.overlaps(from, to) {
            return Ok(());
        }
        self.load().await?;
        let record_size = self.record_size();
        let data = self.data.get_or_insert_with(GrowableBuffer::new);
        let start = range_start_offset(data, record_size, from);
        let end = range_end_offset(data, record_size, to);
        if end > start {
            let len = data.len();
            data.as_mut_slice().copy_within(end..len, start);
            data.resize(len - (end - start))?;
            self.dirty = true;
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.load().await?;
        let data = self.data.get_or_insert_with(GrowableBuffer::new);
        if !data.is_empty() {
            data.resize(0)?;
            self.dirty = true;
        }
        Ok(())
    }

    async fn flush(&mut self, unload: bool) -> Result<()> {
        if self.dirty {
            let data = match self.data.as_ref() {
                Some(data) => data,
                None => return Ok(()),
            };
            if data.is_empty() {
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            } else {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let tmp = self.path.with_extension("bucket.tmp");
                tokio::fs::write(&tmp, data.as_slice()).await?;
                tokio::fs::rename(&tmp, &self.path).await?;
            }
            debug!(bucket = self.id, bytes = data.len(), "flushed bucket");
            self.dirty = false;
        }
        if unload && self.data.take().is_some() {
            debug!(bucket = self.id, "unloaded bucket");
        }
        Ok(())
    }

    /// True when the inclusive query range `[from, to]` can contain any
    /// timestamp this bucket accepts.
    fn overlaps(&self, from: f64, to: f64) -> bool {
        !(to < self.start_time() || from >= self.end_time() || to < from)
    }
}

fn time_at_offset(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; TIME_BYTES];
    raw.copy_from_slice(&bytes[offset..offset + TIME_BYTES]);
    f64::from_le_bytes(raw)
}

fn time_at(data: &GrowableBuffer, record_size: usize, index: usize) -> f64 {
    time_at_offset(data.as_slice(), index * record_size)
}

/// Byte offset at which a record with timestamp `time` keeps the run
/// sorted. Appends and prepends are resolved without a search; otherwise
/// the comparator search may land anywhere inside a run of equal times.
fn insertion_offset(data: &GrowableBuffer, record_size: usize, time: f64) -> usize {
    let count = data.len() / record_size;
    if count == 0 {
        return 0;
    }
    if time >= time_at(data, record_size, count - 1) {
        return data.len();
    }
    if time <= time_at(data, record_size, 0) {
        return 0;
    }
    search::lower_bound(count, |index| {
        time_at(data, record_size, index).total_cmp(&time)
    }) * record_size
}

/// Offset of the first record with `time >= from`. The backward walk pulls
/// the offset to the left edge of an equal-time run, which the search
/// alone does not guarantee.
fn range_start_offset(data: &GrowableBuffer, record_size: usize, from: f64) -> usize {
    let mut offset = insertion_offset(data, record_size, from);
    while offset >= record_size && time_at(data, record_size, offset / record_size - 1) == from {
        offset -= record_size;
    }
    offset
}

/// Offset just past the last record with `time <= to`. The forward walk
/// skips the remainder of an equal-time run.
fn range_end_offset(data: &GrowableBuffer, record_size: usize, to: f64) -> usize {
    let mut offset = insertion_offset(data, record_size, to);
    while offset < data.len() && time_at(data, record_size, offset / record_size) == to {
        offset += record_size;
    }
    offset
}

fn insert_record(
    data: &mut GrowableBuffer,
    record_size: usize,
    offset: usize,
    time: f64,
    value: &[u8],
) -> Result<()> {
    let old_len = data.len();
    data.resize(old_len + record_size)?;
    let bytes = data.as_mut_slice();
    bytes.copy_within(offset..old_len, offset + record_size);
    bytes[offset..offset + TIME_BYTES].copy_from_slice(&time.to_le_bytes());
    bytes[offset + TIME_BYTES..offset + record_size].copy_from_slice(value);
    Ok(())
}
