//! Fixed-width value codecs and the typed series wrapper built on them.
//!
//! The storage engine only sees opaque byte values of one fixed width per
//! series. A [`ValueCodec`] maps a typed value onto exactly that many
//! bytes, and [`TypedSeries`] wraps a [`Series`] so callers read and write
//! typed values directly.

use std::marker::PhantomData;

use crate::error::{Result, ZektaError};
use crate::store::{DeleteOptions, Entry, SelectOptions, Series, SeriesOptions};

/// Maps values of one type onto fixed-width byte payloads.
pub trait ValueCodec {
    /// The decoded value type.
    type Value;

    /// Encoded width in bytes; every payload is exactly this long.
    const WIDTH: usize;

    /// Encodes `value` into `buf`, which is exactly [`Self::WIDTH`] bytes.
    fn encode(value: &Self::Value, buf: &mut [u8]) -> Result<()>;

    /// Decodes a payload of exactly [`Self::WIDTH`] bytes.
    fn decode(buf: &[u8]) -> Result<Self::Value>;
}

/// Little-endian `f64` values.
#[derive(Debug, Clone, Copy)]
pub struct F64Codec;

impl ValueCodec for F64Codec {
    type Value = f64;
    const WIDTH: usize = 8;

    fn encode(value: &f64, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<f64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(buf);
        Ok(f64::from_le_bytes(raw))
    }
}

/// Little-endian `i64` values.
#[derive(Debug, Clone, Copy)]
pub struct I64Codec;

impl ValueCodec for I64Codec {
    type Value = i64;
    const WIDTH: usize = 8;

    fn encode(value: &i64, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(buf);
        Ok(i64::from_le_bytes(raw))
    }
}

/// UTF-8 text padded with NUL bytes to a fixed width of `N` bytes.
///
/// Text longer than `N` bytes is rejected rather than truncated, and text
/// containing NUL cannot round-trip, so it is rejected too.
#[derive(Debug, Clone, Copy)]
pub struct Utf8Codec<const N: usize>;

impl<const N: usize> ValueCodec for Utf8Codec<N> {
    type Value = String;
    const WIDTH: usize = N;

    fn encode(value: &String, buf: &mut [u8]) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() > N {
            return Err(ZektaError::BadValueLength {
                expected: N,
                actual: bytes.len(),
            });
        }
        if bytes.contains(&0) {
            return Err(ZektaError::BadValue(
                "text values must not contain NUL".to_string(),
            ));
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()..].fill(0);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<String> {
        let end = buf
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(buf.len());
        let text = std::str::from_utf8(&buf[..end])
            .map_err(|err| ZektaError::BadValue(err.to_string()))?;
        Ok(text.to_string())
    }
}

/// A [`Series`] that stores values of a codec's type instead of raw bytes.
pub struct TypedSeries<C: ValueCodec> {
    series: Series,
    _codec: PhantomData<C>,
}

impl<C: ValueCodec> TypedSeries<C> {
    /// Opens a series whose value byte length is the codec's width.
    ///
    /// Any value byte length already set on `options` is replaced.
    pub async fn open(options: SeriesOptions) -> Result<Self> {
        let series = Series::open(options.with_value_byte_length(C::WIDTH)).await?;
        Ok(Self {
            series,
            _codec: PhantomData,
        })
    }

    /// Wraps an already-open series. The series must store values of the
    /// codec's width.
    pub fn from_series(series: Series) -> Result<Self> {
        if series.value_byte_length() != C::WIDTH {
            return Err(ZektaError::IncompatibleConfig {
                expected: series.value_byte_length(),
                actual: C::WIDTH,
            });
        }
        Ok(Self {
            series,
            _codec: PhantomData,
        })
    }

    /// Returns the underlying byte-valued series.
    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Inserts one value at `time`.
    pub async fn push(&self, time: f64, value: &C::Value) -> Result<()> {
        self.series.push(time, &encode::<C>(value)?).await
    }

    /// Inserts a batch of `(time, value)` pairs.
    pub async fn insert(&self, values: Vec<(f64, C::Value)>) -> Result<()> {
        let mut entries = Vec::with_capacity(values.len());
        for (time, value) in &values {
            entries.push(Entry::new(*time, encode::<C>(value)?));
        }
        self.series.insert(entries).await
    }

    /// Returns decoded `(time, value)` pairs in the requested range and
    /// direction.
    pub async fn select(&self, options: SelectOptions) -> Result<Vec<(f64, C::Value)>> {
        let entries = self.series.select(options).await?;
        let mut values = Vec::with_capacity(entries.len());
        for entry in entries {
            values.push((entry.time, C::decode(&entry.value)?));
        }
        Ok(values)
    }

    /// Removes all entries in the inclusive range.
    pub async fn delete(&self, options: DeleteOptions) -> Result<()> {
        self.series.delete(options).await
    }

    /// Removes every entry in the series.
    pub async fn clear(&self) -> Result<()> {
        self.series.clear().await
    }

    /// Flushes every bucket, optionally unloading in-memory data.
    pub async fn flush(&self, unload: bool) -> Result<()> {
        self.series.flush(unload).await
    }
}

fn encode<C: ValueCodec>(value: &C::Value) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; C::WIDTH];
    C::encode(value, &mut buf)?;
    Ok(buf)
}
