//! Integration tests for the series lifecycle:
//! cross-bucket routing, flush/unload, reopen, and config handling.

use proptest::prelude::*;
use tempfile::TempDir;
use zekta::store::config::CONFIG_FILE_NAME;
use zekta::{DeleteOptions, Entry, SelectOptions, Series, SeriesOptions, ZektaError};

fn le16(value: u16) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn times(entries: &[Entry]) -> Vec<f64> {
    entries.iter().map(|entry| entry.time).collect()
}

async fn open(dir: &TempDir, value_byte_length: usize) -> Series {
    Series::open(SeriesOptions::new(dir.path()).with_value_byte_length(value_byte_length))
        .await
        .unwrap()
}

// ============================================================================
// Cross-bucket routing and persistence
// ============================================================================

/// Entries pushed in mixed time order spread across buckets and come back
/// sorted, and each bucket lands in its own file on flush.
#[tokio::test]
async fn test_cross_bucket_write_path() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 2).await;

    for (time, value) in [
        (10.0, 1u16),
        (1.0, 2),
        (2.0, 3),
        (4.0, 4),
        (600.0, 4),
        (601.0, 5),
    ] {
        series.push(time, &le16(value)).await.unwrap();
    }
    series.flush(false).await.unwrap();

    let entries = series
        .select(SelectOptions::default().with_from(0.0).with_to(60_000.0))
        .await
        .unwrap();
    assert_eq!(times(&entries), vec![1.0, 2.0, 4.0, 10.0, 600.0, 601.0]);
    assert_eq!(entries[0].value, le16(2));
    assert_eq!(entries[5].value, le16(5));

    assert_eq!(series.bucket_ids().await, vec![0, 1]);
    let buckets_dir = temp_dir.path().join("buckets");
    assert_eq!(
        std::fs::metadata(buckets_dir.join("0.bucket")).unwrap().len(),
        4 * 10
    );
    assert_eq!(
        std::fs::metadata(buckets_dir.join("1.bucket")).unwrap().len(),
        2 * 10
    );
}

/// Unloading drops the in-memory runs; the next select re-reads the files
/// and sees identical data.
#[tokio::test]
async fn test_flush_unload_reload() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 2).await;

    for time in [10.0, 1.0, 600.0, 601.0] {
        series.push(time, &le16(time as u16)).await.unwrap();
    }
    let before = series.select(SelectOptions::default()).await.unwrap();

    series.flush(true).await.unwrap();
    let after = series.select(SelectOptions::default()).await.unwrap();
    assert_eq!(before, after);
}

/// A reopened series returns exactly what was selectable before the flush.
#[tokio::test]
async fn test_reopen_preserves_entries() {
    let temp_dir = TempDir::new().unwrap();
    let before;
    {
        let series = open(&temp_dir, 2).await;
        for time in [10.0, 1.0, 2.0, 600.0, 1500.0] {
            series.push(time, &le16(time as u16)).await.unwrap();
        }
        before = series.select(SelectOptions::default()).await.unwrap();
        series.flush(false).await.unwrap();
    }

    // Reopen without a value byte length: the config supplies it.
    let series = Series::open(SeriesOptions::new(temp_dir.path()))
        .await
        .unwrap();
    assert_eq!(series.value_byte_length(), 2);
    assert_eq!(series.bucket_ids().await, vec![0, 1, 2]);

    let after = series.select(SelectOptions::default()).await.unwrap();
    assert_eq!(before, after);
}

/// Clearing the series empties every bucket and the next flush removes
/// the files.
#[tokio::test]
async fn test_clear_removes_files_on_flush() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 1).await;

    series.push(5.0, &[1]).await.unwrap();
    series.push(600.0, &[2]).await.unwrap();
    series.flush(false).await.unwrap();

    let buckets_dir = temp_dir.path().join("buckets");
    assert!(buckets_dir.join("0.bucket").exists());
    assert!(buckets_dir.join("1.bucket").exists());

    series.clear().await.unwrap();
    series.flush(false).await.unwrap();
    assert!(!buckets_dir.join("0.bucket").exists());
    assert!(!buckets_dir.join("1.bucket").exists());

    let entries = series.select(SelectOptions::default()).await.unwrap();
    assert!(entries.is_empty());
}

// ============================================================================
// Range semantics
// ============================================================================

/// Both range ends are inclusive, within and across buckets.
#[tokio::test]
async fn test_select_inclusive_endpoints() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 1).await;

    for time in [1.0, 2.0, 3.0, 600.0, 601.0] {
        series.push(time, &[0]).await.unwrap();
    }

    let entries = series
        .select(SelectOptions::default().with_from(2.0).with_to(600.0))
        .await
        .unwrap();
    assert_eq!(times(&entries), vec![2.0, 3.0, 600.0]);
}

/// Descending select returns the exact reverse of ascending for the same
/// range.
#[tokio::test]
async fn test_descending_symmetry() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 1).await;

    for time in [4.0, 1.0, 700.0, 600.0, 1300.0] {
        series.push(time, &[time as u8]).await.unwrap();
    }

    let ascending = series.select(SelectOptions::default()).await.unwrap();
    let descending = series
        .select(SelectOptions::default().descending())
        .await
        .unwrap();
    let mut reversed = ascending;
    reversed.reverse();
    assert_eq!(descending, reversed);
}

/// Entries sharing a timestamp are all selected and all deleted by a
/// point range, even at bucket boundaries.
#[tokio::test]
async fn test_equal_time_boundary_handling() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 1).await;

    for value in [1u8, 2, 3] {
        series.push(512.0, &[value]).await.unwrap();
    }
    series.push(511.9, &[9]).await.unwrap();

    let entries = series
        .select(SelectOptions::default().with_from(512.0).with_to(512.0))
        .await
        .unwrap();
    assert_eq!(entries.len(), 3);
    let mut values: Vec<u8> = entries.iter().map(|entry| entry.value[0]).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3]);

    series
        .delete(DeleteOptions::default().with_from(512.0).with_to(512.0))
        .await
        .unwrap();
    let entries = series.select(SelectOptions::default()).await.unwrap();
    assert_eq!(times(&entries), vec![511.9]);
}

/// Deleting the same range twice leaves the series as after the first
/// delete.
#[tokio::test]
async fn test_delete_idempotence() {
    let temp_dir = TempDir::new().unwrap();
    let series = open(&temp_dir, 1).await;

    for time in [1.0, 5.0, 600.0, 605.0] {
        series.push(time, &[0]).await.unwrap();
    }
    let range = DeleteOptions::default().with_from(5.0).with_to(600.0);
    series.delete(range).await.unwrap();
    let once = series.select(SelectOptions::default()).await.unwrap();

    series.delete(range).await.unwrap();
    let twice = series.select(SelectOptions::default()).await.unwrap();
    assert_eq!(once, twice);
    assert_eq!(times(&twice), vec![1.0, 605.0]);
}

// ============================================================================
// Open and config handling
// ============================================================================

#[tokio::test]
async fn test_reopen_with_mismatched_width_fails() {
    let temp_dir = TempDir::new().unwrap();
    {
        let _series = open(&temp_dir, 4).await;
    }

    let result =
        Series::open(SeriesOptions::new(temp_dir.path()).with_value_byte_length(8)).await;
    assert!(matches!(
        result,
        Err(ZektaError::IncompatibleConfig {
            expected: 4,
            actual: 8
        })
    ));
}

#[tokio::test]
async fn test_open_missing_without_create_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = Series::open(
        SeriesOptions::new(temp_dir.path().join("absent"))
            .with_value_byte_length(4)
            .with_create(false),
    )
    .await;
    assert!(matches!(result, Err(ZektaError::SeriesNotFound(_))));
}

#[tokio::test]
async fn test_create_requires_value_byte_length() {
    let temp_dir = TempDir::new().unwrap();
    let result = Series::open(SeriesOptions::new(temp_dir.path())).await;
    assert!(matches!(result, Err(ZektaError::MissingValueByteLength)));
}

#[tokio::test]
async fn test_unsupported_config_version_fails() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        br#"{"version":7,"valueByteLength":4}"#,
    )
    .unwrap();

    let result = Series::open(SeriesOptions::new(temp_dir.path())).await;
    assert!(matches!(result, Err(ZektaError::UnsupportedVersion(7))));
}

#[tokio::test]
async fn test_foreign_file_in_buckets_dir_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let series = open(&temp_dir, 1).await;
        series.push(1.0, &[1]).await.unwrap();
        series.flush(false).await.unwrap();
    }
    std::fs::write(temp_dir.path().join("buckets/notes.txt"), b"x").unwrap();

    let result = Series::open(SeriesOptions::new(temp_dir.path())).await;
    assert!(matches!(result, Err(ZektaError::BadBucketFile(_))));
}

// ============================================================================
// Push/select round trip over arbitrary workloads
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Pushing entries with distinct timestamps in any order and selecting
    /// the full range returns exactly those entries, sorted by time.
    #[test]
    fn prop_push_select_round_trip(
        raw_times in prop::collection::hash_set(0u32..100_000, 1..40)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let temp_dir = TempDir::new().unwrap();
            let series = open(&temp_dir, 4).await;

            for &raw in &raw_times {
                let time = raw as f64 * 0.5;
                series.push(time, &raw.to_le_bytes()).await.unwrap();
            }

            let entries = series.select(SelectOptions::default()).await.unwrap();
            assert_eq!(entries.len(), raw_times.len());

            let mut expected: Vec<u32> = raw_times.iter().copied().collect();
            expected.sort_unstable();
            for (entry, &raw) in entries.iter().zip(expected.iter()) {
                assert_eq!(entry.time, raw as f64 * 0.5);
                assert_eq!(entry.value, raw.to_le_bytes().to_vec());
            }
        });
    }
}
