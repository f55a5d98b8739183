//! Deletes the objects of a run in batches.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use yansi::Paint;

use crate::error::Result;
use crate::executor::object_key;
use crate::storage::{MAX_DELETE_BATCH, Storage};

/// The outcome of a cleanup.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CleanupSummary {
    /// Keys that were scheduled for deletion.
    pub requested: u64,
    /// Keys in batches that succeeded.
    pub deleted: u64,
    /// Batched delete calls issued.
    pub batches: u64,
    /// Batched delete calls that failed.
    pub failed_batches: u64,
    /// Wall-clock time of the cleanup.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Deletes the keys `{prefix}0` to `{prefix}{count - 1}` in batches of at most
/// [`MAX_DELETE_BATCH`].
///
/// A failed batch is logged and skipped. Its keys are not counted as deleted.
pub async fn cleanup(
    storage: &dyn Storage,
    bucket: &str,
    prefix: &str,
    count: u64,
    verbose: bool,
) -> Result<CleanupSummary> {
    let start = Instant::now();
    let mut summary = CleanupSummary {
        requested: count,
        ..Default::default()
    };

    println!("Cleaning up {count} objects...");
    let bar = if verbose {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(count)
            .with_message("Deleting objects...")
            .with_style(ProgressStyle::with_template("{msg}\n{wide_bar} {pos}/{len}")?);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };

    let mut first = 0;
    while first < count {
        let last = count.min(first + MAX_DELETE_BATCH as u64) - 1;
        let keys: Vec<_> = (first..=last).map(|index| object_key(prefix, index)).collect();
        summary.batches += 1;

        match storage.delete_many(bucket, &keys).await {
            Ok(()) => {
                summary.deleted += keys.len() as u64;
                if verbose {
                    println!(
                        "Deleting a batch of {} objects in range {{{first}, {last}}}... Succeeded",
                        keys.len()
                    );
                }
            }
            Err(error) => {
                summary.failed_batches += 1;
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    first,
                    last,
                    "failed to delete batch"
                );
                if verbose {
                    println!(
                        "Deleting a batch of {} objects in range {{{first}, {last}}}... Failed ({error})",
                        keys.len()
                    );
                }
            }
        }

        bar.inc(keys.len() as u64);
        first = last + 1;
    }

    bar.finish_and_clear();
    summary.duration = start.elapsed();

    let deleted = if summary.deleted == count {
        summary.deleted.green().to_string()
    } else {
        summary.deleted.red().to_string()
    };
    println!(
        "Successfully deleted {deleted}/{count} objects in {:?}",
        summary.duration
    );

    Ok(summary)
}
