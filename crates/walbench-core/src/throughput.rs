//! Windowed average log throughput over a metrics time series.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BenchError, BenchResult};
use crate::metrics::{read_metrics, MetricsRecord};

/// Average throughput computed from one metrics file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
    /// Log records per millisecond.
    pub records_per_ms: f64,
    /// Samples that contributed (the discarded warm-up sample excluded).
    pub sample_count: usize,
    /// Records summed over the contributing samples.
    pub total_records: u64,
    /// Length of the measurement window, microseconds.
    pub total_time_us: u64,
}

/// Computes average throughput over a time-ordered sample sequence.
///
/// The first sample covers idle time before load began and is always
/// dropped. The remaining samples must come from one uninterrupted run with
/// non-decreasing start times.
pub fn aggregate(records: &[MetricsRecord]) -> BenchResult<ThroughputResult> {
    if records.len() < 2 {
        return Err(BenchError::InsufficientData {
            records: records.len(),
        });
    }

    let window = &records[1..];
    let (first, last) = match (window.first(), window.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(BenchError::InsufficientData { records: 0 }),
    };

    let total_time_us = last.end_time().saturating_sub(first.start_time);
    if total_time_us == 0 {
        return Err(BenchError::InsufficientData {
            records: window.len(),
        });
    }

    let total_records = window
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.num_records));

    // Microseconds to milliseconds
    let records_per_ms = (total_records as f64 / total_time_us as f64) * 1000.0;

    Ok(ThroughputResult {
        records_per_ms,
        sample_count: window.len(),
        total_records,
        total_time_us,
    })
}

/// Reads a metrics CSV file and aggregates it.
pub fn aggregate_file(path: &Path) -> BenchResult<ThroughputResult> {
    let records = read_metrics(path)?;
    aggregate(&records)
}
