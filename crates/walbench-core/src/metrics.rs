//! Metrics artifacts written by server processes.
//!
//! A running server appends one CSV row per sampling interval to a metrics
//! file in its working directory. Only the three columns below are read;
//! anything else in the file is ignored.

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;

use crate::error::{BenchError, BenchResult};

/// Column holding the sample start time (µs).
pub const START_TIME_COLUMN: &str = "start_time";
/// Column holding the sample duration (µs).
pub const ELAPSED_TIME_COLUMN: &str = "elapsed_us";
/// Column holding the number of log records handled in the sample.
pub const NUM_RECORDS_COLUMN: &str = "num_records";

/// One timestamped metrics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Sample start, microseconds.
    pub start_time: u64,
    /// Sample length, microseconds.
    pub elapsed_time: u64,
    /// Log records produced or applied during the sample.
    pub num_records: u64,
}

impl MetricsRecord {
    #[must_use]
    pub const fn new(start_time: u64, elapsed_time: u64, num_records: u64) -> Self {
        Self {
            start_time,
            elapsed_time,
            num_records,
        }
    }

    /// End of the sample window, microseconds. Saturates at `u64::MAX`.
    #[must_use]
    pub const fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.elapsed_time)
    }
}

/// Raw metrics streams a server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsFile {
    /// Log records serialized by the write-ahead log (primary side).
    LogSerializer,
    /// Log records applied during recovery/replication (replica side).
    RecoveryManager,
}

impl MetricsFile {
    /// Every stream the harness knows about.
    pub const ALL: [MetricsFile; 2] = [MetricsFile::LogSerializer, MetricsFile::RecoveryManager];

    /// File name the server writes this stream to.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::LogSerializer => "log_serializer.csv",
            Self::RecoveryManager => "recovery_manager.csv",
        }
    }
}

impl fmt::Display for MetricsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Reads every sample from a metrics CSV file, in file order.
pub fn read_metrics(path: &Path) -> BenchResult<Vec<MetricsRecord>> {
    if !path.exists() {
        return Err(BenchError::MetricsFileMissing(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| BenchError::MissingColumn(name.to_string()))
    };
    let start_idx = column(START_TIME_COLUMN)?;
    let elapsed_idx = column(ELAPSED_TIME_COLUMN)?;
    let records_idx = column(NUM_RECORDS_COLUMN)?;

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = result?;
        let field = |idx: usize, name: &str| -> BenchResult<u64> {
            let raw = row.get(idx).ok_or_else(|| BenchError::InvalidRecord {
                row: i + 1,
                message: format!("missing `{name}`"),
            })?;
            raw.trim().parse::<u64>().map_err(|e| BenchError::InvalidRecord {
                row: i + 1,
                message: format!("`{name}` = {raw:?}: {e}"),
            })
        };
        records.push(MetricsRecord {
            start_time: field(start_idx, START_TIME_COLUMN)?,
            elapsed_time: field(elapsed_idx, ELAPSED_TIME_COLUMN)?,
            num_records: field(records_idx, NUM_RECORDS_COLUMN)?,
        });
    }

    Ok(records)
}
