use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Canonical error type for benchmark orchestration.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A node could not be prepared or started.
    #[error("setup of node `{node}` failed: {message}")]
    Setup {
        /// Name of the node that failed.
        node: String,
        /// Human-readable failure details.
        message: String,
    },

    /// More than one primary node was requested for a single run.
    #[error("found {count} primary nodes, at most one may run at a time")]
    MultiplePrimaries {
        /// Number of primaries present.
        count: usize,
    },

    /// Replicas did not catch up with the primary in time.
    #[error("replicas did not catch up within {waited:?} ({})", describe_lag(.last_lag))]
    SyncTimeout {
        /// Time spent waiting.
        waited: Duration,
        /// Largest lag seen at the last successful poll, if any poll succeeded.
        last_lag: Option<u64>,
    },

    /// Too few samples to compute a throughput figure.
    #[error("not enough data to calculate throughput ({records} records)")]
    InsufficientData {
        /// Number of usable records found.
        records: usize,
    },

    /// A node operation was attempted from the wrong lifecycle state.
    #[error("node `{node}` cannot {action} while {state}")]
    InvalidState {
        /// Name of the node.
        node: String,
        /// Attempted action.
        action: &'static str,
        /// Current state, rendered.
        state: String,
    },

    /// Reading a node's log position failed.
    #[error("log position probe failed: {0}")]
    Probe(String),

    /// An external workload process failed or timed out.
    #[error("workload on node `{node}` failed: {message}")]
    Workload {
        /// Name of the node running the workload.
        node: String,
        /// Human-readable failure details.
        message: String,
    },

    /// The metrics directory is held by another invocation.
    #[error("metrics directory is locked by another run: {}", .0.display())]
    MetricsLocked(PathBuf),

    /// The relevant metrics file was not produced.
    #[error("metrics file not found: {}", .0.display())]
    MetricsFileMissing(PathBuf),

    /// A required column is absent from a metrics file header.
    #[error("column `{0}` not found in metrics file")]
    MissingColumn(String),

    /// A metrics field could not be parsed.
    #[error("invalid metrics row {row}: {message}")]
    InvalidRecord {
        /// One-based data row number.
        row: usize,
        /// Parse failure details.
        message: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// CSV reader error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during file or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Creates a `Setup` variant.
    #[must_use]
    pub fn setup(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a `Workload` variant.
    #[must_use]
    pub fn workload(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workload {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a `Probe` variant.
    #[must_use]
    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe(message.into())
    }

    /// Whether this error aborts the invocation without producing a result.
    ///
    /// Sync timeouts and missing data degrade the result instead.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::SyncTimeout { .. } | Self::InsufficientData { .. }
        )
    }
}

fn describe_lag(lag: &Option<u64>) -> String {
    match lag {
        Some(lag) => format!("last lag {lag} log records"),
        None => "no successful position reads".to_string(),
    }
}

/// Convenient result alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;
