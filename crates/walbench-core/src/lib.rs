//! Core types for the walbench log throughput harness.

pub mod config;
pub mod error;
pub mod metrics;
pub mod metrics_store;
pub mod node;
pub mod plan;
pub mod throughput;

pub use config::WalbenchConfig;
pub use error::{BenchError, BenchResult};
pub use metrics::{read_metrics, MetricsFile, MetricsRecord};
pub use metrics_store::{MetricsLease, MetricsStore};
pub use node::{NodeRole, NodeSpec, NodeState, PrimarySpec, ReplicaSpec};
pub use plan::{BuildType, OltpBenchmark, PortAssignment, TestPlan, TestType};
pub use throughput::{aggregate, aggregate_file, ThroughputResult};
