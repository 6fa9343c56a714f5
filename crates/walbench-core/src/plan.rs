//! Test plan: what one invocation measures and which nodes it needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::metrics::MetricsFile;
use crate::node::{NodeRole, NodeSpec, PrimarySpec, ReplicaSpec};

/// Which node's log throughput is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// Log records produced by a primary under OLTP load.
    Primary,
    /// Log records applied by a replica replaying captured messages.
    Replica,
}

impl TestType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }

    /// The node role and metrics stream this test type measures.
    #[must_use]
    pub const fn target(&self) -> (NodeRole, MetricsFile) {
        match self {
            Self::Primary => (NodeRole::Primary, MetricsFile::LogSerializer),
            Self::Replica => (NodeRole::Replica, MetricsFile::RecoveryManager),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server build flavour, used to locate the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Debug,
    Release,
    #[cfg_attr(feature = "clap", value(name = "relwithdebinfo"))]
    RelWithDebInfo,
}

impl BuildType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
            Self::RelWithDebInfo => "relwithdebinfo",
        }
    }
}

impl Default for BuildType {
    fn default() -> Self {
        Self::Release
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OLTP benchmark whose load phase generates the write workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OltpBenchmark {
    Ycsb,
    Tpcc,
    Tatp,
}

impl OltpBenchmark {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ycsb => "ycsb",
            Self::Tpcc => "tpcc",
            Self::Tatp => "tatp",
        }
    }
}

impl Default for OltpBenchmark {
    fn default() -> Self {
        Self::Ycsb
    }
}

impl fmt::Display for OltpBenchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ports assigned to the nodes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub primary: u16,
    pub replica: u16,
}

/// Everything one invocation was asked to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub test_type: TestType,
    pub build_type: BuildType,
    /// Only relevant for primary tests.
    pub replication_enabled: bool,
    pub async_commit: bool,
    /// Only relevant for primary tests.
    pub oltp_benchmark: OltpBenchmark,
    /// Only relevant for primary tests.
    pub scale_factor: u32,
    pub connection_threads: u32,
    /// Only relevant for replica tests.
    pub log_messages_file: PathBuf,
    /// Name of the results file inside the results directory.
    pub output_name: String,
}

impl TestPlan {
    /// Default results file name, e.g. `primary-log-throughput-1700000000.csv`.
    #[must_use]
    pub fn default_output_name(test_type: TestType, now: DateTime<Utc>) -> String {
        format!("{}-log-throughput-{}.csv", test_type, now.timestamp())
    }

    /// Resolves the plan into the nodes to launch, in setup order.
    ///
    /// Primary tests launch a primary and, with replication enabled, a replica
    /// fed by that primary. Replica tests launch a single replica replaying
    /// the captured log messages.
    #[must_use]
    pub fn node_specs(&self, ports: PortAssignment) -> Vec<NodeSpec> {
        let mut specs = Vec::new();
        match self.test_type {
            TestType::Primary => {
                specs.push(NodeSpec::Primary(PrimarySpec {
                    build_type: self.build_type,
                    replication_enabled: self.replication_enabled,
                    async_commit: self.async_commit,
                    oltp_benchmark: self.oltp_benchmark,
                    scale_factor: self.scale_factor,
                    connection_threads: self.connection_threads,
                    port: ports.primary,
                }));
                if self.replication_enabled {
                    specs.push(NodeSpec::Replica(ReplicaSpec {
                        build_type: self.build_type,
                        async_commit: self.async_commit,
                        log_messages_file: None,
                        connection_threads: self.connection_threads,
                        port: ports.replica,
                    }));
                }
            }
            TestType::Replica => {
                specs.push(NodeSpec::Replica(ReplicaSpec {
                    build_type: self.build_type,
                    async_commit: self.async_commit,
                    log_messages_file: Some(self.log_messages_file.clone()),
                    connection_threads: self.connection_threads,
                    port: ports.replica,
                }));
            }
        }
        specs
    }
}
