use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::plan::{BuildType, OltpBenchmark};

/// Role a server node plays in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Generates new log records from live workload traffic.
    Primary,
    /// Applies a stream of shipped log records.
    Replica,
}

impl NodeRole {
    /// Returns the canonical lowercase name, also used for node directories.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }

    /// Every role, primary first.
    pub const ALL: [NodeRole; 2] = [NodeRole::Primary, NodeRole::Replica];
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a server node.
///
/// Nodes move strictly forward through
/// `Created -> SettingUp -> Running -> TornDown`. `Failed` is reachable from
/// `SettingUp` or `Running` and must be followed by a teardown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Node exists but nothing has been started.
    Created,
    /// Server process is being spawned and awaited.
    SettingUp,
    /// Server is up; the workload may be active.
    Running,
    /// Processes stopped and handles released.
    TornDown,
    /// Setup or run failed; teardown still pending or attempted.
    Failed,
}

impl NodeState {
    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::SettingUp => "setting_up",
            Self::Running => "running",
            Self::TornDown => "torn_down",
            Self::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    #[must_use]
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Created, SettingUp)
                | (SettingUp, Running)
                | (SettingUp, Failed)
                | (Running, Failed)
                | (Created, TornDown)
                | (SettingUp, TornDown)
                | (Running, TornDown)
                | (Failed, TornDown)
        )
    }

    /// Whether a process may still be alive in this state.
    #[must_use]
    pub fn may_hold_process(&self) -> bool {
        matches!(self, Self::SettingUp | Self::Running | Self::Failed)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary-specific node parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimarySpec {
    /// Server build to launch.
    pub build_type: BuildType,
    /// Whether the primary ships its log to a replica.
    pub replication_enabled: bool,
    /// Whether commits are acknowledged before the log is durable.
    pub async_commit: bool,
    /// OLTP benchmark whose load phase drives the writes.
    pub oltp_benchmark: OltpBenchmark,
    /// Benchmark scale factor.
    pub scale_factor: u32,
    /// Server connection thread count.
    pub connection_threads: u32,
    /// Client port the server listens on.
    pub port: u16,
}

/// Replica-specific node parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSpec {
    /// Server build to launch.
    pub build_type: BuildType,
    /// Whether commits are acknowledged before the log is durable.
    pub async_commit: bool,
    /// Captured log-record messages to replay. `None` when a live primary
    /// ships the log instead.
    pub log_messages_file: Option<PathBuf>,
    /// Server connection thread count.
    pub connection_threads: u32,
    /// Client port the server listens on.
    pub port: u16,
}

/// A node to launch, tagged by role with its role-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum NodeSpec {
    /// Write-generating node.
    Primary(PrimarySpec),
    /// Log-applying node.
    Replica(ReplicaSpec),
}

impl NodeSpec {
    /// Role of this node.
    #[must_use]
    pub fn role(&self) -> NodeRole {
        match self {
            Self::Primary(_) => NodeRole::Primary,
            Self::Replica(_) => NodeRole::Replica,
        }
    }

    /// Server build shared by both roles.
    #[must_use]
    pub fn build_type(&self) -> BuildType {
        match self {
            Self::Primary(spec) => spec.build_type,
            Self::Replica(spec) => spec.build_type,
        }
    }

    /// Client port of the node.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::Primary(spec) => spec.port,
            Self::Replica(spec) => spec.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(NodeState::Created.can_transition_to(NodeState::SettingUp));
        assert!(NodeState::SettingUp.can_transition_to(NodeState::Running));
        assert!(NodeState::Running.can_transition_to(NodeState::TornDown));
        assert!(NodeState::SettingUp.can_transition_to(NodeState::Failed));
        assert!(NodeState::Running.can_transition_to(NodeState::Failed));
        assert!(NodeState::Failed.can_transition_to(NodeState::TornDown));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!NodeState::Running.can_transition_to(NodeState::SettingUp));
        assert!(!NodeState::TornDown.can_transition_to(NodeState::Running));
        assert!(!NodeState::Created.can_transition_to(NodeState::Failed));
        assert!(!NodeState::Failed.can_transition_to(NodeState::Running));
    }

    #[test]
    fn test_role_names_match_directories() {
        let names: Vec<_> = NodeRole::ALL.iter().map(NodeRole::as_str).collect();
        assert_eq!(names, vec!["primary", "replica"]);
    }
}
