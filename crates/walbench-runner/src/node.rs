//! Lifecycle interface shared by primary and replica nodes.

use async_trait::async_trait;

use walbench_core::{BenchResult, NodeRole, NodeState};

use crate::probe::LogPosition;

/// A single database server instance managed for the length of one run.
///
/// Lifecycle: `setup` brings the server up with its workload idle (state
/// stays `SettingUp` until `run`), `run` starts the workload (`Running`),
/// `teardown` stops everything (`TornDown`). A failed `setup` or `run`
/// leaves the node `Failed`; `teardown` must still be called.
#[async_trait]
pub trait ServerNode: Send + Sync {
    /// Unique name within the run, used for logs and process output files.
    fn name(&self) -> &str;

    fn role(&self) -> NodeRole;

    fn state(&self) -> NodeState;

    /// Prepares configuration and starts the server process.
    async fn setup(&mut self) -> BenchResult<()>;

    /// Starts the workload. Returns once it is underway, not once it completes.
    async fn run(&mut self) -> BenchResult<()>;

    /// Waits for the workload started by `run` to finish, bounded by the
    /// node's workload timeout. Nodes without a workload return immediately.
    async fn wait_for_workload(&mut self) -> BenchResult<()>;

    /// Whether the server process is alive.
    async fn is_running(&mut self) -> bool;

    /// Produced log position for a primary, applied position for a replica.
    async fn log_position(&self) -> BenchResult<LogPosition>;

    /// Stops every process and releases handles. Safe to call repeatedly
    /// and from any state; a node that never started anything returns `Ok`.
    async fn teardown(&mut self) -> BenchResult<()>;
}
