//! Waiting for replicas to apply everything the primary produced.

use futures::future::try_join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use walbench_core::config::SyncConfig;
use walbench_core::{BenchError, BenchResult, NodeRole};

use crate::node::ServerNode;
use crate::probe::LogPosition;

/// Outcome of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReport {
    /// No primary or no replica; nothing to wait for.
    NotNeeded,
    /// Every replica reached the primary's position.
    CaughtUp { waited: Duration, polls: u32 },
}

/// Polls log positions until every replica has caught up with the primary.
#[derive(Debug, Clone, Copy)]
pub struct SyncCoordinator {
    poll_interval: Duration,
    timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.poll_interval(), config.timeout())
    }

    /// Blocks until every replica's applied position reaches the primary's
    /// produced position, or the timeout elapses.
    ///
    /// Fails with `MultiplePrimaries` before probing anything if more than one
    /// primary is present. A probe error counts as "not caught up yet".
    pub async fn wait_for_replicas(&self, nodes: &[Box<dyn ServerNode>]) -> BenchResult<SyncReport> {
        let mut primaries = Vec::new();
        let mut replicas = Vec::new();
        for node in nodes {
            match node.role() {
                NodeRole::Primary => primaries.push(&**node),
                NodeRole::Replica => replicas.push(&**node),
            }
        }

        if primaries.len() > 1 {
            return Err(BenchError::MultiplePrimaries {
                count: primaries.len(),
            });
        }
        let Some(primary) = primaries.first().copied() else {
            debug!("no primary, skipping replica sync");
            return Ok(SyncReport::NotNeeded);
        };
        if replicas.is_empty() {
            debug!("no replicas, skipping replica sync");
            return Ok(SyncReport::NotNeeded);
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut polls = 0u32;
        let mut last_lag = None;

        loop {
            polls += 1;
            match poll_lag(primary, &replicas).await {
                Ok(lag) => {
                    debug!(lag, polls, "replica lag");
                    if lag == 0 {
                        let waited = started.elapsed();
                        info!(?waited, polls, replicas = replicas.len(), "replicas caught up");
                        return Ok(SyncReport::CaughtUp { waited, polls });
                    }
                    last_lag = Some(lag);
                }
                Err(e) => debug!(error = %e, polls, "log position unavailable, retrying"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BenchError::SyncTimeout {
                    waited: now - started,
                    last_lag,
                });
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }
    }
}

/// Largest lag across all replicas, in log records.
async fn poll_lag(primary: &dyn ServerNode, replicas: &[&dyn ServerNode]) -> BenchResult<u64> {
    let produced = primary.log_position().await?;
    let applied: Vec<LogPosition> =
        try_join_all(replicas.iter().map(|replica| replica.log_position())).await?;
    Ok(applied
        .iter()
        .map(|position| position.lag_behind(produced))
        .max()
        .unwrap_or(0))
}
