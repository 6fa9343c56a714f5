//! Reading log positions from running servers.
//!
//! The lag between a primary and a replica is measured as the difference of
//! log sequence numbers: the last position the primary produced minus the
//! last position the replica applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::process::Command;
use tracing::trace;

use walbench_core::config::SyncConfig;
use walbench_core::{BenchError, BenchResult, NodeRole};

/// Log sequence number reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition(u64);

impl LogPosition {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// How many records `self` trails `produced` by. Zero once caught up,
    /// including when a replica reports a position past the primary's.
    pub fn lag_behind(&self, produced: LogPosition) -> u64 {
        produced.0.saturating_sub(self.0)
    }

    /// Parses a plain integer or a `high/low` hexadecimal pair.
    pub fn parse(raw: &str) -> BenchResult<Self> {
        let raw = raw.trim();
        if let Some((high, low)) = raw.split_once('/') {
            let high = u64::from_str_radix(high, 16)
                .map_err(|e| BenchError::probe(format!("bad position {raw:?}: {e}")))?;
            let low = u64::from_str_radix(low, 16)
                .map_err(|e| BenchError::probe(format!("bad position {raw:?}: {e}")))?;
            return Ok(Self((high << 32) | low));
        }
        raw.parse::<u64>()
            .map(Self)
            .map_err(|e| BenchError::probe(format!("bad position {raw:?}: {e}")))
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

impl From<u64> for LogPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Source of log positions for a node.
#[async_trait]
pub trait LogPositionProbe: Send + Sync {
    /// Produced position for a primary, applied position for a replica.
    async fn position(&self, role: NodeRole, port: u16) -> BenchResult<LogPosition>;
}

/// Reads positions by running a SQL client against the node.
#[derive(Debug, Clone)]
pub struct SqlProbe {
    client: String,
    host: String,
    user: String,
    database: String,
    primary_query: String,
    replica_query: String,
}

impl SqlProbe {
    pub fn new(config: &SyncConfig, host: impl Into<String>) -> Self {
        Self {
            client: config.sql_client.clone(),
            host: host.into(),
            user: config.user.clone(),
            database: config.database.clone(),
            primary_query: config.primary_position_query.clone(),
            replica_query: config.replica_position_query.clone(),
        }
    }

    fn query(&self, role: NodeRole) -> &str {
        match role {
            NodeRole::Primary => &self.primary_query,
            NodeRole::Replica => &self.replica_query,
        }
    }
}

#[async_trait]
impl LogPositionProbe for SqlProbe {
    async fn position(&self, role: NodeRole, port: u16) -> BenchResult<LogPosition> {
        let output = Command::new(&self.client)
            .arg("-h")
            .arg(&self.host)
            .arg("-p")
            .arg(port.to_string())
            .arg("-U")
            .arg(&self.user)
            .arg("-d")
            .arg(&self.database)
            .arg("-At")
            .arg("-c")
            .arg(self.query(role))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BenchError::probe(format!("failed to run {}: {e}", self.client)))?;

        if !output.status.success() {
            return Err(BenchError::probe(format!(
                "{} exited with {}: {}",
                self.client,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| BenchError::probe(format!("{role} on port {port} returned no position")))?;
        trace!(%role, port, raw = line, "read log position");
        LogPosition::parse(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_pair() {
        assert_eq!(LogPosition::parse(" 42\n").unwrap(), LogPosition::new(42));
        assert_eq!(
            LogPosition::parse("1/0000000A").unwrap(),
            LogPosition::new((1 << 32) | 10)
        );
        assert!(LogPosition::parse("lsn").is_err());
        assert!(LogPosition::parse("G/1").is_err());
    }

    #[test]
    fn test_lag_behind() {
        let produced = LogPosition::new(100);
        assert_eq!(LogPosition::new(60).lag_behind(produced), 40);
        assert_eq!(LogPosition::new(100).lag_behind(produced), 0);
        assert_eq!(LogPosition::new(120).lag_behind(produced), 0);
    }

    #[test]
    fn test_query_per_role() {
        let probe = SqlProbe::new(&SyncConfig::default(), "127.0.0.1");
        assert_ne!(probe.query(NodeRole::Primary), probe.query(NodeRole::Replica));
    }

    #[tokio::test]
    async fn test_missing_client_is_probe_error() {
        let config = SyncConfig {
            sql_client: "/nonexistent/walbench-sql-client".to_string(),
            ..SyncConfig::default()
        };
        let probe = SqlProbe::new(&config, "127.0.0.1");
        let err = probe.position(NodeRole::Primary, 15721).await.unwrap_err();
        assert!(matches!(err, BenchError::Probe(_)));
    }
}
