//! Configuration management for walbench
//!
//! This module provides a layered configuration system that supports:
//! - YAML/TOML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plan::PortAssignment;

/// Root configuration structure for walbench
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WalbenchConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub replica: ReplicaConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WalbenchConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Explicit config file (`--config`)
    /// 3. ./config/walbench.{yaml,toml}
    /// 4. Config file specified by WALBENCH_CONFIG env var
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("WALBENCH_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/walbench").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Example: WALBENCH__SYNC__TIMEOUT_SECS=600
        builder = builder.add_source(
            Environment::with_prefix("WALBENCH")
                .separator("__")
                .try_parsing(true),
        );

        let config: WalbenchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Server
            .set_default("server.repo_dir", ".")?
            .set_default("server.binary_name", "noisepage")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.primary_port", 15721)?
            .set_default("server.replica_port", 15722)?
            .set_default("server.messenger_port", 9022)?
            .set_default("server.start_attempts", 2)?
            .set_default("server.start_wait_ms", 1000)?
            .set_default("server.connect_attempts", 200)?
            .set_default("server.connect_sleep_ms", 100)?
            .set_default("server.shutdown_grace_ms", 5000)?
            // Workload
            .set_default("workload.driver_bin", "./oltpbench")?
            .set_default("workload.driver_dir", "oltpbench")?
            .set_default("workload.scale_factor", 1)?
            .set_default("workload.connection_threads", 32)?
            .set_default("workload.timeout_secs", 3600)?
            // Replica
            .set_default("replica.shipper_bin", "./log_shipper")?
            .set_default("replica.log_messages_file", "log-messages.txt")?
            .set_default("replica.timeout_secs", 3600)?
            // Sync
            .set_default("sync.poll_interval_ms", 500)?
            .set_default("sync.timeout_secs", 300)?
            .set_default("sync.sql_client", "psql")?
            .set_default("sync.user", "noisepage")?
            .set_default("sync.database", "noisepage")?
            // Metrics
            .set_default("metrics.metrics_dir", "./metrics")?
            .set_default("metrics.results_dir", "./results")?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.primary_port == self.server.replica_port {
            return Err(ConfigError::Message(
                "server.primary_port and server.replica_port must differ".to_string(),
            ));
        }

        if self.server.start_attempts == 0 {
            return Err(ConfigError::Message(
                "server.start_attempts must be > 0".to_string(),
            ));
        }

        if self.server.connect_attempts == 0 {
            return Err(ConfigError::Message(
                "server.connect_attempts must be > 0".to_string(),
            ));
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "sync.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.sync.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "sync.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.metrics.metrics_dir == self.metrics.results_dir {
            return Err(ConfigError::Message(
                "metrics.metrics_dir and metrics.results_dir must differ".to_string(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Message(format!(
                "logging.format must be 'pretty' or 'json', got '{other}'"
            ))),
        }
    }

    /// Client ports for the nodes of a run.
    pub fn ports(&self) -> PortAssignment {
        PortAssignment {
            primary: self.server.primary_port,
            replica: self.server.replica_port,
        }
    }
}

/// Database server process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Repository root holding the `build/<type>` directories
    pub repo_dir: PathBuf,

    /// Server executable name
    pub binary_name: String,

    /// Host the servers listen on
    pub host: String,

    pub primary_port: u16,

    pub replica_port: u16,

    /// Port used for log shipping between nodes
    pub messenger_port: u16,

    /// How many times to spawn the server before giving up
    pub start_attempts: u32,

    /// Pause after spawn before the first connection attempt
    pub start_wait_ms: u64,

    pub connect_attempts: u32,

    pub connect_sleep_ms: u64,

    /// How long a terminated server may take to exit before it is killed
    pub shutdown_grace_ms: u64,

    /// Extra flags passed to every server process
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl ServerConfig {
    pub fn start_wait(&self) -> Duration {
        Duration::from_millis(self.start_wait_ms)
    }

    pub fn connect_sleep(&self) -> Duration {
        Duration::from_millis(self.connect_sleep_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            binary_name: "noisepage".to_string(),
            host: "127.0.0.1".to_string(),
            primary_port: 15721,
            replica_port: 15722,
            messenger_port: 9022,
            start_attempts: 2,
            start_wait_ms: 1000,
            connect_attempts: 200,
            connect_sleep_ms: 100,
            shutdown_grace_ms: 5000,
            extra_args: Vec::new(),
        }
    }
}

/// OLTP benchmark driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadConfig {
    /// Driver launcher, relative to `driver_dir` unless absolute
    pub driver_bin: PathBuf,

    /// Driver checkout holding `config/<benchmark>_config.xml`
    pub driver_dir: PathBuf,

    pub scale_factor: u32,

    pub connection_threads: u32,

    /// Upper bound on the load phase
    pub timeout_secs: u64,
}

impl WorkloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            driver_bin: PathBuf::from("./oltpbench"),
            driver_dir: PathBuf::from("oltpbench"),
            scale_factor: 1,
            connection_threads: 32,
            timeout_secs: 3600,
        }
    }
}

/// Log replay configuration for replica tests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicaConfig {
    /// Program that ships captured log-record messages to a replica
    pub shipper_bin: PathBuf,

    /// Default messages file when none is given on the command line
    pub log_messages_file: PathBuf,

    pub timeout_secs: u64,
}

impl ReplicaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            shipper_bin: PathBuf::from("./log_shipper"),
            log_messages_file: PathBuf::from("log-messages.txt"),
            timeout_secs: 3600,
        }
    }
}

/// Replica catch-up configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,

    pub timeout_secs: u64,

    /// SQL client used to read log positions
    pub sql_client: String,

    pub user: String,

    pub database: String,

    /// Query returning the last log position the primary produced
    #[serde(default = "default_primary_position_query")]
    pub primary_position_query: String,

    /// Query returning the last log position a replica applied
    #[serde(default = "default_replica_position_query")]
    pub replica_position_query: String,
}

fn default_primary_position_query() -> String {
    "SELECT last_serialized_lsn FROM pg_stat_replication_log".to_string()
}

fn default_replica_position_query() -> String {
    "SELECT last_applied_lsn FROM pg_stat_replication_log".to_string()
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_secs: 300,
            sql_client: "psql".to_string(),
            user: "noisepage".to_string(),
            database: "noisepage".to_string(),
            primary_position_query: default_primary_position_query(),
            replica_position_query: default_replica_position_query(),
        }
    }
}

/// Metrics artifact locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Parent of the per-node working directories
    pub metrics_dir: PathBuf,

    /// Where relocated results files are kept
    pub results_dir: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            metrics_dir: PathBuf::from("./metrics"),
            results_dir: PathBuf::from("./results"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log format: json or pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WalbenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.primary_port, 15721);
        assert_eq!(config.sync.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.sync.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_validation_rejects_zero_sync_timeout() {
        let mut config = WalbenchConfig::default();
        config.sync.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_poll_interval() {
        let mut config = WalbenchConfig::default();
        config.sync.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_shared_ports() {
        let mut config = WalbenchConfig::default();
        config.server.replica_port = config.server.primary_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_log_format() {
        let mut config = WalbenchConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[sync]\ntimeout_secs = 42\n\n[server]\nbinary_name = \"terrier\""
        )
        .unwrap();

        let config = WalbenchConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sync.timeout_secs, 42);
        assert_eq!(config.sync.poll_interval_ms, 500);
        assert_eq!(config.server.binary_name, "terrier");
        assert_eq!(config.server.replica_port, 15722);
    }
}
