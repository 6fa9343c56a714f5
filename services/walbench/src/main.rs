use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use walbench_core::config::LoggingConfig;
use walbench_core::{BuildType, OltpBenchmark, TestPlan, TestType, WalbenchConfig};
use walbench_runner::{Orchestrator, SqlProbe};

#[derive(Parser, Debug)]
#[command(name = "walbench")]
#[command(about = "Measure write-ahead log throughput of a primary or replica node", long_about = None)]
#[command(version)]
struct Cli {
    /// Which node's log throughput to measure
    #[arg(value_enum)]
    test_type: TestType,

    /// Server build to launch
    #[arg(long, value_enum, default_value = "release")]
    build_type: BuildType,

    /// Ship the primary's log to a live replica (primary tests only)
    #[arg(long)]
    replication_enabled: bool,

    /// Acknowledge commits before the log is durable
    #[arg(long)]
    async_commit: bool,

    /// OLTP benchmark that generates the load (primary tests only)
    #[arg(long, value_enum, default_value = "ycsb")]
    oltp_benchmark: OltpBenchmark,

    /// Benchmark scale factor (primary tests only)
    #[arg(long)]
    scale_factor: Option<u32>,

    /// Server connection thread count
    #[arg(long)]
    connection_threads: Option<u32>,

    /// Captured log record messages to replay (replica tests only)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Results file name inside the results directory
    #[arg(long)]
    output_file: Option<String>,

    /// Configuration file
    #[arg(long, env = "WALBENCH_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Also write `<output>.summary.json` beside the results directory
    #[arg(long)]
    summary: bool,
}

impl Cli {
    fn into_plan(self, config: &WalbenchConfig) -> TestPlan {
        let test_type = self.test_type;
        TestPlan {
            test_type,
            build_type: self.build_type,
            replication_enabled: self.replication_enabled,
            async_commit: self.async_commit,
            oltp_benchmark: self.oltp_benchmark,
            scale_factor: self.scale_factor.unwrap_or(config.workload.scale_factor),
            connection_threads: self
                .connection_threads
                .unwrap_or(config.workload.connection_threads),
            log_messages_file: self
                .log_file
                .unwrap_or_else(|| config.replica.log_messages_file.clone()),
            output_name: self
                .output_file
                .unwrap_or_else(|| TestPlan::default_output_name(test_type, Utc::now())),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let config = WalbenchConfig::load(args.config.as_deref())?;
    init_logging(&config.logging);

    let write_summary = args.summary;
    let plan = args.into_plan(&config);
    info!("Test type: {}", plan.test_type);
    info!("Build type: {}", plan.build_type);
    info!("Output file: {}", plan.output_name);

    let probe = Arc::new(SqlProbe::new(&config.sync, config.server.host.clone()));
    let orchestrator = Orchestrator::from_config(&config, probe).with_summary(write_summary);

    let outcome = tokio::select! {
        outcome = orchestrator.run(&plan) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping servers");
            return Err("interrupted".into());
        }
    };

    println!("Results: {}", outcome.results_file.display());
    match outcome.throughput {
        Some(result) => println!(
            "Average log throughput: {:.2} records/ms ({} samples)",
            result.records_per_ms, result.sample_count
        ),
        None => println!("Average log throughput: not enough data"),
    }
    if outcome.sync_timed_out {
        println!("Warning: replicas had not caught up when the run ended");
    }
    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt().with_env_filter(env_filter).with_target(false);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
