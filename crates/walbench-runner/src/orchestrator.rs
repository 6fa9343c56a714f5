//! End-to-end driver for one benchmark invocation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use walbench_core::{
    aggregate_file, BenchResult, MetricsLease, MetricsStore, NodeSpec, PortAssignment, TestPlan,
    ThroughputResult, WalbenchConfig,
};

use crate::cleanup::CleanupStack;
use crate::node::ServerNode;
use crate::probe::LogPositionProbe;
use crate::process::ProcessNode;
use crate::sync::SyncCoordinator;

/// Builds nodes for a run.
pub trait NodeFactory: Send + Sync {
    /// Creates a node that keeps its working files in `work_dir`.
    fn create(&self, spec: NodeSpec, work_dir: PathBuf) -> BenchResult<Box<dyn ServerNode>>;
}

/// Creates [`ProcessNode`]s from the loaded configuration.
pub struct ProcessNodeFactory {
    config: WalbenchConfig,
    probe: Arc<dyn LogPositionProbe>,
}

impl ProcessNodeFactory {
    pub fn new(config: WalbenchConfig, probe: Arc<dyn LogPositionProbe>) -> Self {
        Self { config, probe }
    }
}

impl NodeFactory for ProcessNodeFactory {
    fn create(&self, spec: NodeSpec, work_dir: PathBuf) -> BenchResult<Box<dyn ServerNode>> {
        Ok(Box::new(ProcessNode::new(
            spec,
            self.config.server.clone(),
            self.config.workload.clone(),
            self.config.replica.clone(),
            work_dir,
            Arc::clone(&self.probe),
        )))
    }
}

/// What a completed invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// The relocated metrics file.
    pub results_file: PathBuf,
    /// `None` when the file held too few samples.
    pub throughput: Option<ThroughputResult>,
    /// Whether replicas were still behind when the sync wait gave up.
    pub sync_timed_out: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    plan: &'a TestPlan,
    results_file: &'a Path,
    throughput: Option<ThroughputResult>,
    sync_timed_out: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// Runs the setup, workload, sync, teardown and aggregation sequence.
pub struct Orchestrator {
    store: MetricsStore,
    factory: Arc<dyn NodeFactory>,
    sync: SyncCoordinator,
    ports: PortAssignment,
    write_summary: bool,
}

impl Orchestrator {
    pub fn new(
        store: MetricsStore,
        factory: Arc<dyn NodeFactory>,
        sync: SyncCoordinator,
        ports: PortAssignment,
    ) -> Self {
        Self {
            store,
            factory,
            sync,
            ports,
            write_summary: false,
        }
    }

    /// Builds an orchestrator that launches real server processes.
    pub fn from_config(config: &WalbenchConfig, probe: Arc<dyn LogPositionProbe>) -> Self {
        Self::new(
            MetricsStore::new(&config.metrics.metrics_dir, &config.metrics.results_dir),
            Arc::new(ProcessNodeFactory::new(config.clone(), probe)),
            SyncCoordinator::from_config(&config.sync),
            config.ports(),
        )
    }

    /// Whether to write `<output>.summary.json` beside the results
    /// directory. Off by default so the results directory only ever holds
    /// metrics files.
    pub fn with_summary(mut self, enabled: bool) -> Self {
        self.write_summary = enabled;
        self
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Executes one measurement described by `plan`.
    ///
    /// Every node that began setup is torn down exactly once, in reverse
    /// order, whether or not the run succeeds. Sync timeouts and too-short
    /// metrics files degrade the outcome instead of failing the run.
    pub async fn run(&self, plan: &TestPlan) -> BenchResult<RunOutcome> {
        let started_at = Utc::now();
        info!(
            test_type = %plan.test_type,
            build_type = %plan.build_type,
            replication = plan.replication_enabled,
            async_commit = plan.async_commit,
            "starting log throughput test"
        );

        let mut nodes = plan
            .node_specs(self.ports)
            .into_iter()
            .map(|spec| {
                let work_dir = self.store.node_dir(spec.role());
                self.factory.create(spec, work_dir)
            })
            .collect::<BenchResult<Vec<_>>>()?;

        let lease = self.store.acquire(plan.test_type.target())?;
        let mut cleanup = CleanupStack::new();

        let driven = self.drive(&mut nodes, &mut cleanup, &lease).await;
        cleanup.unwind(&mut nodes).await;
        let sync_timed_out = match driven {
            Ok(timed_out) => timed_out,
            Err(e) => {
                error!(error = %e, "log throughput test aborted");
                return Err(e);
            }
        };

        let results_file = lease.finish(&plan.output_name)?;
        let throughput = match aggregate_file(&results_file) {
            Ok(result) => {
                info!(
                    samples = result.sample_count,
                    records = result.total_records,
                    "Average log throughput is {:.2} per millisecond",
                    result.records_per_ms
                );
                Some(result)
            }
            Err(e) if !e.is_fatal() => {
                error!(file = %results_file.display(), "{e}");
                None
            }
            Err(e) => return Err(e),
        };

        let outcome = RunOutcome {
            results_file,
            throughput,
            sync_timed_out,
        };

        if self.write_summary {
            let summary = RunSummary {
                plan,
                results_file: &outcome.results_file,
                throughput: outcome.throughput,
                sync_timed_out,
                started_at,
                finished_at: Utc::now(),
            };
            if let Err(e) = self.write_summary_file(&plan.output_name, &summary) {
                warn!(error = %e, "failed to write run summary");
            }
        }

        Ok(outcome)
    }

    /// Sets up, runs, drains and syncs the nodes. Returns whether the sync
    /// wait timed out.
    async fn drive(
        &self,
        nodes: &mut [Box<dyn ServerNode>],
        cleanup: &mut CleanupStack,
        lease: &MetricsLease<'_>,
    ) -> BenchResult<bool> {
        for (index, node) in nodes.iter_mut().enumerate() {
            cleanup.push(index);
            info!(node = node.name(), role = %node.role(), "setting up node");
            node.setup().await?;
        }

        // Startup records skew the average.
        lease.clear_target()?;

        for node in nodes.iter_mut() {
            info!(node = node.name(), "starting workload");
            node.run().await?;
        }

        for node in nodes.iter_mut() {
            if let Err(e) = node.wait_for_workload().await {
                warn!(node = node.name(), error = %e, "workload did not complete cleanly");
            }
        }

        match self.sync.wait_for_replicas(nodes).await {
            Ok(report) => {
                debug!(?report, "replica sync finished");
                Ok(false)
            }
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "continuing without replica sync");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Path of the run summary, a sibling of the results directory.
    pub fn summary_path(&self, output_name: &str) -> PathBuf {
        let results_dir = self.store.results_dir();
        let parent = results_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        parent.join(format!("{output_name}.summary.json"))
    }

    fn write_summary_file(&self, output_name: &str, summary: &RunSummary<'_>) -> BenchResult<()> {
        let path = self.summary_path(output_name);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, summary)?;
        debug!(path = %path.display(), "wrote run summary");
        Ok(())
    }
}
