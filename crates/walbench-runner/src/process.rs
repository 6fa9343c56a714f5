//! Server nodes backed by local processes.

use async_trait::async_trait;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use walbench_core::config::{ReplicaConfig, ServerConfig, WorkloadConfig};
use walbench_core::{
    BenchError, BenchResult, BuildType, NodeRole, NodeSpec, NodeState, PrimarySpec, ReplicaSpec,
};

use crate::node::ServerNode;
use crate::probe::{LogPosition, LogPositionProbe};

/// Lines of server output echoed when startup fails.
const LOG_TAIL_LINES: usize = 40;

/// Locates the server executable for a build type.
///
/// Command-line builds live in `build/<type>/`, IDE builds in
/// `cmake-build-<type>/<type>/`.
pub fn resolve_server_binary(
    repo_dir: &Path,
    build_type: BuildType,
    binary_name: &str,
) -> BenchResult<PathBuf> {
    let build = build_type.as_str();
    let candidates = [
        repo_dir.join("build").join(build),
        repo_dir.join(format!("cmake-build-{build}")).join(build),
    ];
    for dir in &candidates {
        let path = dir.join(binary_name);
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(BenchError::setup(
        binary_name,
        format!(
            "no server binary found in {}",
            candidates
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}

/// A primary or replica server running as a child process.
pub struct ProcessNode {
    name: String,
    spec: NodeSpec,
    state: NodeState,
    server: ServerConfig,
    workload: WorkloadConfig,
    replica: ReplicaConfig,
    work_dir: PathBuf,
    probe: Arc<dyn LogPositionProbe>,
    server_process: Option<Child>,
    workload_process: Option<Child>,
    /// Per-run copy of the driver config, primary only.
    driver_config: Option<PathBuf>,
}

impl ProcessNode {
    /// Creates a node that will run inside `work_dir`, where the server
    /// writes its metrics files.
    pub fn new(
        spec: NodeSpec,
        server: ServerConfig,
        workload: WorkloadConfig,
        replica: ReplicaConfig,
        work_dir: PathBuf,
        probe: Arc<dyn LogPositionProbe>,
    ) -> Self {
        Self {
            name: spec.role().as_str().to_string(),
            spec,
            state: NodeState::Created,
            server,
            workload,
            replica,
            work_dir,
            probe,
            server_process: None,
            workload_process: None,
            driver_config: None,
        }
    }

    fn server_log_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.log", self.name))
    }

    fn workload_log_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}-workload.log", self.name))
    }

    fn transition(&mut self, next: NodeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "{} -> {} is not a legal transition",
            self.state,
            next
        );
        debug!(node = %self.name, from = %self.state, to = %next, "node state change");
        self.state = next;
    }

    /// Server flags for this node's role.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.spec {
            NodeSpec::Primary(primary) => {
                args.push(format!("-port={}", primary.port));
                args.push(format!("-connection_thread_count={}", primary.connection_threads));
                args.push(format!("-wal_async_commit_enable={}", primary.async_commit));
                args.push(format!("-messenger_enable={}", primary.replication_enabled));
                args.push(format!("-replication_enable={}", primary.replication_enabled));
            }
            NodeSpec::Replica(replica) => {
                args.push(format!("-port={}", replica.port));
                args.push(format!("-connection_thread_count={}", replica.connection_threads));
                args.push(format!("-wal_async_commit_enable={}", replica.async_commit));
                args.push("-messenger_enable=true".to_string());
                args.push("-replication_enable=true".to_string());
            }
        }
        args.push(format!("-messenger_port={}", self.messenger_port()));
        args.push(format!("-network_identity={}", self.name));
        args.push("-metrics=true".to_string());
        args.push("-logging_metrics_enable=true".to_string());
        args.extend(self.server.extra_args.iter().cloned());
        args
    }

    fn messenger_port(&self) -> u16 {
        match self.spec.role() {
            NodeRole::Primary => self.server.messenger_port,
            NodeRole::Replica => self.server.messenger_port.saturating_add(1),
        }
    }

    /// Checks that role-specific inputs exist before anything is spawned.
    fn check_prerequisites(&self) -> BenchResult<()> {
        match &self.spec {
            NodeSpec::Primary(primary) => {
                let config = self.driver_config_path(primary);
                if !config.is_file() {
                    return Err(BenchError::setup(
                        &self.name,
                        format!("workload config {} not found", config.display()),
                    ));
                }
            }
            NodeSpec::Replica(ReplicaSpec {
                log_messages_file: Some(file),
                ..
            }) => {
                if !file.is_file() {
                    return Err(BenchError::setup(
                        &self.name,
                        format!("log messages file {} not found", file.display()),
                    ));
                }
            }
            NodeSpec::Replica(_) => {}
        }
        Ok(())
    }

    fn driver_config_path(&self, primary: &PrimarySpec) -> PathBuf {
        self.workload
            .driver_dir
            .join("config")
            .join(format!("{}_config.xml", primary.oltp_benchmark))
    }

    /// Writes the driver config for this run into the work dir, with the
    /// scale factor and the node's client address filled in.
    fn render_driver_config(&self, primary: &PrimarySpec) -> BenchResult<PathBuf> {
        let template = self.driver_config_path(primary);
        let xml = fs::read_to_string(&template)?;

        let xml = set_xml_element(&xml, "scalefactor", &primary.scale_factor.to_string())
            .ok_or_else(|| {
                BenchError::setup(
                    &self.name,
                    format!("{} has no <scalefactor> element", template.display()),
                )
            })?;
        let xml = match xml_element(&xml, "DBUrl")
            .and_then(|url| retarget_jdbc_url(url, &self.server.host, primary.port))
        {
            Some(url) => set_xml_element(&xml, "DBUrl", &url).unwrap_or(xml),
            None => {
                warn!(node = %self.name, "driver config has no usable DBUrl, leaving it unchanged");
                xml
            }
        };

        let rendered = self
            .work_dir
            .join(format!("{}_config.xml", primary.oltp_benchmark));
        fs::write(&rendered, xml)?;
        debug!(
            node = %self.name,
            path = %rendered.display(),
            scale_factor = primary.scale_factor,
            "rendered driver config"
        );
        // The driver runs from its own directory.
        Ok(fs::canonicalize(rendered)?)
    }

    async fn try_setup(&mut self) -> BenchResult<()> {
        self.check_prerequisites()?;
        let binary = resolve_server_binary(
            &self.server.repo_dir,
            self.spec.build_type(),
            &self.server.binary_name,
        )?;
        fs::create_dir_all(&self.work_dir)?;
        let driver_config = match &self.spec {
            NodeSpec::Primary(primary) => Some(self.render_driver_config(primary)?),
            NodeSpec::Replica(_) => None,
        };
        self.driver_config = driver_config;

        let attempts = self.server.start_attempts;
        for attempt in 1..=attempts {
            self.spawn_server(&binary)?;
            match self.wait_until_ready().await {
                Ok(()) => {
                    info!(node = %self.name, port = self.spec.port(), attempt, "server is ready");
                    return Ok(());
                }
                Err(e) => {
                    self.kill_server().await;
                    self.log_server_output();
                    if attempt == attempts {
                        return Err(e);
                    }
                    warn!(node = %self.name, attempt, error = %e, "server failed to start, retrying");
                }
            }
        }
        Err(BenchError::setup(&self.name, "no start attempts configured"))
    }

    fn spawn_server(&mut self, binary: &Path) -> BenchResult<()> {
        let log = File::create(self.server_log_path())?;
        let args = self.server_args();
        info!(node = %self.name, binary = %binary.display(), ?args, "starting server");

        let child = Command::new(binary)
            .args(&args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BenchError::setup(&self.name, format!("failed to spawn {}: {e}", binary.display()))
            })?;
        self.server_process = Some(child);
        Ok(())
    }

    /// Waits until the server accepts connections on its client port.
    async fn wait_until_ready(&mut self) -> BenchResult<()> {
        tokio::time::sleep(self.server.start_wait()).await;

        let port = self.spec.port();
        for attempt in 0..self.server.connect_attempts {
            if let Some(status) = self.server_exit_status()? {
                return Err(BenchError::setup(
                    &self.name,
                    format!("server exited during startup with {status}"),
                ));
            }
            if TcpStream::connect((self.server.host.as_str(), port)).await.is_ok() {
                return Ok(());
            }
            if attempt > 0 && attempt % 20 == 0 {
                debug!(
                    node = %self.name,
                    attempt,
                    max = self.server.connect_attempts,
                    "server not accepting connections yet"
                );
            }
            tokio::time::sleep(self.server.connect_sleep()).await;
        }

        Err(BenchError::setup(
            &self.name,
            format!(
                "unable to connect to {}:{} after {} attempts",
                self.server.host, port, self.server.connect_attempts
            ),
        ))
    }

    fn server_exit_status(&mut self) -> BenchResult<Option<std::process::ExitStatus>> {
        match self.server_process.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    fn log_server_output(&self) {
        let path = self.server_log_path();
        match fs::read_to_string(&path) {
            Ok(output) => {
                let lines: Vec<&str> = output.lines().collect();
                let tail = &lines[lines.len().saturating_sub(LOG_TAIL_LINES)..];
                error!(node = %self.name, "server output:\n{}", tail.join("\n"));
            }
            Err(e) => warn!(node = %self.name, path = %path.display(), error = %e, "cannot read server output"),
        }
    }

    /// Command that drives this node's workload, if it has one.
    fn workload_command(&self) -> BenchResult<Option<Command>> {
        let command = match &self.spec {
            NodeSpec::Primary(primary) => {
                let config = self.driver_config.as_ref().ok_or_else(|| {
                    BenchError::workload(&self.name, "driver config was not rendered during setup")
                })?;
                let mut cmd = Command::new(&self.workload.driver_bin);
                cmd.arg("-b")
                    .arg(primary.oltp_benchmark.as_str())
                    .arg("-c")
                    .arg(config)
                    .arg("--create=true")
                    .arg("--load=true")
                    .arg("--execute=false")
                    .current_dir(&self.workload.driver_dir);
                cmd
            }
            NodeSpec::Replica(ReplicaSpec {
                log_messages_file: Some(file),
                ..
            }) => {
                let mut cmd = Command::new(&self.replica.shipper_bin);
                cmd.arg("--log-file")
                    .arg(file)
                    .arg("--host")
                    .arg(&self.server.host)
                    .arg("--port")
                    .arg(self.messenger_port().to_string());
                cmd
            }
            // Fed by the primary's log shipping.
            NodeSpec::Replica(_) => return Ok(None),
        };
        Ok(Some(command))
    }

    fn spawn_workload(&mut self) -> BenchResult<Option<Child>> {
        let Some(mut command) = self.workload_command()? else {
            return Ok(None);
        };
        match &self.spec {
            NodeSpec::Primary(primary) => info!(
                node = %self.name,
                benchmark = %primary.oltp_benchmark,
                scale_factor = primary.scale_factor,
                "starting OLTP load phase"
            ),
            NodeSpec::Replica(_) => info!(node = %self.name, "replaying log record messages"),
        }

        let log = File::create(self.workload_log_path())?;
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BenchError::workload(&self.name, format!("failed to spawn workload: {e}")))?;
        Ok(Some(child))
    }

    fn workload_timeout(&self) -> Duration {
        match self.spec.role() {
            NodeRole::Primary => self.workload.timeout(),
            NodeRole::Replica => self.replica.timeout(),
        }
    }

    async fn kill_server(&mut self) {
        if let Some(mut child) = self.server_process.take() {
            if let Err(e) = child.kill().await {
                debug!(node = %self.name, error = %e, "kill after failed start");
            }
        }
    }

    /// Asks the server to shut down, killing it after the grace period.
    async fn stop_server(&mut self) -> BenchResult<()> {
        let Some(mut child) = self.server_process.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            return if status.success() {
                Ok(())
            } else {
                Err(BenchError::workload(
                    &self.name,
                    format!("server terminated early with {status}"),
                ))
            };
        }

        if send_sigterm(&self.name, &child) {
            let grace = self.server.shutdown_grace();
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(result) => {
                    let status = result?;
                    debug!(node = %self.name, %status, "server stopped");
                    return Ok(());
                }
                Err(_) => {
                    warn!(node = %self.name, ?grace, "server ignored SIGTERM, killing");
                }
            }
        }

        child.kill().await?;
        Ok(())
    }
}

/// Asks a child to exit. Returns false when no signal could be delivered.
#[cfg(unix)]
fn send_sigterm(node: &str, child: &Child) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        // Exited in between; `wait` reaps it.
        Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!(node, pid, error = %e, "SIGTERM failed, killing");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_node: &str, _child: &Child) -> bool {
    false
}

/// Text of the first `<tag>` element.
fn xml_element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(&xml[start..end])
}

/// Replaces the text of the first `<tag>` element.
fn set_xml_element(xml: &str, tag: &str, value: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(format!("{}{}{}", &xml[..start], value, &xml[end..]))
}

/// Points `jdbc:<driver>://host:port/rest` at a different host and port.
fn retarget_jdbc_url(url: &str, host: &str, port: u16) -> Option<String> {
    let authority_start = url.find("://")? + 3;
    let authority_len = url[authority_start..]
        .find(|c: char| c == '/' || c == '?')
        .unwrap_or(url.len() - authority_start);
    Some(format!(
        "{}{host}:{port}{}",
        &url[..authority_start],
        &url[authority_start + authority_len..]
    ))
}

#[async_trait]
impl ServerNode for ProcessNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> NodeRole {
        self.spec.role()
    }

    fn state(&self) -> NodeState {
        self.state
    }

    async fn setup(&mut self) -> BenchResult<()> {
        if self.state != NodeState::Created {
            return Err(BenchError::InvalidState {
                node: self.name.clone(),
                action: "set up",
                state: self.state.to_string(),
            });
        }
        self.transition(NodeState::SettingUp);

        match self.try_setup().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.transition(NodeState::Failed);
                Err(match e {
                    BenchError::Setup { .. } => e,
                    other => BenchError::setup(&self.name, other.to_string()),
                })
            }
        }
    }

    async fn run(&mut self) -> BenchResult<()> {
        if self.state != NodeState::SettingUp || self.server_process.is_none() {
            return Err(BenchError::InvalidState {
                node: self.name.clone(),
                action: "run",
                state: self.state.to_string(),
            });
        }

        if !self.is_running().await {
            self.transition(NodeState::Failed);
            return Err(BenchError::workload(&self.name, "server is no longer running"));
        }

        match self.spawn_workload() {
            Ok(workload) => {
                self.workload_process = workload;
                self.transition(NodeState::Running);
                Ok(())
            }
            Err(e) => {
                self.transition(NodeState::Failed);
                Err(e)
            }
        }
    }

    async fn wait_for_workload(&mut self) -> BenchResult<()> {
        let timeout = self.workload_timeout();
        let Some(child) = self.workload_process.as_mut() else {
            return Ok(());
        };

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(BenchError::workload(
                    &self.name,
                    format!("workload still running after {timeout:?}"),
                ));
            }
        };
        self.workload_process = None;

        if status.success() {
            info!(node = %self.name, "workload finished");
            Ok(())
        } else {
            Err(BenchError::workload(&self.name, format!("workload exited with {status}")))
        }
    }

    async fn is_running(&mut self) -> bool {
        matches!(self.server_exit_status(), Ok(None)) && self.server_process.is_some()
    }

    async fn log_position(&self) -> BenchResult<LogPosition> {
        self.probe.position(self.role(), self.spec.port()).await
    }

    async fn teardown(&mut self) -> BenchResult<()> {
        if self.state == NodeState::TornDown {
            return Ok(());
        }

        let mut result = Ok(());
        if self.state.may_hold_process() {
            if let Some(mut workload) = self.workload_process.take() {
                if let Err(e) = workload.kill().await {
                    debug!(node = %self.name, error = %e, "workload already gone");
                }
            }
            result = self.stop_server().await;
        }

        self.transition(NodeState::TornDown);
        info!(node = %self.name, "node torn down");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use walbench_core::OltpBenchmark;

    struct FixedProbe;

    #[async_trait]
    impl LogPositionProbe for FixedProbe {
        async fn position(&self, _role: NodeRole, port: u16) -> BenchResult<LogPosition> {
            Ok(LogPosition::new(u64::from(port)))
        }
    }

    fn primary_spec() -> NodeSpec {
        NodeSpec::Primary(PrimarySpec {
            build_type: BuildType::Release,
            replication_enabled: true,
            async_commit: false,
            oltp_benchmark: OltpBenchmark::Tpcc,
            scale_factor: 1,
            connection_threads: 8,
            port: 15721,
        })
    }

    fn node(dir: &TempDir, spec: NodeSpec) -> ProcessNode {
        let server = ServerConfig {
            repo_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        ProcessNode::new(
            spec,
            server,
            WorkloadConfig::default(),
            ReplicaConfig::default(),
            dir.path().join("work"),
            Arc::new(FixedProbe),
        )
    }

    #[test]
    fn test_resolve_prefers_build_dir() {
        let dir = TempDir::new().unwrap();
        let ide = dir.path().join("cmake-build-debug").join("debug");
        fs::create_dir_all(&ide).unwrap();
        fs::write(ide.join("noisepage"), "").unwrap();

        let found = resolve_server_binary(dir.path(), BuildType::Debug, "noisepage").unwrap();
        assert_eq!(found, ide.join("noisepage"));

        let build = dir.path().join("build").join("debug");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("noisepage"), "").unwrap();

        let found = resolve_server_binary(dir.path(), BuildType::Debug, "noisepage").unwrap();
        assert_eq!(found, build.join("noisepage"));
    }

    #[test]
    fn test_resolve_missing_binary() {
        let dir = TempDir::new().unwrap();
        let err = resolve_server_binary(dir.path(), BuildType::Release, "noisepage").unwrap_err();
        assert!(matches!(err, BenchError::Setup { .. }));
    }

    #[test]
    fn test_primary_server_args() {
        let dir = TempDir::new().unwrap();
        let args = node(&dir, primary_spec()).server_args();
        assert!(args.contains(&"-port=15721".to_string()));
        assert!(args.contains(&"-replication_enable=true".to_string()));
        assert!(args.contains(&"-network_identity=primary".to_string()));
        assert!(args.contains(&"-logging_metrics_enable=true".to_string()));
    }

    #[tokio::test]
    async fn test_setup_without_workload_config_fails() {
        let dir = TempDir::new().unwrap();
        let mut node = node(&dir, primary_spec());

        let err = node.setup().await.unwrap_err();
        assert!(matches!(err, BenchError::Setup { .. }));
        assert_eq!(node.state(), NodeState::Failed);
        assert!(!node.is_running().await);

        node.teardown().await.unwrap();
        assert_eq!(node.state(), NodeState::TornDown);
    }

    #[tokio::test]
    async fn test_teardown_never_started_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut node = node(&dir, primary_spec());

        node.teardown().await.unwrap();
        node.teardown().await.unwrap();
        assert_eq!(node.state(), NodeState::TornDown);
    }

    #[tokio::test]
    async fn test_run_before_setup_rejected() {
        let dir = TempDir::new().unwrap();
        let mut node = node(&dir, primary_spec());
        assert!(matches!(
            node.run().await,
            Err(BenchError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_log_position_uses_probe() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir, primary_spec());
        assert_eq!(node.log_position().await.unwrap(), LogPosition::new(15721));
    }

    const DRIVER_TEMPLATE: &str = "<?xml version=\"1.0\"?>\n<parameters>\n    \
        <DBUrl>jdbc:postgresql://localhost:15721/noisepage?preferQueryMode=simple</DBUrl>\n    \
        <scalefactor>1</scalefactor>\n    <terminals>4</terminals>\n</parameters>\n";

    #[test]
    fn test_xml_element_rewrite() {
        let xml = set_xml_element(DRIVER_TEMPLATE, "scalefactor", "12").unwrap();
        assert_eq!(xml_element(&xml, "scalefactor"), Some("12"));
        assert_eq!(xml_element(&xml, "terminals"), Some("4"));
        assert!(set_xml_element(DRIVER_TEMPLATE, "weights", "1").is_none());
    }

    #[test]
    fn test_retarget_jdbc_url() {
        assert_eq!(
            retarget_jdbc_url("jdbc:postgresql://localhost:5432/db?x=1", "10.0.0.2", 15722).as_deref(),
            Some("jdbc:postgresql://10.0.0.2:15722/db?x=1")
        );
        assert_eq!(
            retarget_jdbc_url("jdbc:postgresql://localhost", "h", 1).as_deref(),
            Some("jdbc:postgresql://h:1")
        );
        assert!(retarget_jdbc_url("not a url", "h", 1).is_none());
    }

    #[tokio::test]
    async fn test_wait_for_workload_reports_exit_status() {
        let dir = TempDir::new().unwrap();
        let mut node = node(&dir, primary_spec());
        assert!(node.wait_for_workload().await.is_ok());

        node.workload_process = Some(Command::new("true").kill_on_drop(true).spawn().unwrap());
        node.wait_for_workload().await.unwrap();
        assert!(node.workload_process.is_none());

        node.workload_process = Some(Command::new("false").kill_on_drop(true).spawn().unwrap());
        assert!(matches!(
            node.wait_for_workload().await,
            Err(BenchError::Workload { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_workload_times_out() {
        let dir = TempDir::new().unwrap();
        let mut node = node(&dir, primary_spec());
        node.workload.timeout_secs = 1;
        node.workload_process = Some(
            Command::new("sleep")
                .arg("30")
                .kill_on_drop(true)
                .spawn()
                .unwrap(),
        );

        let err = node.wait_for_workload().await.unwrap_err();
        assert!(err.to_string().contains("still running"));
        assert!(node.workload_process.is_some());
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use std::net::TcpListener;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        fn write_script(path: &Path, body: &str) {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn exited(pid: u32) -> bool {
            use nix::errno::Errno;
            use nix::sys::signal::kill;
            use nix::unistd::Pid;
            matches!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH))
        }

        /// A primary whose "server" is `server_body` and whose driver records
        /// its arguments in `driver-args.txt`.
        fn live_node(dir: &TempDir, port: u16, server_body: &str) -> ProcessNode {
            write_script(
                &dir.path().join("build").join("release").join("noisepage"),
                server_body,
            );
            let driver_dir = dir.path().join("oltpbench");
            fs::create_dir_all(driver_dir.join("config")).unwrap();
            fs::write(driver_dir.join("config").join("ycsb_config.xml"), DRIVER_TEMPLATE).unwrap();
            write_script(&driver_dir.join("driver.sh"), "echo \"$@\" > driver-args.txt");

            let server = ServerConfig {
                repo_dir: dir.path().to_path_buf(),
                start_attempts: 1,
                start_wait_ms: 0,
                connect_attempts: 50,
                connect_sleep_ms: 20,
                shutdown_grace_ms: 300,
                ..ServerConfig::default()
            };
            let workload = WorkloadConfig {
                driver_bin: driver_dir.join("driver.sh"),
                driver_dir,
                ..WorkloadConfig::default()
            };
            let spec = NodeSpec::Primary(PrimarySpec {
                build_type: BuildType::Release,
                replication_enabled: false,
                async_commit: false,
                oltp_benchmark: OltpBenchmark::Ycsb,
                scale_factor: 7,
                connection_threads: 4,
                port,
            });
            ProcessNode::new(
                spec,
                server,
                workload,
                ReplicaConfig::default(),
                dir.path().join("metrics").join("primary"),
                Arc::new(FixedProbe),
            )
        }

        #[tokio::test]
        async fn test_full_lifecycle_stops_server_gracefully() {
            let dir = TempDir::new().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let mut node = live_node(&dir, port, "exec sleep 30");

            node.setup().await.unwrap();
            assert_eq!(node.state(), NodeState::SettingUp);
            assert!(node.is_running().await);

            let rendered = dir.path().join("metrics").join("primary").join("ycsb_config.xml");
            let xml = fs::read_to_string(&rendered).unwrap();
            assert_eq!(xml_element(&xml, "scalefactor"), Some("7"));
            assert_eq!(
                xml_element(&xml, "DBUrl"),
                Some(format!("jdbc:postgresql://127.0.0.1:{port}/noisepage?preferQueryMode=simple").as_str())
            );

            node.run().await.unwrap();
            assert_eq!(node.state(), NodeState::Running);
            node.wait_for_workload().await.unwrap();

            let args = fs::read_to_string(dir.path().join("oltpbench").join("driver-args.txt")).unwrap();
            let rendered = fs::canonicalize(&rendered).unwrap();
            assert!(args.contains("-b ycsb"));
            assert!(args.contains(&format!("-c {}", rendered.display())));
            assert!(args.contains("--load=true"));

            let pid = node.server_process.as_ref().and_then(Child::id).unwrap();
            let started = Instant::now();
            node.teardown().await.unwrap();
            assert!(started.elapsed() < Duration::from_millis(300), "SIGTERM should stop it");
            assert_eq!(node.state(), NodeState::TornDown);
            assert!(node.server_process.is_none());
            assert!(exited(pid));
            assert!(!node.is_running().await);
        }

        #[tokio::test]
        async fn test_server_ignoring_sigterm_is_killed_after_grace() {
            let dir = TempDir::new().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let mut node = live_node(&dir, port, "trap '' TERM\nwhile :; do sleep 0.1; done");

            node.setup().await.unwrap();
            let pid = node.server_process.as_ref().and_then(Child::id).unwrap();

            let started = Instant::now();
            node.teardown().await.unwrap();
            assert!(started.elapsed() >= Duration::from_millis(300));
            assert_eq!(node.state(), NodeState::TornDown);
            assert!(exited(pid));
        }

        #[tokio::test]
        async fn test_server_exiting_during_startup_fails_setup() {
            let dir = TempDir::new().unwrap();
            let port = {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap().port()
            };
            let mut node = live_node(&dir, port, "echo 'bad flag' >&2\nexit 3");

            let err = node.setup().await.unwrap_err();
            assert!(matches!(err, BenchError::Setup { .. }));
            assert_eq!(node.state(), NodeState::Failed);
            assert!(node.server_process.is_none());

            let log = fs::read_to_string(node.server_log_path()).unwrap();
            assert!(log.contains("bad flag"));

            node.teardown().await.unwrap();
            assert_eq!(node.state(), NodeState::TornDown);
        }
    }
}
