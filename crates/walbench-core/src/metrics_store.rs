//! Location, relocation and clean-up of metrics artifacts.
//!
//! Each node runs with its own working directory under the metrics
//! directory, so the primary and a replica on the same machine never write
//! the same file. A run takes a [`MetricsLease`] for its whole duration; the
//! lease holds a lock file so two invocations cannot share the directory. A
//! lock whose recorded process has exited is reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{BenchError, BenchResult};
use crate::metrics::MetricsFile;
use crate::node::NodeRole;

const LOCK_FILE_NAME: &str = ".walbench.lock";

/// Handle over the metrics and results directories.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    metrics_dir: PathBuf,
    results_dir: PathBuf,
}

impl MetricsStore {
    pub fn new(metrics_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn metrics_dir(&self) -> &Path {
        &self.metrics_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Working directory of the node with the given role.
    pub fn node_dir(&self, role: NodeRole) -> PathBuf {
        self.metrics_dir.join(role.as_str())
    }

    /// Where a node with `role` writes the `file` stream.
    pub fn path(&self, role: NodeRole, file: MetricsFile) -> PathBuf {
        self.node_dir(role).join(file.file_name())
    }

    /// Every metrics file any node could have written.
    pub fn candidates(&self) -> Vec<(NodeRole, MetricsFile)> {
        NodeRole::ALL
            .iter()
            .flat_map(|role| MetricsFile::ALL.iter().map(move |file| (*role, *file)))
            .collect()
    }

    /// Takes exclusive use of the metrics directory for one run and clears
    /// stale data from the `target` stream.
    pub fn acquire(&self, target: (NodeRole, MetricsFile)) -> BenchResult<MetricsLease<'_>> {
        for role in NodeRole::ALL {
            fs::create_dir_all(self.node_dir(role))?;
        }

        let lock_path = self.metrics_dir.join(LOCK_FILE_NAME);
        let mut lock = match create_lock(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match lock_owner(&lock_path) {
                    Some(pid) if !process_alive(pid) => {
                        warn!(
                            path = %lock_path.display(),
                            pid,
                            "reclaiming metrics lock left by an exited run"
                        );
                        remove_if_exists(&lock_path)?;
                        create_lock(&lock_path).map_err(|e| match e.kind() {
                            ErrorKind::AlreadyExists => BenchError::MetricsLocked(lock_path.clone()),
                            _ => e.into(),
                        })?
                    }
                    _ => return Err(BenchError::MetricsLocked(lock_path)),
                }
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(lock, "{}", std::process::id())?;

        let lease = MetricsLease {
            store: self,
            target,
            lock_path,
        };
        lease.clear_target()?;
        Ok(lease)
    }
}

/// Exclusive use of a [`MetricsStore`] for one run.
///
/// Dropping the lease releases the directory lock.
#[derive(Debug)]
pub struct MetricsLease<'a> {
    store: &'a MetricsStore,
    target: (NodeRole, MetricsFile),
    lock_path: PathBuf,
}

impl<'a> MetricsLease<'a> {
    /// The single metrics file this run measures.
    pub fn target_path(&self) -> PathBuf {
        self.store.path(self.target.0, self.target.1)
    }

    /// Deletes whatever the target stream has recorded so far.
    pub fn clear_target(&self) -> BenchResult<()> {
        let path = self.target_path();
        if remove_if_exists(&path)? {
            debug!(path = %path.display(), "cleared stale metrics");
        }
        Ok(())
    }

    /// Moves the target file into the results directory as `output_name`
    /// and deletes every other candidate file.
    pub fn finish(self, output_name: &str) -> BenchResult<PathBuf> {
        fs::create_dir_all(&self.store.results_dir)?;

        for (role, file) in self.store.candidates() {
            if (role, file) == self.target {
                continue;
            }
            let path = self.store.path(role, file);
            if remove_if_exists(&path)? {
                debug!(path = %path.display(), "deleted unused metrics file");
            }
        }

        let source = self.target_path();
        if !source.exists() {
            return Err(BenchError::MetricsFileMissing(source));
        }

        let destination = self.store.results_dir.join(output_name);
        move_file(&source, &destination)?;
        info!(
            from = %source.display(),
            to = %destination.display(),
            "relocated metrics file"
        );
        Ok(destination)
    }
}

impl Drop for MetricsLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release metrics lock");
        }
    }
}

fn create_lock(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// PID recorded in a lock file, if it holds a plausible one.
fn lock_owner(path: &Path) -> Option<u32> {
    let pid = fs::read_to_string(path).ok()?.trim().parse::<u32>().ok()?;
    (pid > 0 && i32::try_from(pid).is_ok()).then_some(pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM still means the process exists.
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn remove_if_exists(path: &Path) -> BenchResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Renames `from` to `to`, copying across file systems when rename fails.
fn move_file(from: &Path, to: &Path) -> BenchResult<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MetricsStore {
        MetricsStore::new(dir.path().join("metrics"), dir.path().join("results"))
    }

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_acquire_clears_stale_target() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = (NodeRole::Primary, MetricsFile::LogSerializer);
        touch(&store.path(target.0, target.1), "stale");

        let lease = store.acquire(target).unwrap();
        assert!(!lease.target_path().exists());
        assert!(store.node_dir(NodeRole::Replica).is_dir());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = (NodeRole::Replica, MetricsFile::RecoveryManager);

        let lease = store.acquire(target).unwrap();
        assert!(matches!(
            store.acquire(target),
            Err(BenchError::MetricsLocked(_))
        ));

        drop(lease);
        assert!(store.acquire(target).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_of_exited_run_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = (NodeRole::Primary, MetricsFile::LogSerializer);

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        touch(&store.metrics_dir().join(LOCK_FILE_NAME), &format!("{dead_pid}\n"));

        let lease = store.acquire(target).unwrap();
        let owner = fs::read_to_string(store.metrics_dir().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        drop(lease);
    }

    #[test]
    fn test_leaked_lease_of_live_process_stays_locked() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = (NodeRole::Primary, MetricsFile::LogSerializer);

        std::mem::forget(store.acquire(target).unwrap());
        assert!(matches!(
            store.acquire(target),
            Err(BenchError::MetricsLocked(_))
        ));
    }

    #[test]
    fn test_unreadable_lock_owner_stays_locked() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        touch(&store.metrics_dir().join(LOCK_FILE_NAME), "not a pid");

        assert!(matches!(
            store.acquire((NodeRole::Replica, MetricsFile::RecoveryManager)),
            Err(BenchError::MetricsLocked(_))
        ));
    }

    #[test]
    fn test_finish_relocates_target_and_deletes_others() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let target = (NodeRole::Primary, MetricsFile::LogSerializer);
        let lease = store.acquire(target).unwrap();

        touch(&store.path(NodeRole::Primary, MetricsFile::LogSerializer), "data");
        touch(&store.path(NodeRole::Primary, MetricsFile::RecoveryManager), "x");
        touch(&store.path(NodeRole::Replica, MetricsFile::LogSerializer), "x");
        touch(&store.path(NodeRole::Replica, MetricsFile::RecoveryManager), "x");

        let result = lease.finish("run.csv").unwrap();
        assert_eq!(result, store.results_dir().join("run.csv"));
        assert_eq!(fs::read_to_string(&result).unwrap(), "data");

        for (role, file) in store.candidates() {
            assert!(!store.path(role, file).exists());
        }
        let results: Vec<_> = fs::read_dir(store.results_dir()).unwrap().collect();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_finish_without_target_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lease = store
            .acquire((NodeRole::Replica, MetricsFile::RecoveryManager))
            .unwrap();

        assert!(matches!(
            lease.finish("run.csv"),
            Err(BenchError::MetricsFileMissing(_))
        ));
        assert!(!store.metrics_dir().join(LOCK_FILE_NAME).exists());
    }
}
