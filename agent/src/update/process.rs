//! Local server process control

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tracing::{debug, info, warn};

use crate::errors::OpsError;

/// The server process managed by the self-updater
#[async_trait]
pub trait ServerProcess: Send + Sync {
    /// Stop every running instance. Returns how many were signalled.
    async fn stop(&self) -> Result<usize, OpsError>;

    /// Launch a new detached instance
    async fn start(&self) -> Result<(), OpsError>;
}

/// Process supervisor options
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Exact OS process name of the server
    pub process_name: String,

    /// Server executable
    pub executable: PathBuf,

    /// Working directory for the launched server
    pub working_dir: PathBuf,

    /// Fixed launch arguments
    pub args: Vec<String>,

    /// How long to wait for a graceful exit before force-killing
    pub stop_timeout: Duration,

    /// Pause after stopping before files are touched
    pub settle_delay: Duration,

    /// Liveness re-check interval while waiting for exit
    pub poll_interval: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            process_name: "GameServer".to_string(),
            executable: PathBuf::from("/opt/gameserver/GameServer"),
            working_dir: PathBuf::from("/opt/gameserver"),
            args: vec!["-batchmode".to_string(), "-nographics".to_string()],
            stop_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Stops and starts the local server through the OS process table
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    options: ProcessOptions,
}

impl ProcessSupervisor {
    pub fn new(options: ProcessOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Terminate every process named `process_name`, force-killing whatever is
    /// still alive after `wait_timeout`. Failures on one process never stop
    /// the others from being handled.
    pub async fn stop_by_name(&self, process_name: &str, wait_timeout: Duration) -> usize {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let pids: Vec<Pid> = sys
            .processes_by_exact_name(OsStr::new(process_name))
            .filter(|p| is_alive(p.status()))
            .map(|p| p.pid())
            .collect();

        if pids.is_empty() {
            debug!(name = process_name, "No running process to stop");
            return 0;
        }

        for pid in &pids {
            match sys.process(*pid).and_then(|p| p.kill_with(Signal::Term)) {
                Some(true) => debug!(%pid, "Sent SIGTERM"),
                Some(false) => warn!(%pid, "Failed to send SIGTERM"),
                // No SIGTERM on this platform
                None => {
                    if let Some(process) = sys.process(*pid) {
                        if !process.kill() {
                            warn!(%pid, "Failed to kill process");
                        }
                    }
                }
            }
        }

        let deadline = Instant::now() + wait_timeout;
        let mut remaining = pids.clone();
        while !remaining.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(self.options.poll_interval).await;
            sys.refresh_processes(ProcessesToUpdate::Some(&remaining), true);
            remaining.retain(|pid| sys.process(*pid).is_some_and(|p| is_alive(p.status())));
        }

        for pid in &remaining {
            warn!(%pid, "Process did not exit in {:?}, killing", wait_timeout);
            if let Some(process) = sys.process(*pid) {
                if !process.kill() {
                    warn!(%pid, "Failed to kill process");
                }
            }
        }

        info!(name = process_name, count = pids.len(), "Stopped server process");
        pids.len()
    }

    /// Launch `executable` detached from this process with stdio discarded.
    /// The child is neither awaited nor checked afterwards.
    pub fn start_detached(
        &self,
        executable: &Path,
        working_dir: &Path,
        args: &[String],
    ) -> Result<u32, OpsError> {
        if !executable.exists() {
            return Err(OpsError::ProcessError(format!(
                "executable {:?} not found",
                executable
            )));
        }

        let mut command = tokio::process::Command::new(executable);
        command
            .current_dir(working_dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| OpsError::ProcessError(format!("failed to launch {:?}: {}", executable, e)))?;

        let pid = child.id().unwrap_or_default();
        info!(pid, path = ?executable, "Launched server process");
        Ok(pid)
    }
}

fn is_alive(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

#[async_trait]
impl ServerProcess for ProcessSupervisor {
    async fn stop(&self) -> Result<usize, OpsError> {
        let stopped = self
            .stop_by_name(&self.options.process_name, self.options.stop_timeout)
            .await;
        tokio::time::sleep(self.options.settle_delay).await;
        Ok(stopped)
    }

    async fn start(&self) -> Result<(), OpsError> {
        self.start_detached(
            &self.options.executable,
            &self.options.working_dir,
            &self.options.args,
        )?;
        Ok(())
    }
}
