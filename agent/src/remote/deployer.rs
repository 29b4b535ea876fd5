//! Mirror a server payload to a remote host and control it there

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::models::target::DeploymentTarget;
use crate::progress::Progress;
use crate::remote::session::{CommandOutput, RemoteConnector, RemoteSession};

/// Remote deployer options
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Local directory mirrored to the target
    pub payload_dir: PathBuf,

    /// Server binary, relative to the deployed directory
    pub binary: String,

    /// Fixed launch arguments
    pub launch_args: Vec<String>,

    /// Interval between upload completion checks
    pub upload_poll_interval: Duration,

    /// Remote log files fetched by [`RemoteDeployer::fetch_logs`]
    pub log_files: Vec<String>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            payload_dir: PathBuf::from("build/server"),
            binary: "GameServer".to_string(),
            launch_args: vec!["-batchmode".to_string(), "-nographics".to_string()],
            upload_poll_interval: Duration::from_millis(100),
            log_files: vec!["stdout.log".to_string(), "stderr.log".to_string()],
        }
    }
}

/// Summary of a successful deploy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub files: u64,
    pub bytes: u64,
}

/// Deploys, starts, stops and restarts the server on deployment targets
pub struct RemoteDeployer {
    connector: Arc<dyn RemoteConnector>,
    options: DeployOptions,
}

impl RemoteDeployer {
    pub fn new(connector: Arc<dyn RemoteConnector>, options: DeployOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn chmod_command(remote_dir: &str) -> String {
        format!("find {} -type f -exec chmod +x {{}} +", remote_dir)
    }

    pub fn launch_command(&self, target: &DeploymentTarget) -> String {
        let mut invocation = format!("./{}", self.options.binary);
        for arg in &self.options.launch_args {
            invocation.push(' ');
            invocation.push_str(arg);
        }
        format!(
            "cd {} && nohup {} > stdout.log 2> stderr.log < /dev/null &",
            target.remote_dir(),
            invocation
        )
    }

    pub fn stop_command(&self, target: &DeploymentTarget) -> String {
        format!("pkill -f {}/{}", target.remote_dir(), self.options.binary)
    }

    /// Mirror the payload directory to the target, mark every file executable
    /// and launch the server. A partially mirrored tree is left in place on
    /// failure; deploying again overwrites it.
    pub async fn deploy(
        &self,
        target: &DeploymentTarget,
        progress: &Progress,
    ) -> Result<DeployReport, OpsError> {
        target.validate()?;

        let payload = Dir::new(&self.options.payload_dir);
        if !payload.exists().await {
            return Err(OpsError::DeployError(format!(
                "payload directory {:?} does not exist",
                payload.path()
            )));
        }

        let remote_dir = target.remote_dir();
        let session = self.connector.session(target);

        progress.info(format!("Connecting to {}:{}", target.host, target.port));
        if let Err(e) = session.open_transfer().await {
            progress.error(format!("Could not open file transfer to {}: {}", target.host, e));
            return Err(e);
        }

        let mirrored = self
            .mirror(session.as_ref(), &payload, target, &remote_dir, progress)
            .await;
        if let Err(e) = session.close_transfer().await {
            warn!("Failed to close file-transfer channel: {}", e);
        }
        let report = mirrored?;

        progress.info("Setting permissions and launching server");
        self.with_shell(session.as_ref(), target, progress, |session| {
            let chmod = Self::chmod_command(&remote_dir);
            let launch = self.launch_command(target);
            async move {
                let output = session.run_command(&chmod).await?;
                expect_success(&chmod, &output, &[])?;
                let output = session.run_command(&launch).await?;
                expect_success(&launch, &output, &[])
            }
        })
        .await?;

        progress.info(format!(
            "Deployed {} files ({} bytes) to {}:{}",
            report.files, report.bytes, target.host, remote_dir
        ));
        Ok(report)
    }

    async fn mirror(
        &self,
        session: &dyn RemoteSession,
        payload: &Dir,
        target: &DeploymentTarget,
        remote_dir: &str,
        progress: &Progress,
    ) -> Result<DeployReport, OpsError> {
        // Parents of the payload location first
        let mut prefix = format!("/home/{}", target.username);
        for segment in target.relative_path.split('/').filter(|s| !s.is_empty()) {
            prefix = format!("{}/{}", prefix, segment);
            self.make_directory(session, &prefix, progress).await?;
        }

        let mut report = DeployReport::default();
        let mut failed = 0u64;
        let mut pending = vec![PathBuf::new()];

        while let Some(rel) = pending.pop() {
            let remote = remote_path(remote_dir, &rel);
            if !rel.as_os_str().is_empty() {
                self.make_directory(session, &remote, progress).await?;
            }

            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(payload.path().join(&rel)).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                entries.push((entry.file_name(), entry.file_type().await?.is_dir()));
            }
            entries.sort();

            for (name, is_dir) in entries {
                let child = rel.join(&name);
                if is_dir {
                    pending.push(child);
                    continue;
                }

                let remote_file = remote_path(remote_dir, &child);
                match self
                    .upload(session, &payload.path().join(&child), &remote_file)
                    .await
                {
                    Ok(bytes) => {
                        report.files += 1;
                        report.bytes += bytes;
                        progress.info(format!("Uploaded {} ({} bytes)", child.display(), bytes));
                    }
                    Err(e) => {
                        failed += 1;
                        progress.error(format!("Upload of {} failed: {}", child.display(), e));
                    }
                }
            }
        }

        if failed > 0 {
            return Err(OpsError::DeployError(format!(
                "{} of {} files failed to upload",
                failed,
                failed + report.files
            )));
        }
        Ok(report)
    }

    async fn make_directory(
        &self,
        session: &dyn RemoteSession,
        remote: &str,
        progress: &Progress,
    ) -> Result<(), OpsError> {
        session.make_directory(remote).await.map_err(|e| {
            progress.error(format!("Could not create {}: {}", remote, e));
            e
        })
    }

    async fn upload(
        &self,
        session: &dyn RemoteSession,
        local: &Path,
        remote: &str,
    ) -> Result<u64, OpsError> {
        let ticket = session.upload_file(local, remote).await?;
        while !ticket.is_complete() {
            tokio::time::sleep(self.options.upload_poll_interval).await;
        }
        ticket.outcome().await
    }

    /// Run `f` on an open command channel; the channel is always closed
    async fn with_shell<'a, F, Fut>(
        &self,
        session: &'a dyn RemoteSession,
        target: &DeploymentTarget,
        progress: &Progress,
        f: F,
    ) -> Result<(), OpsError>
    where
        F: FnOnce(&'a dyn RemoteSession) -> Fut,
        Fut: std::future::Future<Output = Result<(), OpsError>>,
    {
        if let Err(e) = session.open_shell().await {
            progress.error(format!("Could not open command channel to {}: {}", target.host, e));
            return Err(e);
        }

        let result = f(session).await;
        if let Err(e) = &result {
            progress.error(format!("Remote command on {} failed: {}", target.host, e));
        }

        if let Err(e) = session.close_shell().await {
            warn!("Failed to close command channel: {}", e);
        }
        result
    }

    async fn run_one(
        &self,
        target: &DeploymentTarget,
        command: String,
        tolerated: &'static [i32],
        progress: &Progress,
    ) -> Result<(), OpsError> {
        target.validate()?;
        let session = self.connector.session(target);
        self.with_shell(session.as_ref(), target, progress, |session| async move {
            let output = session.run_command(&command).await?;
            debug!(status = output.exit_status, "Ran `{}`", command);
            expect_success(&command, &output, tolerated)
        })
        .await
    }

    /// Kill the server processes started from the target's directory. Finding
    /// no running server is not an error.
    pub async fn stop(&self, target: &DeploymentTarget, progress: &Progress) -> Result<(), OpsError> {
        progress.info(format!("Stopping server on {}", target.host));
        // pkill exits 1 when nothing matched
        self.run_one(target, self.stop_command(target), &[1], progress).await
    }

    /// Launch the server detached on the target
    pub async fn start(&self, target: &DeploymentTarget, progress: &Progress) -> Result<(), OpsError> {
        progress.info(format!("Starting server on {}", target.host));
        self.run_one(target, self.launch_command(target), &[], progress).await
    }

    pub async fn restart(&self, target: &DeploymentTarget, progress: &Progress) -> Result<(), OpsError> {
        self.stop(target, progress).await?;
        self.start(target, progress).await
    }

    /// Download the server's stdout/stderr logs into `local_dir`
    pub async fn fetch_logs(
        &self,
        target: &DeploymentTarget,
        local_dir: &Dir,
        progress: &Progress,
    ) -> Result<Vec<PathBuf>, OpsError> {
        target.validate()?;
        local_dir.create().await?;

        let session = self.connector.session(target);
        if let Err(e) = session.open_transfer().await {
            progress.error(format!("Could not open file transfer to {}: {}", target.host, e));
            return Err(e);
        }

        let remote_dir = target.remote_dir();
        let mut fetched = Vec::new();
        for name in &self.options.log_files {
            let local = local_dir.path().join(name);
            match session
                .download_file(&format!("{}/{}", remote_dir, name), &local)
                .await
            {
                Ok(bytes) => {
                    progress.info(format!("Fetched {} ({} bytes)", name, bytes));
                    fetched.push(local);
                }
                Err(e) => progress.warn(format!("Could not fetch {}: {}", name, e)),
            }
        }

        if let Err(e) = session.close_transfer().await {
            warn!("Failed to close file-transfer channel: {}", e);
        }
        info!(host = %target.host, files = fetched.len(), "Fetched remote logs");
        Ok(fetched)
    }
}

fn expect_success(command: &str, output: &CommandOutput, tolerated: &[i32]) -> Result<(), OpsError> {
    if output.success() || tolerated.contains(&output.exit_status) {
        return Ok(());
    }
    Err(OpsError::RemoteError(format!(
        "`{}` exited with status {}: {}",
        command,
        output.exit_status,
        output.stderr.trim()
    )))
}

fn remote_path(root: &str, rel: &Path) -> String {
    let mut path = root.trim_end_matches('/').to_string();
    for component in rel.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    path
}
