//! Self-update transaction
//!
//! One call to [`SelfUpdater::run_update`] compares the local version marker
//! with the latest published release and, when they differ, replaces the
//! installed server:
//!
//! download → snapshot → stop → install → write marker → start
//!
//! A failure after the snapshot puts the snapshot back and restarts the
//! server from it. The marker only moves once every step has succeeded.

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::update::{UpdateOutcome, UpdateStep};
use crate::progress::Progress;
use crate::release::download::{ArtifactDownloader, ArtifactRef};
use crate::release::feed::ReleaseSource;
use crate::update::archive::PayloadInstaller;
use crate::update::backup::BackupVault;
use crate::update::process::ServerProcess;
use crate::update::version::VersionMarker;

type StepError = (UpdateStep, OpsError);

fn at(step: UpdateStep) -> impl FnOnce(OpsError) -> StepError {
    move |e| (step, e)
}

/// Fail-safe updater for the locally installed server
pub struct SelfUpdater {
    feed: Arc<dyn ReleaseSource>,
    downloader: ArtifactDownloader,
    installer: Arc<dyn PayloadInstaller>,
    process: Arc<dyn ServerProcess>,
    vault: BackupVault,
    marker: VersionMarker,
    install_dir: Dir,
}

impl SelfUpdater {
    pub fn new(
        feed: Arc<dyn ReleaseSource>,
        downloader: ArtifactDownloader,
        installer: Arc<dyn PayloadInstaller>,
        process: Arc<dyn ServerProcess>,
        vault: BackupVault,
        marker: VersionMarker,
        install_dir: Dir,
    ) -> Self {
        Self {
            feed,
            downloader,
            installer,
            process,
            vault,
            marker,
            install_dir,
        }
    }

    pub fn install_dir(&self) -> &Dir {
        &self.install_dir
    }

    /// Returns true only when a new version was installed and started
    pub async fn check_and_update(&self) -> bool {
        self.run_update(&Progress::silent()).await.is_updated()
    }

    /// Run one update check. Never returns an error: every failure is folded
    /// into the outcome and reported on `progress`.
    pub async fn run_update(&self, progress: &Progress) -> UpdateOutcome {
        let current = self.marker.read().await;
        progress.info(format!("Installed version: {}", current));

        let release = match self.feed.latest_release().await {
            Ok(Some(release)) => release,
            Ok(None) => {
                progress.info("No published release found");
                return UpdateOutcome::NoRelease {
                    reason: "no published release".to_string(),
                };
            }
            Err(e) => {
                progress.warn(format!("Release feed unavailable: {}", e));
                return UpdateOutcome::NoRelease {
                    reason: e.to_string(),
                };
            }
        };

        // Exact string comparison: any difference, downgrades included, updates
        if release.tag == current {
            progress.info(format!("Already up to date ({})", current));
            return UpdateOutcome::UpToDate { version: current };
        }

        let Some(artifact) = ArtifactRef::from_release(&release) else {
            progress.warn(format!("Release {} has no downloadable asset", release.tag));
            return UpdateOutcome::NoRelease {
                reason: "no downloadable asset".to_string(),
            };
        };

        let stored_marker = match self.marker.stored().await {
            Ok(stored) => stored,
            Err(e) => {
                progress.error(format!("Unable to read version marker: {}", e));
                return UpdateOutcome::Failed {
                    reason: format!("{}: {}", UpdateStep::ReadVersion, e),
                    restored: false,
                };
            }
        };

        progress.info(format!("Updating {} -> {}", current, release.tag));

        let mut snapshot_taken = false;
        match self
            .apply(&release.tag, &artifact, progress, &mut snapshot_taken)
            .await
        {
            Ok(()) => {
                progress.info(format!("Updated to {}", release.tag));
                UpdateOutcome::Updated {
                    from: current,
                    to: release.tag,
                }
            }
            Err((step, e)) => {
                progress.error(format!("Update failed during {}: {}", step, e));
                if step >= UpdateStep::WriteVersion {
                    self.rewind_marker(stored_marker.as_deref(), progress).await;
                }
                let restored = if snapshot_taken {
                    self.recover(progress).await
                } else {
                    false
                };
                UpdateOutcome::Failed {
                    reason: format!("{}: {}", step, e),
                    restored,
                }
            }
        }
    }

    async fn apply(
        &self,
        tag: &str,
        artifact: &ArtifactRef,
        progress: &Progress,
        snapshot_taken: &mut bool,
    ) -> Result<(), StepError> {
        progress.info(format!("Downloading {}", artifact.name));
        let artifact_file = self
            .downloader
            .download(artifact)
            .await
            .map_err(at(UpdateStep::Download))?;

        let installed = self
            .replace_install(artifact, &artifact_file, progress, snapshot_taken)
            .await;
        if installed.is_err() && artifact_file.exists().await {
            if let Err(e) = artifact_file.delete().await {
                warn!("Failed to remove artifact {:?}: {}", artifact_file.path(), e);
            }
        }
        installed?;

        self.marker
            .write(tag)
            .await
            .map_err(at(UpdateStep::WriteVersion))?;

        progress.info("Starting server");
        self.process
            .start()
            .await
            .map_err(at(UpdateStep::StartServer))?;

        Ok(())
    }

    async fn replace_install(
        &self,
        artifact: &ArtifactRef,
        artifact_file: &File,
        progress: &Progress,
        snapshot_taken: &mut bool,
    ) -> Result<(), StepError> {
        progress.info("Backing up install directory");
        self.vault
            .snapshot(&self.install_dir)
            .await
            .map_err(at(UpdateStep::Backup))?;
        *snapshot_taken = true;

        progress.info("Stopping server");
        if let Err(e) = self.process.stop().await {
            progress.warn(format!("Stopping server failed, continuing: {}", e));
        }

        progress.info("Installing files");
        let files = self
            .installer
            .install(artifact_file, &artifact.name, &self.install_dir)
            .await
            .map_err(at(UpdateStep::Install))?;
        info!(files, "Install directory updated");

        Ok(())
    }

    async fn rewind_marker(&self, stored: Option<&str>, progress: &Progress) {
        if let Err(e) = self.marker.reset(stored).await {
            progress.error(format!("Unable to reset version marker: {}", e));
        }
    }

    /// Put the snapshot back and start the server from it. Returns whether the
    /// files were restored.
    async fn recover(&self, progress: &Progress) -> bool {
        progress.warn("Restoring backup");
        if let Err(e) = self.vault.restore(&self.install_dir).await {
            progress.error(format!("Restore failed: {}", e));
            return false;
        }

        progress.info("Backup restored, restarting server");
        if let Err(e) = self.process.start().await {
            progress.error(format!("Restart after restore failed: {}", e));
        }
        true
    }
}
