//! Application state management
//!
//! Every component is built exactly once here and handed to whoever needs it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::authn::credential::{credential_from_options, TokenCredential};
use crate::cloud::arm::ArmComputeClient;
use crate::cloud::provisioner::VmProvisioner;
use crate::deploy::orchestrator::{DeploymentOrchestrator, OrchestratorOptions};
use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::lock::{LockFile, LockGuard};
use crate::models::target::DeploymentTarget;
use crate::progress::Progress;
use crate::release::download::ArtifactDownloader;
use crate::release::feed::ReleaseFeedClient;
use crate::remote::deployer::RemoteDeployer;
use crate::remote::session::SshConnector;
use crate::storage::layout::StorageLayout;
use crate::storage::registry::{JsonFileRegistry, LocationRegistry};
use crate::storage::settings::Settings;
use crate::update::archive::ArchiveInstaller;
use crate::update::backup::BackupVault;
use crate::update::process::ProcessSupervisor;
use crate::update::updater::SelfUpdater;
use crate::update::version::{VersionMarker, VERSION_FILE_NAME};
use crate::workers::jobs::{self, Job, JobHandler, JobOutcome, JobQueue, QueuedJob};

/// Cloud-backed components; absent when cloud settings are incomplete
pub struct CloudServices {
    pub provisioner: Arc<VmProvisioner>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
}

/// Executes queued jobs against the configured components
pub struct Operations {
    layout: StorageLayout,
    registry: Arc<dyn LocationRegistry>,
    deployer: Arc<RemoteDeployer>,
    updater: Result<Arc<SelfUpdater>, String>,
    cloud: Result<CloudServices, String>,
}

impl Operations {
    pub fn new(
        layout: StorageLayout,
        registry: Arc<dyn LocationRegistry>,
        deployer: Arc<RemoteDeployer>,
        updater: Result<Arc<SelfUpdater>, String>,
        cloud: Result<CloudServices, String>,
    ) -> Self {
        Self {
            layout,
            registry,
            deployer,
            updater,
            cloud,
        }
    }

    /// Exclusive hold on the install and cloud state for this job
    async fn lock_exclusive(&self, progress: &Progress) -> Result<LockGuard, JobOutcome> {
        LockFile::new(self.layout.job_lock_file())
            .acquire()
            .await
            .map_err(|e| {
                progress.error(e.to_string());
                JobOutcome::Failed {
                    reason: e.to_string(),
                }
            })
    }

    async fn target(&self, id: &str) -> Result<DeploymentTarget, OpsError> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| OpsError::NotFound(format!("deployment target {}", id)))
    }

    async fn run_remote(&self, job: Job, progress: &Progress) -> Result<String, OpsError> {
        match job {
            Job::StartTarget(id) => {
                let target = self.target(&id).await?;
                self.deployer.start(&target, progress).await?;
                Ok(format!("Started server on {}", target.host))
            }
            Job::StopTarget(id) => {
                let target = self.target(&id).await?;
                self.deployer.stop(&target, progress).await?;
                Ok(format!("Stopped server on {}", target.host))
            }
            Job::RestartTarget(id) => {
                let target = self.target(&id).await?;
                self.deployer.restart(&target, progress).await?;
                Ok(format!("Restarted server on {}", target.host))
            }
            Job::FetchLogs(id) => {
                let target = self.target(&id).await?;
                let dest = self.layout.remote_logs_dir().subdir(&id);
                let fetched = self.deployer.fetch_logs(&target, &dest, progress).await?;
                Ok(format!(
                    "Fetched {} log files into {}",
                    fetched.len(),
                    dest.path().display()
                ))
            }
            other => Err(OpsError::Internal(format!(
                "{} is not a remote job",
                other.name()
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for Operations {
    async fn handle(&self, job: Job, progress: &Progress) -> JobOutcome {
        match job {
            Job::CheckUpdate => match &self.updater {
                Ok(updater) => {
                    let _lock = match self.lock_exclusive(progress).await {
                        Ok(lock) => lock,
                        Err(outcome) => return outcome,
                    };
                    JobOutcome::Update(updater.run_update(progress).await)
                }
                Err(reason) => JobOutcome::Failed {
                    reason: reason.clone(),
                },
            },
            Job::CreateServer(request) => match &self.cloud {
                Ok(cloud) => {
                    let _lock = match self.lock_exclusive(progress).await {
                        Ok(lock) => lock,
                        Err(outcome) => return outcome,
                    };
                    JobOutcome::Deployment(cloud.orchestrator.create_server(&request, progress).await)
                }
                Err(reason) => JobOutcome::Failed {
                    reason: reason.clone(),
                },
            },
            Job::VmStatus(name) => match &self.cloud {
                Ok(cloud) => JobOutcome::Done {
                    message: cloud.provisioner.status(&name).await,
                },
                Err(reason) => JobOutcome::Failed {
                    reason: reason.clone(),
                },
            },
            remote => match self.run_remote(remote, progress).await {
                Ok(message) => JobOutcome::Done { message },
                Err(e) => {
                    progress.error(e.to_string());
                    JobOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        }
    }
}

/// Main application state
pub struct AppState {
    /// Deployment target registry
    pub registry: Arc<dyn LocationRegistry>,

    /// Job executor
    pub operations: Arc<Operations>,

    /// Submission side of the job worker
    pub job_queue: JobQueue,
}

impl AppState {
    /// Initialize application state. The returned receiver feeds the job
    /// worker.
    pub async fn init(
        layout: &StorageLayout,
        settings: &Settings,
        job_options: &jobs::Options,
    ) -> Result<(Self, mpsc::Receiver<QueuedJob>), OpsError> {
        info!("Initializing application state...");
        layout.setup().await?;

        let registry: Arc<dyn LocationRegistry> =
            Arc::new(JsonFileRegistry::new(layout.registry_file()));

        let deployer = Arc::new(RemoteDeployer::new(
            Arc::new(SshConnector::new(settings.remote.ssh_options())),
            settings.remote.deploy_options(),
        ));

        let updater = init_updater(layout, settings).map_err(|e| {
            let reason = format!("self-update unavailable: {}", e);
            warn!("{}", reason);
            reason
        });

        let cloud = init_cloud(settings, deployer.clone(), registry.clone()).map_err(|e| {
            let reason = format!("cloud provisioning unavailable: {}", e);
            warn!("{}", reason);
            reason
        });

        let operations = Arc::new(Operations::new(
            layout.clone(),
            registry.clone(),
            deployer,
            updater,
            cloud,
        ));

        let (job_queue, job_rx) = JobQueue::new(job_options);

        let state = Self {
            registry,
            operations,
            job_queue,
        };
        Ok((state, job_rx))
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), OpsError> {
        info!("Shutting down application state...");
        Ok(())
    }
}

fn init_updater(layout: &StorageLayout, settings: &Settings) -> Result<Arc<SelfUpdater>, OpsError> {
    let update = &settings.update;
    let feed = Arc::new(ReleaseFeedClient::new(update.feed_options())?);
    let downloader = ArtifactDownloader::new(feed.clone()).with_scratch_dir(layout.downloads_dir());

    let install_dir = Dir::new(update.install_dir.clone());
    let backup_dir = update
        .backup_dir
        .clone()
        .map(Dir::new)
        .unwrap_or_else(|| layout.backup_dir());

    Ok(Arc::new(SelfUpdater::new(
        feed,
        downloader,
        Arc::new(ArchiveInstaller::new()),
        Arc::new(ProcessSupervisor::new(update.process_options())),
        BackupVault::new(backup_dir),
        VersionMarker::new(install_dir.file(VERSION_FILE_NAME)),
        install_dir,
    )))
}

fn init_cloud(
    settings: &Settings,
    deployer: Arc<RemoteDeployer>,
    registry: Arc<dyn LocationRegistry>,
) -> Result<CloudServices, OpsError> {
    let cloud = &settings.cloud;
    let credential: Arc<dyn TokenCredential> =
        Arc::from(credential_from_options(cloud.credential_options())?);
    let api = Arc::new(ArmComputeClient::new(cloud.arm_options(), credential)?);

    let provisioner = Arc::new(VmProvisioner::new(api, cloud.provision_options()));
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        provisioner.clone(),
        deployer,
        registry,
        OrchestratorOptions {
            ssh_port: settings.remote.ssh_port,
            relative_path: settings.remote.relative_path.clone(),
            teardown_on_failure: cloud.teardown_on_failure,
        },
    ));

    Ok(CloudServices {
        provisioner,
        orchestrator,
    })
}
