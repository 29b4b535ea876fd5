//! Job worker
//!
//! Every update check, server creation and remote start/stop goes through a
//! single queue drained by one worker, so at most one such operation is in
//! flight at a time. Submitting returns a [`JobTicket`] carrying the job's
//! progress stream and its terminal outcome.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cloud::provisioner::BuildRequest;
use crate::errors::OpsError;
use crate::models::deployment::{DeploymentResult, ProgressEvent};
use crate::models::update::UpdateOutcome;
use crate::progress::Progress;
use crate::utils::generate_uuid;

/// Job worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Jobs waiting beyond this many make `submit` wait
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { queue_capacity: 16 }
    }
}

/// Work accepted by the queue
#[derive(Debug, Clone)]
pub enum Job {
    CheckUpdate,
    CreateServer(BuildRequest),
    VmStatus(String),
    StartTarget(String),
    StopTarget(String),
    RestartTarget(String),
    FetchLogs(String),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::CheckUpdate => "check-update",
            Job::CreateServer(_) => "create-server",
            Job::VmStatus(_) => "vm-status",
            Job::StartTarget(_) => "start-target",
            Job::StopTarget(_) => "stop-target",
            Job::RestartTarget(_) => "restart-target",
            Job::FetchLogs(_) => "fetch-logs",
        }
    }
}

/// Terminal result of a job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Update(UpdateOutcome),
    Deployment(DeploymentResult),
    Done { message: String },
    Failed { reason: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            JobOutcome::Update(outcome) => !matches!(outcome, UpdateOutcome::Failed { .. }),
            JobOutcome::Deployment(result) => result.success,
            JobOutcome::Done { .. } => true,
            JobOutcome::Failed { .. } => false,
        }
    }
}

/// Executes jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job, progress: &Progress) -> JobOutcome;
}

pub struct QueuedJob {
    id: String,
    job: Job,
    progress: Progress,
    result_tx: oneshot::Sender<JobOutcome>,
}

/// Handle returned by [`JobQueue::submit`]
pub struct JobTicket {
    pub id: String,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    result: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    /// Wait for the outcome, handing every progress line to `on_progress`
    pub async fn wait<F>(mut self, mut on_progress: F) -> Result<JobOutcome, OpsError>
    where
        F: FnMut(ProgressEvent),
    {
        let outcome = loop {
            tokio::select! {
                Some(event) = self.progress.recv() => on_progress(event),
                result = &mut self.result => break result,
            }
        };

        while let Ok(event) = self.progress.try_recv() {
            on_progress(event);
        }

        outcome.map_err(|_| {
            OpsError::Internal(format!("job {} was dropped before completing", self.id))
        })
    }

    /// Wait for the outcome, discarding progress
    pub async fn outcome(self) -> Result<JobOutcome, OpsError> {
        self.wait(|_| {}).await
    }
}

/// Submission side of the job worker
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    pub fn new(options: &Options) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn submit(&self, job: Job) -> Result<JobTicket, OpsError> {
        let id = generate_uuid();
        let (progress, progress_rx) = Progress::channel();
        let (result_tx, result_rx) = oneshot::channel();

        debug!(job = job.name(), id = %id, "Queueing job");
        self.tx
            .send(QueuedJob {
                id: id.clone(),
                job,
                progress,
                result_tx,
            })
            .await
            .map_err(|_| OpsError::ShutdownError("job worker is not running".to_string()))?;

        Ok(JobTicket {
            id,
            progress: progress_rx,
            result: result_rx,
        })
    }
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("job", &self.job)
            .finish()
    }
}

/// Run the job worker until shutdown or until every queue handle is dropped.
/// A job already running is finished before shutdown is honoured.
pub async fn run(
    handler: &dyn JobHandler,
    mut jobs: mpsc::Receiver<QueuedJob>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Job worker starting...");

    loop {
        let queued = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Job worker shutting down...");
                return;
            }
            queued = jobs.recv() => match queued {
                Some(queued) => queued,
                None => {
                    info!("Job queue closed, job worker exiting");
                    return;
                }
            },
        };

        let QueuedJob {
            id,
            job,
            progress,
            result_tx,
        } = queued;

        let name = job.name();
        info!(job = name, id = %id, "Running job");
        let outcome = handler.handle(job, &progress).await;
        info!(job = name, id = %id, success = outcome.is_success(), "Job finished");

        if result_tx.send(outcome).is_err() {
            warn!(job = name, id = %id, "Job submitter went away before the result");
        }
    }
}
