//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::OpsError;
use crate::models::deployment::ProgressEvent;
use crate::workers::jobs::{self, Job, JobOutcome, QueuedJob};
use crate::workers::update_poller;

/// Run gameops as a daemon until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OpsError> {
    info!("Initializing gameops daemon...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start gameops: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run a single job to completion, streaming its progress to `on_progress`
pub async fn run_once<F>(options: &AppOptions, job: Job, on_progress: F) -> Result<JobOutcome, OpsError>
where
    F: FnMut(ProgressEvent),
{
    let (app_state, job_rx) =
        AppState::init(&options.layout, &options.settings, &options.job_worker).await?;
    let app_state = Arc::new(app_state);

    // The worker exits once the last queue handle is dropped
    let operations = app_state.operations.clone();
    let worker = tokio::spawn(async move {
        jobs::run(operations.as_ref(), job_rx, Box::pin(std::future::pending())).await;
    });

    let outcome = app_state.job_queue.submit(job).await?.wait(on_progress).await;

    app_state.shutdown().await?;
    drop(app_state);
    worker
        .await
        .map_err(|e| OpsError::ShutdownError(e.to_string()))?;

    outcome
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, OpsError> {
    let (app_state, job_rx) =
        AppState::init(&options.layout, &options.settings, &options.job_worker).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_job_worker(
        app_state.clone(),
        job_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_update_poller {
        init_update_poller_worker(
            options.update_poller.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_job_worker(
    app_state: Arc<AppState>,
    job_rx: mpsc::Receiver<QueuedJob>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OpsError> {
    info!("Initializing job worker...");

    let operations = app_state.operations.clone();

    let job_worker_handle = tokio::spawn(async move {
        jobs::run(
            operations.as_ref(),
            job_rx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_job_worker_handle(job_worker_handle)?;
    Ok(())
}

async fn init_update_poller_worker(
    options: update_poller::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OpsError> {
    info!("Initializing update poller worker...");

    let job_queue = app_state.job_queue.clone();

    let update_poller_handle = tokio::spawn(async move {
        update_poller::run(
            &options,
            &job_queue,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_update_poller_handle(update_poller_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ====================================== //

pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    job_worker_handle: Option<JoinHandle<()>>,
    update_poller_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            job_worker_handle: None,
            update_poller_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), OpsError> {
        if self.app_state.is_some() {
            return Err(OpsError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_job_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OpsError> {
        if self.job_worker_handle.is_some() {
            return Err(OpsError::ShutdownError("job_worker_handle already set".to_string()));
        }
        self.job_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_update_poller_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OpsError> {
        if self.update_poller_handle.is_some() {
            return Err(OpsError::ShutdownError("update_poller_handle already set".to_string()));
        }
        self.update_poller_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), OpsError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), OpsError> {
        info!("Shutting down gameops...");

        // 1. Update poller, so no new checks are queued
        if let Some(handle) = self.update_poller_handle.take() {
            handle.await.map_err(|e| OpsError::ShutdownError(e.to_string()))?;
        }

        // 2. Job worker, which finishes the job in flight
        if let Some(handle) = self.job_worker_handle.take() {
            handle.await.map_err(|e| OpsError::ShutdownError(e.to_string()))?;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
