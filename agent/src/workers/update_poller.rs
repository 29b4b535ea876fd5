//! Polling worker for periodic update checks

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::models::update::UpdateOutcome;
use crate::workers::jobs::{Job, JobOutcome, JobQueue};

/// Update poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Run the update poller. Checks are submitted through the job queue so they
/// never overlap with another update or deployment.
pub async fn run<S, F>(
    options: &Options,
    queue: &JobQueue,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Update poller starting...");

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Update poller shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {
                // Continue with poll
            }
        }
        wait = options.interval;

        debug!("Checking for updates...");
        let ticket = match queue.submit(Job::CheckUpdate).await {
            Ok(ticket) => ticket,
            Err(e) => {
                error!("Unable to queue update check: {}", e);
                continue;
            }
        };

        match ticket.outcome().await {
            Ok(JobOutcome::Update(UpdateOutcome::Updated { from, to })) => {
                info!("Updated server from {} to {}", from, to);
            }
            Ok(JobOutcome::Update(UpdateOutcome::Failed { reason, restored })) => {
                error!("Update failed ({}), backup restored: {}", reason, restored);
            }
            Ok(outcome) => {
                debug!("Update check finished: {:?}", outcome);
            }
            Err(e) => {
                error!("Update check did not complete: {}", e);
            }
        }
    }
}
