//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::{jobs, update_poller};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Loaded settings file
    pub settings: Settings,

    /// Run the periodic update poller (daemon mode only)
    pub enable_update_poller: bool,

    /// Job worker options
    pub job_worker: jobs::Options,

    /// Update poller options
    pub update_poller: update_poller::Options,
}

impl AppOptions {
    /// Options derived from a settings file
    pub fn from_settings(layout: StorageLayout, settings: Settings) -> Self {
        Self {
            enable_update_poller: settings.update.enabled && settings.update.is_configured(),
            update_poller: update_poller::Options {
                interval: Duration::from_secs(settings.update.poll_interval_secs.max(1)),
                ..Default::default()
            },
            layout,
            settings,
            ..Default::default()
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            settings: Settings::default(),
            enable_update_poller: false,
            job_worker: jobs::Options::default(),
            update_poller: update_poller::Options::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            // Long enough for an in-flight update to finish copying
            max_shutdown_delay: Duration::from_secs(120),
        }
    }
}
