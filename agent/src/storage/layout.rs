//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for gameops state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the deployment target registry file
    pub fn registry_file(&self) -> File {
        File::new(self.base_dir.join("targets.json"))
    }

    /// Held while an update or server creation runs, across processes
    pub fn job_lock_file(&self) -> File {
        File::new(self.base_dir.join("jobs.lock"))
    }

    /// Default location of the install snapshot
    pub fn backup_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backup"))
    }

    /// Scratch space for downloaded artifacts
    pub fn downloads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("downloads"))
    }

    /// Logs fetched from remote targets, one subdirectory per target
    pub fn remote_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("remote-logs"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OpsError> {
        Dir::new(self.base_dir.clone()).create().await?;
        self.downloads_dir().create().await?;
        self.remote_logs_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/gameops");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gameops");

        Self::new(base_dir)
    }
}
