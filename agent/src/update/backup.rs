//! Install directory snapshots

use tracing::info;

use crate::errors::OpsError;
use crate::filesys::dir::Dir;

/// Holds at most one full copy of an install directory
#[derive(Debug, Clone)]
pub struct BackupVault {
    backup_dir: Dir,
}

impl BackupVault {
    pub fn new(backup_dir: Dir) -> Self {
        Self { backup_dir }
    }

    pub fn backup_dir(&self) -> &Dir {
        &self.backup_dir
    }

    /// Whether a snapshot is present
    pub async fn exists(&self) -> bool {
        self.backup_dir.exists().await
    }

    /// Replace any previous snapshot with a full copy of `source`
    pub async fn snapshot(&self, source: &Dir) -> Result<u64, OpsError> {
        if !source.exists().await {
            return Err(OpsError::BackupError(format!(
                "install directory {:?} does not exist",
                source.path()
            )));
        }

        self.backup_dir.delete().await?;
        self.backup_dir.create().await?;

        let copied = source
            .copy_into(&self.backup_dir)
            .await
            .map_err(|e| OpsError::BackupError(format!("snapshot failed: {}", e)))?;

        info!(files = copied, path = ?self.backup_dir.path(), "Backup snapshot created");
        Ok(copied)
    }

    /// Copy every backed-up file onto `dest`. Files in `dest` that are not in
    /// the snapshot are kept.
    pub async fn restore(&self, dest: &Dir) -> Result<u64, OpsError> {
        if !self.exists().await {
            return Err(OpsError::BackupError("no snapshot to restore".to_string()));
        }

        let copied = self
            .backup_dir
            .copy_into(dest)
            .await
            .map_err(|e| OpsError::BackupError(format!("restore failed: {}", e)))?;

        info!(files = copied, path = ?dest.path(), "Backup snapshot restored");
        Ok(copied)
    }
}
