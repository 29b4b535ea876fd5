//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::OpsError;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OpsError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OpsError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON to file
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), OpsError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_atomic(contents.as_bytes()).await
    }

    /// Write JSON to a file readable only by its owner (0o600 on Unix). The
    /// temporary file is created with that mode, so the contents are never
    /// exposed with wider permissions.
    pub async fn write_json_private<T: Serialize>(&self, value: &T) -> Result<(), OpsError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.replace_with(contents.as_bytes(), true).await
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), OpsError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Mark the file executable (0o755) on Unix.
    pub async fn set_executable(&self) -> Result<(), OpsError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o755)).await?;
        }
        Ok(())
    }

    /// Atomic write using a temporary file
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), OpsError> {
        self.replace_with(contents, false).await
    }

    async fn replace_with(&self, contents: &[u8], private: bool) -> Result<(), OpsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");

        // A leftover temp file would keep its old mode
        if fs::metadata(&temp_path).await.is_ok() {
            fs::remove_file(&temp_path).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        if private {
            options.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = private;

        // Write to temp file
        let mut file = options.open(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        // Rename to target
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// A uniquely named file under the system temp dir. Nothing is created.
    pub fn temp(prefix: &str, extension: &str) -> File {
        File::new(std::env::temp_dir().join(format!(
            "{}-{}.{}",
            prefix,
            uuid::Uuid::new_v4(),
            extension
        )))
    }
}
