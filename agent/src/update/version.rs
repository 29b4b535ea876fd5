//! Local version marker

use tracing::warn;

use crate::errors::OpsError;
use crate::filesys::file::File;

/// Version reported when no marker exists yet
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Marker file name inside the install directory
pub const VERSION_FILE_NAME: &str = "version.txt";

/// Plain-text version tag persisted next to the installed server
#[derive(Debug, Clone)]
pub struct VersionMarker {
    file: File,
}

impl VersionMarker {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Current version; missing, unreadable or blank markers read as
    /// [`DEFAULT_VERSION`].
    pub async fn read(&self) -> String {
        if !self.file.exists().await {
            return DEFAULT_VERSION.to_string();
        }

        match self.file.read_string().await {
            Ok(contents) => {
                let version = contents.trim();
                if version.is_empty() {
                    DEFAULT_VERSION.to_string()
                } else {
                    version.to_string()
                }
            }
            Err(e) => {
                warn!("Unable to read version marker {:?}: {}", self.file.path(), e);
                DEFAULT_VERSION.to_string()
            }
        }
    }

    /// Overwrite the marker with `version`
    pub async fn write(&self, version: &str) -> Result<(), OpsError> {
        self.file.write_atomic(version.as_bytes()).await
    }

    /// Raw marker contents, `None` when no marker file exists
    pub async fn stored(&self) -> Result<Option<String>, OpsError> {
        if !self.file.exists().await {
            return Ok(None);
        }
        Ok(Some(self.file.read_string().await?))
    }

    /// Put back contents captured by [`VersionMarker::stored`]. `None`
    /// removes the marker.
    pub async fn reset(&self, stored: Option<&str>) -> Result<(), OpsError> {
        match stored {
            Some(contents) => self.file.write_atomic(contents.as_bytes()).await,
            None if self.file.exists().await => self.file.delete().await,
            None => Ok(()),
        }
    }
}
