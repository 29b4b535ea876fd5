//! Error types for gameops

use thiserror::Error;

/// Main error type for gameops
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("SSH error: {0}")]
    SshError(#[from] ssh2::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Release feed error: {0}")]
    FeedError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Install error: {0}")]
    InstallError(String),

    #[error("Backup error: {0}")]
    BackupError(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Remote session error: {0}")]
    RemoteError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Provisioning error: {0}")]
    ProvisionError(String),

    #[error("Cloud API error: {0}")]
    CloudError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OpsError {
    fn from(err: anyhow::Error) -> Self {
        OpsError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for OpsError {
    fn from(err: tokio::task::JoinError) -> Self {
        OpsError::Internal(format!("background task failed: {}", err))
    }
}
