//! Self-update models

use serde::{Deserialize, Serialize};

/// Terminal value of one update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Latest tag equals the local version marker
    UpToDate { version: String },

    /// Feed unreachable or returned nothing usable
    NoRelease { reason: String },

    /// New version installed and started
    Updated { from: String, to: String },

    /// The attempt failed; `restored` tells whether the backup was put back
    Failed { reason: String, restored: bool },
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated { .. })
    }
}

/// Steps of the update transaction, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStep {
    ReadVersion,
    FetchRelease,
    ResolveArtifact,
    Download,
    Backup,
    StopServer,
    Install,
    WriteVersion,
    StartServer,
}

impl std::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateStep::ReadVersion => "read version",
            UpdateStep::FetchRelease => "fetch release",
            UpdateStep::ResolveArtifact => "resolve artifact",
            UpdateStep::Download => "download",
            UpdateStep::Backup => "backup",
            UpdateStep::StopServer => "stop server",
            UpdateStep::Install => "install",
            UpdateStep::WriteVersion => "write version",
            UpdateStep::StartServer => "start server",
        };
        f.write_str(name)
    }
}
