//! Release models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published release of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Version identifier, unique per project
    #[serde(rename = "tag_name")]
    pub tag: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub draft: bool,

    #[serde(default)]
    pub prerelease: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    /// Downloadable artifacts, in publication order
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Full source archive (zip)
    #[serde(default, rename = "zipball_url")]
    pub zipball_url: Option<String>,

    /// Full source archive (tar.gz)
    #[serde(default, rename = "tarball_url")]
    pub tarball_url: Option<String>,
}

impl Release {
    /// URL of the artifact to install: the first asset if any, otherwise the
    /// source archive.
    pub fn artifact_url(&self) -> Option<&str> {
        if let Some(asset) = self.assets.first() {
            return Some(asset.download_url.as_str());
        }
        self.zipball_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| self.tarball_url.as_deref().filter(|url| !url.is_empty()))
    }

    /// The asset backing [`Release::artifact_url`], if the artifact is an asset
    pub fn primary_asset(&self) -> Option<&Asset> {
        self.assets.first()
    }
}

/// A single downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// API URL of the asset record
    #[serde(default)]
    pub url: String,

    pub name: String,

    #[serde(default)]
    pub content_type: String,

    /// Size in bytes
    #[serde(default)]
    pub size: u64,

    #[serde(rename = "browser_download_url")]
    pub download_url: String,

    /// Published content digest, e.g. `sha256:<hex>`
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    /// Hex SHA-256 digest if the feed published one
    pub fn sha256(&self) -> Option<&str> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
    }
}
