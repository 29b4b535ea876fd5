//! Artifact download into uniquely named scratch files

use std::sync::Arc;

use release_feed::Release;
use tracing::{info, warn};

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::release::feed::ArtifactFetcher;

/// What to download for a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub url: String,

    /// File name used when the artifact is installed as-is
    pub name: String,

    /// Published hex SHA-256, if any
    pub sha256: Option<String>,
}

impl ArtifactRef {
    /// First asset, else the zip source archive, else the tarball. `None`
    /// when the release has nothing downloadable.
    pub fn from_release(release: &Release) -> Option<Self> {
        let url = release.artifact_url()?.to_string();
        if url.is_empty() {
            return None;
        }

        match release.primary_asset() {
            Some(asset) => Some(Self {
                url,
                name: asset.name.clone(),
                sha256: asset.sha256().map(str::to_string),
            }),
            None => {
                let extension = if release.zipball_url.as_deref() == Some(url.as_str()) {
                    "zip"
                } else {
                    "tar.gz"
                };
                Some(Self {
                    url,
                    name: format!("{}.{}", release.tag, extension),
                    sha256: None,
                })
            }
        }
    }
}

/// Downloads artifacts to collision-free temp files and checks digests
pub struct ArtifactDownloader {
    fetcher: Arc<dyn ArtifactFetcher>,
    scratch_dir: Option<Dir>,
    prefix: String,
}

impl ArtifactDownloader {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            fetcher,
            scratch_dir: None,
            prefix: "gameops-artifact".to_string(),
        }
    }

    /// Download into `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: Dir) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    fn next_file(&self) -> File {
        match &self.scratch_dir {
            Some(dir) => dir.file(&format!("{}-{}.download", self.prefix, uuid::Uuid::new_v4())),
            None => File::temp(&self.prefix, "download"),
        }
    }

    /// Fetch `artifact` into a fresh temp file. The file is removed again if
    /// the download fails or the digest does not match.
    pub async fn download(&self, artifact: &ArtifactRef) -> Result<File, OpsError> {
        if let Some(dir) = &self.scratch_dir {
            dir.create().await?;
        }
        let dest = self.next_file();

        let downloaded = match self.fetcher.fetch(&artifact.url, &dest).await {
            Ok(downloaded) => downloaded,
            Err(e) => {
                discard(&dest).await;
                return Err(e);
            }
        };

        if let Some(expected) = &artifact.sha256 {
            if !expected.eq_ignore_ascii_case(&downloaded.sha256) {
                discard(&dest).await;
                return Err(OpsError::DownloadError(format!(
                    "digest mismatch for {}: expected {}, got {}",
                    artifact.name, expected, downloaded.sha256
                )));
            }
            info!(name = %artifact.name, "Artifact digest verified");
        }

        Ok(dest)
    }
}

async fn discard(file: &File) {
    if let Err(e) = file.delete().await {
        warn!("Failed to remove partial download {:?}: {}", file.path(), e);
    }
}
