//! Artifact extraction and installation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Archives nested inside an archive are unpacked at most this many levels deep
const MAX_NESTED_ARCHIVES: usize = 2;

/// Installs a downloaded artifact over an install directory
#[async_trait]
pub trait PayloadInstaller: Send + Sync {
    /// Replace files in `install_dir` with the artifact's payload. Returns the
    /// number of files written.
    async fn install(
        &self,
        artifact: &File,
        artifact_name: &str,
        install_dir: &Dir,
    ) -> Result<u64, OpsError>;
}

/// Artifact formats recognised by their leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Zip,
    TarGz,
    /// Anything else is installed as a single file
    Raw,
}

impl ArtifactKind {
    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            ArtifactKind::Zip
        } else if header.starts_with(&[0x1f, 0x8b]) {
            ArtifactKind::TarGz
        } else {
            ArtifactKind::Raw
        }
    }

    pub async fn detect(path: &Path) -> Result<Self, OpsError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Self::sniff(&header[..filled]))
    }

    pub fn is_archive(&self) -> bool {
        !matches!(self, ArtifactKind::Raw)
    }
}

/// Extracts zip / tar.gz artifacts and copies their payload over the install
/// directory
#[derive(Debug, Clone, Default)]
pub struct ArchiveInstaller;

impl ArchiveInstaller {
    pub fn new() -> Self {
        Self
    }

    async fn install_inner(
        &self,
        artifact: &File,
        artifact_name: &str,
        install_dir: &Dir,
        scratch: &mut Vec<Dir>,
    ) -> Result<u64, OpsError> {
        install_dir.create().await?;

        let kind = ArtifactKind::detect(artifact.path()).await?;
        debug!(?kind, name = artifact_name, "Detected artifact kind");

        if !kind.is_archive() {
            let target = install_dir.file(artifact_name);
            tokio::fs::copy(artifact.path(), target.path()).await?;
            target.set_executable().await?;
            info!(path = ?target.path(), "Installed single-file artifact");
            return Ok(1);
        }

        let mut archive_path = artifact.path().to_path_buf();
        let mut archive_kind = kind;
        let mut depth = 0;

        let payload = loop {
            let extract_dir = Dir::create_temp_dir("gameops-extract").await?;
            scratch.push(extract_dir.clone());

            extract(archive_kind, archive_path.clone(), extract_dir.path().to_path_buf()).await?;
            let root = payload_root(&extract_dir).await?;

            depth += 1;
            match nested_archive(&root).await? {
                Some((path, nested_kind)) if depth < MAX_NESTED_ARCHIVES => {
                    debug!(path = ?path, "Payload is a nested archive, extracting again");
                    archive_path = path;
                    archive_kind = nested_kind;
                }
                _ => break root,
            }
        };

        let copied = payload
            .copy_into(install_dir)
            .await
            .map_err(|e| OpsError::InstallError(format!("copy into install dir failed: {}", e)))?;

        info!(files = copied, path = ?install_dir.path(), "Payload installed");
        Ok(copied)
    }
}

#[async_trait]
impl PayloadInstaller for ArchiveInstaller {
    async fn install(
        &self,
        artifact: &File,
        artifact_name: &str,
        install_dir: &Dir,
    ) -> Result<u64, OpsError> {
        let mut scratch = Vec::new();
        let result = self
            .install_inner(artifact, artifact_name, install_dir, &mut scratch)
            .await;

        for dir in scratch {
            if let Err(e) = dir.delete().await {
                warn!("Failed to remove extraction dir {:?}: {}", dir.path(), e);
            }
        }
        if let Err(e) = artifact.delete().await {
            warn!("Failed to remove artifact {:?}: {}", artifact.path(), e);
        }

        result
    }
}

/// A single top-level directory is a wrapper: its contents are the payload
pub async fn payload_root(extracted: &Dir) -> Result<Dir, OpsError> {
    Ok(extracted
        .single_child_dir()
        .await?
        .unwrap_or_else(|| extracted.clone()))
}

/// A payload consisting of exactly one archive file
async fn nested_archive(root: &Dir) -> Result<Option<(PathBuf, ArtifactKind)>, OpsError> {
    let entries = root.entries().await?;
    if let [only] = entries.as_slice() {
        if tokio::fs::metadata(only).await?.is_file() {
            let kind = ArtifactKind::detect(only).await?;
            if kind.is_archive() {
                return Ok(Some((only.clone(), kind)));
            }
        }
    }
    Ok(None)
}

async fn extract(kind: ArtifactKind, archive: PathBuf, dest: PathBuf) -> Result<(), OpsError> {
    tokio::task::spawn_blocking(move || -> Result<(), OpsError> {
        let file = std::fs::File::open(&archive)?;
        match kind {
            ArtifactKind::Zip => {
                let mut zip = zip::ZipArchive::new(file)?;
                zip.extract(&dest)?;
            }
            ArtifactKind::TarGz => {
                let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
                tar.unpack(&dest)
                    .map_err(|e| OpsError::InstallError(format!("tar extraction failed: {}", e)))?;
            }
            ArtifactKind::Raw => {
                return Err(OpsError::InstallError(format!(
                    "{:?} is not an archive",
                    archive
                )));
            }
        }
        Ok(())
    })
    .await?
}
