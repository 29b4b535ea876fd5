//! Self-updater transaction tests

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use release_feed::{Asset, Release};

use gameops::errors::OpsError;
use gameops::filesys::dir::Dir;
use gameops::filesys::file::File;
use gameops::http::client::Downloaded;
use gameops::models::update::UpdateOutcome;
use gameops::progress::Progress;
use gameops::release::download::ArtifactDownloader;
use gameops::release::feed::{ArtifactFetcher, ReleaseSource};
use gameops::update::archive::{ArchiveInstaller, PayloadInstaller};
use gameops::update::backup::BackupVault;
use gameops::update::process::ServerProcess;
use gameops::update::updater::SelfUpdater;
use gameops::update::version::{VersionMarker, VERSION_FILE_NAME};
use gameops::utils::sha256_hash;

// ================================ FAKES ================================== //

enum FeedReply {
    Release(Release),
    Empty,
    Unreachable,
}

struct FakeFeed(FeedReply);

#[async_trait]
impl ReleaseSource for FakeFeed {
    async fn latest_release(&self) -> Result<Option<Release>, OpsError> {
        match &self.0 {
            FeedReply::Release(release) => Ok(Some(release.clone())),
            FeedReply::Empty => Ok(None),
            FeedReply::Unreachable => Err(OpsError::FeedError("connection refused".to_string())),
        }
    }
}

struct FakeFetcher {
    payload: Option<Vec<u8>>,
    calls: Mutex<usize>,
}

impl FakeFetcher {
    fn serving(payload: Vec<u8>) -> Self {
        Self {
            payload: Some(payload),
            calls: Mutex::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            payload: None,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &File) -> Result<Downloaded, OpsError> {
        *self.calls.lock().unwrap() += 1;
        match &self.payload {
            Some(bytes) => {
                tokio::fs::write(dest.path(), bytes).await?;
                Ok(Downloaded {
                    bytes: bytes.len() as u64,
                    sha256: sha256_hash(bytes),
                })
            }
            None => Err(OpsError::DownloadError(format!("503: {}", url))),
        }
    }
}

#[derive(Default)]
struct RecordingProcess {
    events: Mutex<Vec<&'static str>>,
    start_error: Option<&'static str>,
}

impl RecordingProcess {
    fn failing_start(reason: &'static str) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            start_error: Some(reason),
        }
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerProcess for RecordingProcess {
    async fn stop(&self) -> Result<usize, OpsError> {
        self.events.lock().unwrap().push("stop");
        Ok(1)
    }

    async fn start(&self) -> Result<(), OpsError> {
        self.events.lock().unwrap().push("start");
        match self.start_error {
            Some(reason) => Err(OpsError::ProcessError(reason.to_string())),
            None => Ok(()),
        }
    }
}

/// Overwrites one file and then fails, like an extraction dying mid-copy
struct MidCopyFailingInstaller;

#[async_trait]
impl PayloadInstaller for MidCopyFailingInstaller {
    async fn install(
        &self,
        artifact: &File,
        _artifact_name: &str,
        install_dir: &Dir,
    ) -> Result<u64, OpsError> {
        tokio::fs::write(install_dir.path().join("server.bin"), "half-written").await?;
        artifact.delete().await?;
        Err(OpsError::InstallError("disk full".to_string()))
    }
}

// ================================ HELPERS ================================= //

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn release(tag: &str) -> Release {
    Release {
        tag: tag.to_string(),
        name: Some(format!("Arena {}", tag)),
        draft: false,
        prerelease: false,
        created_at: None,
        published_at: None,
        assets: vec![Asset {
            url: String::new(),
            name: "server-linux.zip".to_string(),
            content_type: "application/zip".to_string(),
            size: 0,
            download_url: "https://example.com/server-linux.zip".to_string(),
            digest: None,
        }],
        zipball_url: None,
        tarball_url: None,
    }
}

struct Harness {
    _root: tempfile::TempDir,
    install: Dir,
    backup: Dir,
    fetcher: Arc<FakeFetcher>,
    process: Arc<RecordingProcess>,
    updater: SelfUpdater,
}

async fn read(dir: &Path, rel: &str) -> String {
    tokio::fs::read_to_string(dir.join(rel)).await.unwrap()
}

async fn harness(
    installed_version: &str,
    feed: FeedReply,
    fetcher: FakeFetcher,
    installer: Arc<dyn PayloadInstaller>,
) -> Harness {
    harness_with(
        Some(installed_version),
        feed,
        fetcher,
        installer,
        RecordingProcess::default(),
    )
    .await
}

async fn harness_with(
    installed_version: Option<&str>,
    feed: FeedReply,
    fetcher: FakeFetcher,
    installer: Arc<dyn PayloadInstaller>,
    process: RecordingProcess,
) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let install = Dir::new(root.path().join("install"));
    let backup = Dir::new(root.path().join("backup"));
    install.create().await.unwrap();

    tokio::fs::write(install.path().join("server.bin"), "v1.0").await.unwrap();
    tokio::fs::write(install.path().join("server.cfg"), "port=7777").await.unwrap();
    let marker = VersionMarker::new(install.file(VERSION_FILE_NAME));
    if let Some(version) = installed_version {
        marker.write(version).await.unwrap();
    }

    let fetcher = Arc::new(fetcher);
    let process = Arc::new(process);
    let downloader = ArtifactDownloader::new(fetcher.clone())
        .with_scratch_dir(Dir::new(root.path().join("downloads")));

    let updater = SelfUpdater::new(
        Arc::new(FakeFeed(feed)),
        downloader,
        installer,
        process.clone(),
        BackupVault::new(backup.clone()),
        marker,
        install.clone(),
    );

    Harness {
        _root: root,
        install,
        backup,
        fetcher,
        process,
        updater,
    }
}

fn new_build() -> Vec<u8> {
    zip_bytes(&[("arena/server.bin", "v1.1"), ("arena/maps/dust.map", "map")])
}

// ================================= TESTS ================================== //

#[tokio::test]
async fn test_matching_tag_is_a_noop() {
    let h = harness(
        "1.0.0",
        FeedReply::Release(release("1.0.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    assert!(!h.updater.check_and_update().await);

    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.0.0");
    assert_eq!(read(h.install.path(), "server.bin").await, "v1.0");
    assert_eq!(h.fetcher.calls(), 0);
    assert!(h.process.events().is_empty());
    assert!(!h.backup.exists().await);
}

#[tokio::test]
async fn test_new_tag_installs_and_restarts() {
    let h = harness(
        "1.0.0",
        FeedReply::Release(release("1.1.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    let outcome = h.updater.run_update(&Progress::silent()).await;
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: "1.0.0".to_string(),
            to: "1.1.0".to_string()
        }
    );

    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.1.0");
    assert_eq!(read(h.install.path(), "server.bin").await, "v1.1");
    assert_eq!(read(h.install.path(), "maps/dust.map").await, "map");
    assert!(!h.install.path().join("arena").exists());
    assert_eq!(read(h.install.path(), "server.cfg").await, "port=7777");
    assert_eq!(h.process.events(), vec!["stop", "start"]);

    // The snapshot stays behind until the next attempt
    assert_eq!(read(h.backup.path(), "server.bin").await, "v1.0");
}

#[tokio::test]
async fn test_failed_install_restores_backup_and_restarts() {
    let h = harness(
        "1.0.0",
        FeedReply::Release(release("1.1.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(MidCopyFailingInstaller),
    )
    .await;

    let (progress, mut rx) = Progress::channel();
    let outcome = h.updater.run_update(&progress).await;
    drop(progress);

    match outcome {
        UpdateOutcome::Failed { restored, reason } => {
            assert!(restored);
            assert!(reason.contains("install"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(read(h.install.path(), "server.bin").await, "v1.0");
    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.0.0");
    assert_eq!(h.process.events(), vec!["stop", "start"]);

    let mut messages = Vec::new();
    while let Some(event) = rx.recv().await {
        messages.push(event.message);
    }
    assert!(messages.iter().any(|m| m.contains("Restoring backup")));
}

#[tokio::test]
async fn test_downgrade_still_updates() {
    let h = harness(
        "2.0.0",
        FeedReply::Release(release("1.9.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    assert!(h.updater.check_and_update().await);
    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.9.0");
}

#[tokio::test]
async fn test_tag_comparison_is_case_sensitive() {
    let h = harness(
        "v1.0.0",
        FeedReply::Release(release("V1.0.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    assert!(h.updater.check_and_update().await);
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_unreachable_or_empty_feed_is_not_an_update() {
    for reply in [FeedReply::Unreachable, FeedReply::Empty] {
        let h = harness(
            "1.0.0",
            reply,
            FakeFetcher::serving(new_build()),
            Arc::new(ArchiveInstaller::new()),
        )
        .await;

        let outcome = h.updater.run_update(&Progress::silent()).await;
        assert!(matches!(outcome, UpdateOutcome::NoRelease { .. }));
        assert!(h.process.events().is_empty());
    }
}

#[tokio::test]
async fn test_download_failure_leaves_install_untouched() {
    let h = harness(
        "1.0.0",
        FeedReply::Release(release("1.1.0")),
        FakeFetcher::failing(),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    let outcome = h.updater.run_update(&Progress::silent()).await;
    assert_eq!(
        outcome,
        UpdateOutcome::Failed {
            reason: "download: Download error: 503: https://example.com/server-linux.zip"
                .to_string(),
            restored: false,
        }
    );
    assert!(h.process.events().is_empty());
    assert!(!h.backup.exists().await);
    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.0.0");
}

#[tokio::test]
async fn test_release_without_artifact_is_not_an_update() {
    let mut bare = release("1.1.0");
    bare.assets.clear();

    let h = harness(
        "1.0.0",
        FeedReply::Release(bare),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
    )
    .await;

    let outcome = h.updater.run_update(&Progress::silent()).await;
    assert_eq!(
        outcome,
        UpdateOutcome::NoRelease {
            reason: "no downloadable asset".to_string()
        }
    );
    assert_eq!(h.fetcher.calls(), 0);
    assert!(h.process.events().is_empty());
    assert!(!h.backup.exists().await);
    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.0.0");
}

#[tokio::test]
async fn test_failed_start_on_first_install_removes_marker() {
    let h = harness_with(
        None,
        FeedReply::Release(release("1.1.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
        RecordingProcess::failing_start("exec format error"),
    )
    .await;

    let outcome = h.updater.run_update(&Progress::silent()).await;
    match outcome {
        UpdateOutcome::Failed { reason, restored } => {
            assert!(restored);
            assert!(reason.starts_with("start server"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert!(!h.install.path().join(VERSION_FILE_NAME).exists());
    assert_eq!(read(h.install.path(), "server.bin").await, "v1.0");
    assert_eq!(h.process.events(), vec!["stop", "start", "start"]);

    // The marker did not advance, so the next check tries again
    assert!(!h.updater.check_and_update().await);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_failed_start_keeps_previous_marker() {
    let h = harness_with(
        Some("1.0.0"),
        FeedReply::Release(release("1.1.0")),
        FakeFetcher::serving(new_build()),
        Arc::new(ArchiveInstaller::new()),
        RecordingProcess::failing_start("exec format error"),
    )
    .await;

    let outcome = h.updater.run_update(&Progress::silent()).await;
    assert!(matches!(outcome, UpdateOutcome::Failed { restored: true, .. }));
    assert_eq!(read(h.install.path(), VERSION_FILE_NAME).await, "1.0.0");
    assert_eq!(read(h.install.path(), "server.bin").await, "v1.0");
}
