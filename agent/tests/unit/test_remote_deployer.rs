//! Remote deployer tests against an in-memory session

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use gameops::errors::OpsError;
use gameops::filesys::dir::Dir;
use gameops::models::deployment::ProgressLevel;
use gameops::models::target::DeploymentTarget;
use gameops::progress::Progress;
use gameops::remote::deployer::{DeployOptions, RemoteDeployer};
use gameops::remote::session::{CommandOutput, RemoteConnector, RemoteSession, UploadTicket};

#[derive(Default)]
struct FakeSession {
    log: Mutex<Vec<String>>,
    dirs: Mutex<Vec<String>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_upload_of: Option<String>,
    fail_commands: bool,
    /// Command prefix answered with a non-zero exit status and stderr
    exit_with: Option<(&'static str, i32, &'static str)>,
}

impl FakeSession {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn open_transfer(&self) -> Result<(), OpsError> {
        self.record("open_transfer");
        Ok(())
    }

    async fn close_transfer(&self) -> Result<(), OpsError> {
        self.record("close_transfer");
        Ok(())
    }

    async fn open_shell(&self) -> Result<(), OpsError> {
        self.record("open_shell");
        Ok(())
    }

    async fn close_shell(&self) -> Result<(), OpsError> {
        self.record("close_shell");
        Ok(())
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<UploadTicket, OpsError> {
        if self.fail_upload_of.as_deref() == Some(remote) {
            return Ok(UploadTicket::ready(Err(OpsError::RemoteError(
                "connection reset".to_string(),
            ))));
        }

        let bytes = tokio::fs::read(local).await?;
        let len = bytes.len() as u64;
        self.files.lock().unwrap().insert(remote.to_string(), bytes);
        Ok(UploadTicket::new(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(len)
        })))
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, OpsError> {
        let contents = format!("log of {}", remote);
        tokio::fs::write(local, &contents).await?;
        Ok(contents.len() as u64)
    }

    async fn make_directory(&self, remote: &str) -> Result<(), OpsError> {
        let mut dirs = self.dirs.lock().unwrap();
        if !dirs.iter().any(|d| d == remote) {
            dirs.push(remote.to_string());
        }
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, OpsError> {
        self.record(format!("run: {}", command));
        if self.fail_commands {
            return Err(OpsError::RemoteError("channel closed".to_string()));
        }
        match self.exit_with {
            Some((prefix, exit_status, stderr)) if command.starts_with(prefix) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_status,
            }),
            _ => Ok(CommandOutput::default()),
        }
    }
}

struct FakeConnector(Arc<FakeSession>);

impl RemoteConnector for FakeConnector {
    fn session(&self, _target: &DeploymentTarget) -> Arc<dyn RemoteSession> {
        self.0.clone()
    }
}

async fn payload() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("maps")).await.unwrap();
    tokio::fs::write(dir.path().join("GameServer"), "binary").await.unwrap();
    tokio::fs::write(dir.path().join("maps/dust.map"), "map").await.unwrap();
    dir
}

fn deployer(payload: &Path, session: Arc<FakeSession>) -> RemoteDeployer {
    RemoteDeployer::new(
        Arc::new(FakeConnector(session)),
        DeployOptions {
            payload_dir: payload.to_path_buf(),
            binary: "GameServer".to_string(),
            launch_args: vec!["-port".to_string(), "7777".to_string()],
            upload_poll_interval: Duration::from_millis(5),
            log_files: vec!["stdout.log".to_string(), "stderr.log".to_string()],
        },
    )
}

fn target() -> DeploymentTarget {
    DeploymentTarget::new("arena.westeurope.cloudapp.azure.com", "deploy", "hunter2", "games/arena")
}

#[tokio::test]
async fn test_deploy_mirrors_tree_then_launches() {
    let payload = payload().await;
    let session = Arc::new(FakeSession::default());
    let deployer = deployer(payload.path(), session.clone());

    let report = deployer.deploy(&target(), &Progress::silent()).await.unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.bytes, 9);

    let files: Vec<String> = session.files.lock().unwrap().keys().cloned().collect();
    assert_eq!(
        files,
        vec![
            "/home/deploy/games/arena/GameServer".to_string(),
            "/home/deploy/games/arena/maps/dust.map".to_string(),
        ]
    );
    assert_eq!(
        session.dirs.lock().unwrap().clone(),
        vec![
            "/home/deploy/games".to_string(),
            "/home/deploy/games/arena".to_string(),
            "/home/deploy/games/arena/maps".to_string(),
        ]
    );
    assert_eq!(
        session.log(),
        vec![
            "open_transfer".to_string(),
            "close_transfer".to_string(),
            "open_shell".to_string(),
            "run: find /home/deploy/games/arena -type f -exec chmod +x {} +".to_string(),
            "run: cd /home/deploy/games/arena && nohup ./GameServer -port 7777 > stdout.log 2> stderr.log < /dev/null &"
                .to_string(),
            "close_shell".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_upload_is_reported_and_blocks_launch() {
    let payload = payload().await;
    let session = Arc::new(FakeSession {
        fail_upload_of: Some("/home/deploy/games/arena/maps/dust.map".to_string()),
        ..Default::default()
    });
    let deployer = deployer(payload.path(), session.clone());

    let (progress, mut rx) = Progress::channel();
    let result = deployer.deploy(&target(), &progress).await;
    drop(progress);

    assert!(matches!(result, Err(OpsError::DeployError(_))));
    assert_eq!(session.log(), vec!["open_transfer", "close_transfer"]);
    // The file that did go through stays on the remote
    assert_eq!(session.files.lock().unwrap().len(), 1);

    let mut errors = Vec::new();
    while let Some(event) = rx.recv().await {
        if event.message.contains("failed") {
            errors.push(event.message);
        }
    }
    assert!(errors.iter().any(|m| m.contains("dust.map")));
}

#[tokio::test]
async fn test_redeploy_is_idempotent() {
    let payload = payload().await;
    let session = Arc::new(FakeSession::default());
    let deployer = deployer(payload.path(), session.clone());

    deployer.deploy(&target(), &Progress::silent()).await.unwrap();
    deployer.deploy(&target(), &Progress::silent()).await.unwrap();

    assert_eq!(session.files.lock().unwrap().len(), 2);
    assert_eq!(session.dirs.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_stop_closes_channel_even_when_command_fails() {
    let session = Arc::new(FakeSession {
        fail_commands: true,
        ..Default::default()
    });
    let deployer = deployer(Path::new("/unused"), session.clone());

    let result = deployer.stop(&target(), &Progress::silent()).await;
    assert!(result.is_err());
    assert_eq!(
        session.log(),
        vec![
            "open_shell",
            "run: pkill -f /home/deploy/games/arena/GameServer",
            "close_shell",
        ]
    );
}

#[tokio::test]
async fn test_restart_stops_then_starts() {
    let session = Arc::new(FakeSession::default());
    let deployer = deployer(Path::new("/unused"), session.clone());

    deployer.restart(&target(), &Progress::silent()).await.unwrap();

    let commands: Vec<String> = session
        .log()
        .into_iter()
        .filter(|e| e.starts_with("run: "))
        .collect();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].contains("pkill -f"));
    assert!(commands[1].contains("nohup ./GameServer"));
}

#[tokio::test]
async fn test_fetch_logs_downloads_configured_files() {
    let session = Arc::new(FakeSession::default());
    let deployer = deployer(Path::new("/unused"), session.clone());
    let logs = tempfile::tempdir().unwrap();

    let fetched = deployer
        .fetch_logs(&target(), &Dir::new(logs.path()), &Progress::silent())
        .await
        .unwrap();

    assert_eq!(fetched.len(), 2);
    let stdout = tokio::fs::read_to_string(logs.path().join("stdout.log")).await.unwrap();
    assert_eq!(stdout, "log of /home/deploy/games/arena/stdout.log");
}

#[tokio::test]
async fn test_nonzero_chmod_fails_deploy_and_skips_launch() {
    let payload = payload().await;
    let session = Arc::new(FakeSession {
        exit_with: Some(("find ", 1, "chmod: Permission denied")),
        ..Default::default()
    });
    let deployer = deployer(payload.path(), session.clone());

    let (progress, mut rx) = Progress::channel();
    let result = deployer.deploy(&target(), &progress).await;
    drop(progress);

    match result {
        Err(OpsError::RemoteError(message)) => assert!(message.contains("Permission denied")),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(!session.log().iter().any(|e| e.contains("nohup")));
    assert_eq!(session.log().last().map(String::as_str), Some("close_shell"));

    let mut errors = Vec::new();
    while let Some(event) = rx.recv().await {
        if event.level == ProgressLevel::Error {
            errors.push(event.message);
        }
    }
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Permission denied"));
}

#[tokio::test]
async fn test_stop_tolerates_no_matching_process() {
    let session = Arc::new(FakeSession {
        exit_with: Some(("pkill ", 1, "")),
        ..Default::default()
    });
    let deployer = deployer(Path::new("/unused"), session.clone());

    deployer.stop(&target(), &Progress::silent()).await.unwrap();
}

#[tokio::test]
async fn test_failed_launch_fails_start() {
    let session = Arc::new(FakeSession {
        exit_with: Some(("cd ", 127, "nohup: not found")),
        ..Default::default()
    });
    let deployer = deployer(Path::new("/unused"), session.clone());

    let result = deployer.start(&target(), &Progress::silent()).await;
    assert!(matches!(result, Err(OpsError::RemoteError(_))));
}
