//! Remote shell and file-transfer sessions

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use ssh2::{Session, Sftp};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::models::target::DeploymentTarget;

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Handle on an upload running in the background. Completion is observed by
/// polling [`UploadTicket::is_complete`].
pub struct UploadTicket {
    handle: JoinHandle<Result<u64, OpsError>>,
}

impl UploadTicket {
    pub fn new(handle: JoinHandle<Result<u64, OpsError>>) -> Self {
        Self { handle }
    }

    /// A ticket that is already finished with `result`
    pub fn ready(result: Result<u64, OpsError>) -> Self {
        Self::new(tokio::spawn(async move { result }))
    }

    pub fn is_complete(&self) -> bool {
        self.handle.is_finished()
    }

    /// Bytes transferred, or the transfer error
    pub async fn outcome(self) -> Result<u64, OpsError> {
        self.handle.await?
    }
}

/// Command and file-transfer channels to one host. The two channels are
/// independent connections, opened and closed separately.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn open_transfer(&self) -> Result<(), OpsError>;

    async fn close_transfer(&self) -> Result<(), OpsError>;

    async fn open_shell(&self) -> Result<(), OpsError>;

    async fn close_shell(&self) -> Result<(), OpsError>;

    /// Start uploading `local` to `remote`
    async fn upload_file(&self, local: &Path, remote: &str) -> Result<UploadTicket, OpsError>;

    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, OpsError>;

    /// Create `remote`; an already existing directory is not an error
    async fn make_directory(&self, remote: &str) -> Result<(), OpsError>;

    async fn run_command(&self, command: &str) -> Result<CommandOutput, OpsError>;
}

/// Creates a fresh session per operation
pub trait RemoteConnector: Send + Sync {
    fn session(&self, target: &DeploymentTarget) -> Arc<dyn RemoteSession>;
}

/// SSH session options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,

    /// Per-operation timeout on the SSH session; zero disables it
    pub io_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            io_timeout: Duration::ZERO,
        }
    }
}

/// Opens [`SshSession`]s
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl RemoteConnector for SshConnector {
    fn session(&self, target: &DeploymentTarget) -> Arc<dyn RemoteSession> {
        Arc::new(SshSession::new(target, self.options.clone()))
    }
}

struct Transfer {
    session: Session,
    sftp: Sftp,
}

type Slot<T> = Arc<Mutex<Option<T>>>;

/// libssh2 backed session with password authentication. Every libssh2 call
/// runs on the blocking pool.
pub struct SshSession {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    options: SshOptions,
    transfer: Slot<Transfer>,
    shell: Slot<Session>,
}

impl SshSession {
    pub fn new(target: &DeploymentTarget, options: SshOptions) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            password: target.password.clone(),
            options,
            transfer: Arc::new(Mutex::new(None)),
            shell: Arc::new(Mutex::new(None)),
        }
    }

    fn connect_blocking(&self) -> impl FnOnce() -> Result<Session, OpsError> + Send + 'static {
        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let password = self.password.clone();
        let options = self.options.clone();

        move || {
            let addr = (host.as_str(), port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| OpsError::RemoteError(format!("cannot resolve {}:{}", host, port)))?;
            let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)?;

            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.handshake()?;
            session.userauth_password(&username, password.expose_secret())?;
            if !session.authenticated() {
                return Err(OpsError::RemoteError(format!(
                    "authentication failed for {}@{}",
                    username, host
                )));
            }
            session.set_timeout(options.io_timeout.as_millis() as u32);
            Ok(session)
        }
    }
}

fn lock<T>(slot: &Mutex<Option<T>>) -> Result<std::sync::MutexGuard<'_, Option<T>>, OpsError> {
    slot.lock()
        .map_err(|_| OpsError::RemoteError("session lock poisoned".to_string()))
}

fn with_sftp<R>(slot: &Slot<Transfer>, f: impl FnOnce(&Sftp) -> Result<R, OpsError>) -> Result<R, OpsError> {
    let guard = lock(slot)?;
    let transfer = guard
        .as_ref()
        .ok_or_else(|| OpsError::RemoteError("file-transfer channel is not open".to_string()))?;
    f(&transfer.sftp)
}

fn disconnect(session: &Session) {
    if let Err(e) = session.disconnect(None, "closing", None) {
        debug!("SSH disconnect failed: {}", e);
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn open_transfer(&self) -> Result<(), OpsError> {
        let connect = self.connect_blocking();
        let slot = self.transfer.clone();
        tokio::task::spawn_blocking(move || {
            let session = connect()?;
            let sftp = session.sftp()?;
            *lock(&slot)? = Some(Transfer { session, sftp });
            Ok::<_, OpsError>(())
        })
        .await??;
        info!(host = %self.host, "File-transfer channel open");
        Ok(())
    }

    async fn close_transfer(&self) -> Result<(), OpsError> {
        let slot = self.transfer.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(transfer) = lock(&slot)?.take() {
                drop(transfer.sftp);
                disconnect(&transfer.session);
            }
            Ok::<_, OpsError>(())
        })
        .await??;
        debug!(host = %self.host, "File-transfer channel closed");
        Ok(())
    }

    async fn open_shell(&self) -> Result<(), OpsError> {
        let connect = self.connect_blocking();
        let slot = self.shell.clone();
        tokio::task::spawn_blocking(move || {
            let session = connect()?;
            *lock(&slot)? = Some(session);
            Ok::<_, OpsError>(())
        })
        .await??;
        info!(host = %self.host, "Command channel open");
        Ok(())
    }

    async fn close_shell(&self) -> Result<(), OpsError> {
        let slot = self.shell.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(session) = lock(&slot)?.take() {
                disconnect(&session);
            }
            Ok::<_, OpsError>(())
        })
        .await??;
        debug!(host = %self.host, "Command channel closed");
        Ok(())
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<UploadTicket, OpsError> {
        if lock(&self.transfer)?.is_none() {
            return Err(OpsError::RemoteError(
                "file-transfer channel is not open".to_string(),
            ));
        }

        let slot = self.transfer.clone();
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        let handle = tokio::task::spawn_blocking(move || {
            with_sftp(&slot, |sftp| {
                let mut source = std::fs::File::open(&local)?;
                let mut dest = sftp.create(&remote)?;
                let bytes = std::io::copy(&mut source, &mut dest)?;
                Ok(bytes)
            })
        });
        Ok(UploadTicket::new(handle))
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, OpsError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let slot = self.transfer.clone();
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        tokio::task::spawn_blocking(move || {
            with_sftp(&slot, |sftp| {
                let mut source = sftp.open(&remote)?;
                let mut dest = std::fs::File::create(&local)?;
                let bytes = std::io::copy(&mut source, &mut dest)?;
                Ok(bytes)
            })
        })
        .await?
    }

    async fn make_directory(&self, remote: &str) -> Result<(), OpsError> {
        let slot = self.transfer.clone();
        let path = PathBuf::from(remote);
        tokio::task::spawn_blocking(move || {
            with_sftp(&slot, |sftp| match sftp.mkdir(&path, 0o755) {
                Ok(()) => Ok(()),
                Err(e) => match sftp.stat(&path) {
                    Ok(stat) if stat.is_dir() => {
                        debug!(path = ?path, "Remote directory already exists");
                        Ok(())
                    }
                    _ => Err(OpsError::SshError(e)),
                },
            })
        })
        .await?
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, OpsError> {
        let slot = self.shell.clone();
        let command = command.to_string();
        let output = tokio::task::spawn_blocking(move || {
            let guard = lock(&slot)?;
            let session = guard
                .as_ref()
                .ok_or_else(|| OpsError::RemoteError("command channel is not open".to_string()))?;

            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;

            channel.wait_close()?;
            Ok::<_, OpsError>(CommandOutput {
                stdout,
                stderr,
                exit_status: channel.exit_status()?,
            })
        })
        .await??;

        if !output.success() {
            warn!(
                status = output.exit_status,
                stderr = %output.stderr.trim(),
                "Remote command exited with non-zero status"
            );
        }
        Ok(output)
    }
}
