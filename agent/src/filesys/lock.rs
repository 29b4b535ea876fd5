//! Cross-process lock file
//!
//! The lock is a file created with `create_new`, holding the owner's PID. A
//! lock whose owner is no longer running is taken over.

use std::path::PathBuf;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::OpsError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct LockFile {
    file: File,
}

/// Held lock; the file is removed on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Take the lock or fail with [`OpsError::Busy`] if a running process
    /// holds it
    pub async fn acquire(&self) -> Result<LockGuard, OpsError> {
        let path = self.file.path().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Second attempt only after removing a stale lock
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let pid = std::process::id().to_string();
                    file.write_all(pid.as_bytes()).await?;
                    file.sync_all().await?;
                    debug!("Acquired lock {:?}", path);
                    return Ok(LockGuard { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = self.holder().await;
                    if let Some(pid) = holder.filter(|pid| process_running(*pid)) {
                        return Err(OpsError::Busy(format!(
                            "another gameops process (pid {}) holds {:?}",
                            pid, path
                        )));
                    }
                    warn!("Removing stale lock {:?} (holder {:?})", path, holder);
                    self.file.delete().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OpsError::Busy(format!("could not acquire {:?}", path)))
    }

    async fn holder(&self) -> Option<u32> {
        self.file.read_string().await.ok()?.trim().parse().ok()
    }
}

fn process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}
