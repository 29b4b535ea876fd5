//! Progress reporting
//!
//! Every long-running operation reports human-readable status lines through a
//! [`Progress`] handle. Lines are always mirrored to tracing; when a receiver
//! is attached they are also forwarded to the caller (CLI, job submitter).

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::deployment::{ProgressEvent, ProgressLevel};

/// Cloneable progress sink
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Progress {
    /// A sink that only logs
    pub fn silent() -> Self {
        Self { tx: None }
    }

    /// A sink forwarding to the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(ProgressLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.emit(ProgressLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(ProgressLevel::Error, message);
    }

    fn emit(&self, level: ProgressLevel, message: String) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(ProgressEvent { level, message });
        }
    }
}
