//! gameops library
//!
//! Self-update, remote deployment and cloud provisioning for dedicated game
//! server hosts.

pub mod app;
pub mod authn;
pub mod cloud;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod progress;
pub mod release;
pub mod remote;
pub mod storage;
pub mod update;
pub mod utils;
pub mod workers;
