//! Data models

pub mod deployment;
pub mod target;
pub mod update;
