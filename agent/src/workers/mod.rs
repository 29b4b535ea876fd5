//! Background workers

pub mod jobs;
pub mod update_poller;
