//! HTTP clients

pub mod arm;
pub mod client;
pub mod oauth;
pub mod releases;
