//! Release feed access

pub mod download;
pub mod feed;
