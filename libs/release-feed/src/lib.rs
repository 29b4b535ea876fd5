//! Release feed models
//!
//! Wire types for the release-hosting API consumed by the updater.

pub mod models;

pub use models::{Asset, Release};
