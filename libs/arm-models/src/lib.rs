//! Resource Manager models
//!
//! Request and response bodies for the compute and network resources
//! created during provisioning.

pub mod models;
