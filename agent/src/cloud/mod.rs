//! Cloud provisioning

pub mod arm;
pub mod naming;
pub mod provisioner;
