//! Remote hosts: sessions and deployment

pub mod deployer;
pub mod session;
