//! Local self-update of an installed server

pub mod archive;
pub mod backup;
pub mod process;
pub mod updater;
pub mod version;
