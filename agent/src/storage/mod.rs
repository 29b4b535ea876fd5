//! Local state: layout, settings and the target registry

pub mod layout;
pub mod registry;
pub mod settings;
