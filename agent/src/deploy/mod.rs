//! Server creation

pub mod fsm;
pub mod orchestrator;
