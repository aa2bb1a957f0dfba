//! Daemon supervision

pub mod fsm;
pub mod process;
