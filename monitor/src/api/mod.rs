//! Command API

pub mod commands;
pub mod router;
pub mod transport;
