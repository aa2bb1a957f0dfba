//! Data models

pub mod server;
