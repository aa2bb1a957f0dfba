//! Server Monitor Library
//!
//! Supervises game server daemons, runs deployment pipelines against their
//! source trees and serves an authorized command API.

pub mod api;
pub mod app;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod supervisor;
pub mod utils;
pub mod workers;
