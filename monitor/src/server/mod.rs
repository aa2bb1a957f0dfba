//! HTTP status server

pub mod handlers;
pub mod serve;
pub mod state;
