//! Deployment module

pub mod changelog;
pub mod compile;
pub mod executor;
pub mod git;
pub mod install;
pub mod pipeline;
pub mod step;
