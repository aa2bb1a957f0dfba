//! Scheduler worker for queued pipelines

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::orchestrator::Orchestrator;

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between scheduling passes
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Run the scheduler worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler worker starting...");

    loop {
        let started = orchestrator.schedule();
        if !started.is_empty() {
            debug!(
                started = started.len(),
                waiting = orchestrator.pending_count(),
                "Scheduling pass finished"
            );
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Scheduler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
