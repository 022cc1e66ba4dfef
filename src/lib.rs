//! photoqueue -- admission control for AI photo-enhancement jobs.
//!
//! Bounds how many enhancement jobs run at once, orders the rest by
//! subscription tier and arrival, and refuses duplicate submissions of a
//! photo that is already in flight.

pub mod config;
pub mod executor;
pub mod logging;
pub mod queue;
pub mod simulate;

pub use queue::{AdmissionPermit, AdmissionQueue, PriorityTier, QueueError, QueueStatus};

use anyhow::Result;

/// Build a queue from `config` and push a synthetic workload through it.
pub async fn simulate(
    config: &config::AppConfig,
    sim: &simulate::SimulationConfig,
) -> Result<simulate::SimulationReport> {
    let queue = AdmissionQueue::new(config.queue.clone());
    let report = simulate::run(&queue, sim).await?;
    tracing::debug!(status = ?queue.status(), "queue state after simulation");
    Ok(report)
}
