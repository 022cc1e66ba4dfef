//! Synthetic workload driver.
//!
//! Pushes a batch of fake enhancement jobs with random tiers and work times
//! through an [`AdmissionQueue`] and summarises how the queue treated them.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::executor::{run_job, EnhancementOutput, Enhancer, JobError, JobReport, JobRequest};
use crate::queue::{AdmissionQueue, PriorityTier, QueueError};

/// Shape of the synthetic workload.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub jobs: usize,
    pub min_work_ms: u64,
    pub max_work_ms: u64,
    /// Gap between consecutive submissions.
    pub arrival_gap_ms: u64,
    /// Chance that a submission reuses an earlier job id.
    pub duplicate_ratio: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            jobs: 40,
            min_work_ms: 50,
            max_work_ms: 400,
            arrival_gap_ms: 5,
            duplicate_ratio: 0.1,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            anyhow::bail!("simulation needs at least one job");
        }
        if self.min_work_ms > self.max_work_ms {
            anyhow::bail!(
                "min work ({}ms) exceeds max work ({}ms)",
                self.min_work_ms,
                self.max_work_ms
            );
        }
        if !(0.0..=1.0).contains(&self.duplicate_ratio) {
            anyhow::bail!("duplicate ratio must be between 0 and 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub completed: usize,
    pub mean_wait_ms: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted: usize,
    pub completed: usize,
    pub rejected_full: usize,
    pub rejected_duplicate: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub peak_active: usize,
    pub peak_waiting: usize,
    pub max_concurrent: usize,
    pub per_tier: BTreeMap<PriorityTier, TierStats>,
    pub elapsed_ms: u64,
}

impl SimulationReport {
    /// Every submission ends up in exactly one bucket.
    pub fn accounted(&self) -> usize {
        self.completed + self.rejected_full + self.rejected_duplicate + self.timed_out + self.failed
    }
}

// ---------------------------------------------------------------------------
// Synthetic enhancer
// ---------------------------------------------------------------------------

/// Sleeps for a pre-drawn duration per job and samples queue pressure.
struct SimulatedEnhancer {
    queue: AdmissionQueue,
    work: HashMap<String, Duration>,
    peak_active: AtomicUsize,
    peak_waiting: AtomicUsize,
}

#[async_trait::async_trait]
impl Enhancer for SimulatedEnhancer {
    async fn enhance(&self, job: &JobRequest) -> Result<EnhancementOutput> {
        let status = self.queue.status();
        self.peak_active
            .fetch_max(status.active_count, Ordering::Relaxed);
        self.peak_waiting
            .fetch_max(status.queue_length, Ordering::Relaxed);

        let work = self
            .work
            .get(&job.job_id)
            .copied()
            .with_context(|| format!("no work drawn for job {}", job.job_id))?;
        tokio::time::sleep(work).await;
        Ok(EnhancementOutput {
            output_ref: format!("simulated/{}.jpg", job.job_id),
        })
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run the workload described by `sim` through `queue`.
pub async fn run(queue: &AdmissionQueue, sim: &SimulationConfig) -> Result<SimulationReport> {
    sim.validate()?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut rng = match sim.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut requests = Vec::with_capacity(sim.jobs);
    let mut work = HashMap::new();
    for i in 0..sim.jobs {
        let tier = PriorityTier::ALL[rng.gen_range(0..PriorityTier::ALL.len())];
        let job_id = if i > 0 && rng.gen_bool(sim.duplicate_ratio) {
            let earlier: &JobRequest = &requests[rng.gen_range(0..i)];
            earlier.job_id.clone()
        } else {
            format!("img-{i:04}")
        };
        work.entry(job_id.clone())
            .or_insert_with(|| Duration::from_millis(rng.gen_range(sim.min_work_ms..=sim.max_work_ms)));
        requests.push(JobRequest::new(job_id, tier).with_owner(format!("agent-{}", i % 7)));
    }

    info!(
        %run_id,
        jobs = sim.jobs,
        max_concurrent = queue.config().max_concurrent,
        "starting simulation"
    );

    let enhancer = Arc::new(SimulatedEnhancer {
        queue: queue.clone(),
        work,
        peak_active: AtomicUsize::new(0),
        peak_waiting: AtomicUsize::new(0),
    });

    let clock = Instant::now();
    let mut tasks = JoinSet::new();
    for (i, request) in requests.into_iter().enumerate() {
        let queue = queue.clone();
        let enhancer = Arc::clone(&enhancer);
        let delay = arrival_delay(sim.arrival_gap_ms, i);
        tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            run_job(&queue, enhancer.as_ref(), &request).await
        });
    }

    let mut outcomes = Vec::with_capacity(sim.jobs);
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.context("simulated job panicked")?);
    }

    let mut report = SimulationReport {
        run_id,
        started_at,
        submitted: sim.jobs,
        completed: 0,
        rejected_full: 0,
        rejected_duplicate: 0,
        timed_out: 0,
        failed: 0,
        peak_active: enhancer.peak_active.load(Ordering::Relaxed),
        peak_waiting: enhancer.peak_waiting.load(Ordering::Relaxed),
        max_concurrent: queue.config().max_concurrent,
        per_tier: BTreeMap::new(),
        elapsed_ms: clock.elapsed().as_millis() as u64,
    };
    tally(&mut report, outcomes);

    info!(
        %run_id,
        completed = report.completed,
        timed_out = report.timed_out,
        rejected_full = report.rejected_full,
        rejected_duplicate = report.rejected_duplicate,
        peak_active = report.peak_active,
        "simulation finished"
    );
    Ok(report)
}

/// Submission offset of the `index`th job, saturating on huge gaps.
fn arrival_delay(gap_ms: u64, index: usize) -> Duration {
    Duration::from_millis(gap_ms.saturating_mul(index as u64))
}

fn tally(report: &mut SimulationReport, outcomes: Vec<Result<JobReport, JobError>>) {
    let mut waits: BTreeMap<PriorityTier, Vec<u64>> = BTreeMap::new();
    for outcome in outcomes {
        match outcome {
            Ok(job) => {
                report.completed += 1;
                waits
                    .entry(job.tier)
                    .or_default()
                    .push(job.waited.as_millis() as u64);
            }
            Err(JobError::Admission(QueueError::QueueFull { .. })) => report.rejected_full += 1,
            Err(JobError::Admission(QueueError::Duplicate { .. })) => {
                report.rejected_duplicate += 1
            }
            Err(JobError::Admission(QueueError::Timeout { .. })) => report.timed_out += 1,
            Err(e) => {
                debug!(error = %e, "simulated job failed");
                report.failed += 1;
            }
        }
    }

    for (tier, samples) in waits {
        let total: u64 = samples.iter().sum();
        report.per_tier.insert(
            tier,
            TierStats {
                completed: samples.len(),
                mean_wait_ms: total / samples.len() as u64,
                max_wait_ms: samples.iter().copied().max().unwrap_or(0),
            },
        );
    }
}

/// Human-readable summary of a report.
pub fn render_table(report: &SimulationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nphotoqueue simulation {}", report.run_id);
    let _ = writeln!(
        out,
        "{} jobs, max {} concurrent, {} ms elapsed",
        report.submitted, report.max_concurrent, report.elapsed_ms
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<20} | {:>6}", "Outcome", "Jobs");
    let _ = writeln!(out, "{:-<20}-|-{:->6}", "", "");
    for (label, count) in [
        ("completed", report.completed),
        ("rejected (full)", report.rejected_full),
        ("rejected (duplicate)", report.rejected_duplicate),
        ("timed out", report.timed_out),
        ("failed", report.failed),
    ] {
        let _ = writeln!(out, "{:<20} | {:>6}", label, count);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<14} | {:>9} | {:>13} | {:>12}",
        "Tier", "Completed", "Mean wait ms", "Max wait ms"
    );
    let _ = writeln!(out, "{:-<14}-|-{:->9}-|-{:->13}-|-{:->12}", "", "", "", "");
    for (tier, stats) in &report.per_tier {
        let _ = writeln!(
            out,
            "{:<14} | {:>9} | {:>13} | {:>12}",
            tier, stats.completed, stats.mean_wait_ms, stats.max_wait_ms
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Peak active: {}   Peak waiting: {}",
        report.peak_active, report.peak_waiting
    );
    out
}
