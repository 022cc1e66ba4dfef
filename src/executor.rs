//! Glue between the admission queue and the code that actually enhances a
//! photo.
//!
//! [`run_job`] waits for a slot, runs the [`Enhancer`] body, and gives the
//! slot back on every path.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::queue::{AdmissionQueue, PriorityTier, QueueError};

/// A single enhancement request as seen by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub job_id: String,
    pub owner_id: Option<String>,
    pub tier: PriorityTier,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, tier: PriorityTier) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id: None,
            tier,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

/// What an enhancer hands back for a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancementOutput {
    /// Where the enhanced image ended up (object key, URL, ...).
    pub output_ref: String,
}

/// Outcome of a job that made it through the queue and ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub tier: PriorityTier,
    pub waited: Duration,
    pub ran: Duration,
    pub output: EnhancementOutput,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Admission(#[from] QueueError),

    #[error("enhancement of job {job_id} failed: {source}")]
    Failed {
        job_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The long-running body of a job (e.g. the generative image call).
#[async_trait::async_trait]
pub trait Enhancer: Send + Sync {
    async fn enhance(&self, job: &JobRequest) -> anyhow::Result<EnhancementOutput>;
}

/// Admit `request`, run it through `enhancer`, then release its slot.
pub async fn run_job(
    queue: &AdmissionQueue,
    enhancer: &dyn Enhancer,
    request: &JobRequest,
) -> Result<JobReport, JobError> {
    let started = Instant::now();
    let permit = queue
        .admit(&request.job_id, request.owner_id.as_deref(), request.tier)
        .await?;
    let waited = started.elapsed();

    let run_started = Instant::now();
    let result = enhancer.enhance(request).await;
    let ran = run_started.elapsed();
    permit.release();

    match result {
        Ok(output) => {
            info!(
                job_id = request.job_id.as_str(),
                tier = %request.tier,
                waited_ms = waited.as_millis() as u64,
                ran_ms = ran.as_millis() as u64,
                "job finished"
            );
            Ok(JobReport {
                job_id: request.job_id.clone(),
                tier: request.tier,
                waited,
                ran,
                output,
            })
        }
        Err(source) => {
            warn!(job_id = request.job_id.as_str(), error = %source, "job failed");
            Err(JobError::Failed {
                job_id: request.job_id.clone(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SleepyEnhancer {
        work: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SleepyEnhancer {
        fn new(work: Duration) -> Self {
            Self {
                work,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Enhancer for SleepyEnhancer {
        async fn enhance(&self, job: &JobRequest) -> anyhow::Result<EnhancementOutput> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(EnhancementOutput {
                output_ref: format!("enhanced/{}.jpg", job.job_id),
            })
        }
    }

    struct BrokenEnhancer;

    #[async_trait::async_trait]
    impl Enhancer for BrokenEnhancer {
        async fn enhance(&self, _job: &JobRequest) -> anyhow::Result<EnhancementOutput> {
            anyhow::bail!("model endpoint returned 500")
        }
    }

    fn make_queue(max_concurrent: usize) -> AdmissionQueue {
        AdmissionQueue::new(QueueConfig {
            max_concurrent,
            max_queue_size: 100,
            processing_timeout_ms: 60_000,
            ..QueueConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_job_reports_output() {
        let q = make_queue(1);
        let enhancer = SleepyEnhancer::new(Duration::from_millis(200));
        let req = JobRequest::new("img-1", PriorityTier::Professional).with_owner("agent-9");

        let report = run_job(&q, &enhancer, &req).await.unwrap();
        assert_eq!(report.job_id, "img-1");
        assert_eq!(report.output.output_ref, "enhanced/img-1.jpg");
        assert!(report.ran >= Duration::from_millis(200));
        assert_eq!(q.status().active_count, 0);
    }

    #[tokio::test]
    async fn test_failed_job_still_releases() {
        let q = make_queue(1);
        let req = JobRequest::new("img-2", PriorityTier::Free);

        let err = run_job(&q, &BrokenEnhancer, &req).await.unwrap_err();
        assert!(matches!(err, JobError::Failed { ref job_id, .. } if job_id == "img-2"));
        assert_eq!(q.status().active_count, 0);

        // Same id can be submitted again once the failed attempt is gone.
        assert!(run_job(&q, &BrokenEnhancer, &req).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_jobs_respect_bound() {
        let q = make_queue(3);
        let enhancer = SleepyEnhancer::new(Duration::from_millis(100));
        let requests: Vec<JobRequest> = (0..12)
            .map(|i| JobRequest::new(format!("img-{i}"), PriorityTier::parse_lenient("starter")))
            .collect();

        let results =
            futures::future::join_all(requests.iter().map(|r| run_job(&q, &enhancer, r))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(enhancer.peak.load(Ordering::SeqCst), 3);
        assert_eq!(q.status().active_count, 0);
        assert_eq!(q.status().queue_length, 0);
    }

    #[tokio::test]
    async fn test_duplicate_submission_surfaces_admission_error() {
        let q = make_queue(1);
        q.enqueue("img-3", None, PriorityTier::Free).await.unwrap();

        let req = JobRequest::new("img-3", PriorityTier::Free);
        let err = run_job(&q, &BrokenEnhancer, &req).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Admission(QueueError::Duplicate { .. })
        ));
        assert_eq!(q.status().active_count, 1);
    }
}
