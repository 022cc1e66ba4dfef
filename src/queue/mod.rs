//! Admission queue for bounded concurrent enhancement jobs.
//!
//! Bounds how many jobs are running at once, parks the rest in a waiting
//! list ordered by tier-adjusted arrival time, and rejects duplicates of a
//! job that is already waiting or running. The queue never runs job bodies
//! itself; callers enqueue, do their work once admitted, then release.

pub mod error;
pub mod permit;
pub mod ticket;
pub mod tier;

pub use self::error::QueueError;
pub use self::permit::AdmissionPermit;
pub use self::tier::PriorityTier;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use self::ticket::{JobTicket, WaitingList};
use crate::config::QueueConfig;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time view of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub active_count: usize,
    /// Running job ids, sorted.
    pub processing_job_ids: Vec<String>,
    /// Waiting job ids in the order they will be served.
    pub waiting_job_ids: Vec<String>,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct QueueState {
    waiting: WaitingList,
    /// Running job ids mapped to the ticket sequence that admitted them.
    running: HashMap<String, u64>,
    next_seq: u64,
}

struct Inner {
    config: QueueConfig,
    /// Reference point for arrival millis.
    epoch: Instant,
    state: Mutex<QueueState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Bookkeeping never panics mid-update, so a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit waiting jobs until the concurrency bound is hit or nobody is
    /// left waiting.
    fn pump(&self, state: &mut QueueState) {
        let timeout = self.config.processing_timeout();
        while state.running.len() < self.config.max_concurrent && !state.waiting.is_empty() {
            state.waiting.resort();
            let Some(mut ticket) = state.waiting.pop_front() else {
                break;
            };

            let waited = ticket.enqueued_at.elapsed();
            if waited > timeout {
                reject_timed_out(ticket);
                continue;
            }

            if ticket.is_abandoned() {
                debug!(job_id = ticket.job_id.as_str(), "discarding abandoned ticket");
                continue;
            }

            state.running.insert(ticket.job_id.clone(), ticket.seq);
            if !ticket.resolve(Ok(())) {
                state.running.remove(&ticket.job_id);
                continue;
            }
            debug!(
                job_id = ticket.job_id.as_str(),
                owner_id = ticket.owner_id.as_deref().unwrap_or("-"),
                tier = %ticket.tier,
                waited_ms = waited.as_millis() as u64,
                active = state.running.len(),
                waiting = state.waiting.len(),
                "job admitted"
            );
        }
    }

    /// Reject every waiting ticket that has already exceeded the timeout so
    /// it stops counting against capacity.
    fn expire_overdue(&self, state: &mut QueueState) {
        for ticket in state.waiting.take_overdue(self.config.processing_timeout()) {
            reject_timed_out(ticket);
        }
    }

    /// Remove `job_id` from the running set. With `seq` given, only the
    /// admission that carries that sequence is released.
    fn release_locked(&self, state: &mut QueueState, job_id: &str, seq: Option<u64>) -> bool {
        match (state.running.get(job_id), seq) {
            (None, _) => return false,
            (Some(running_seq), Some(seq)) if *running_seq != seq => return false,
            _ => {}
        }
        state.running.remove(job_id);
        debug!(
            job_id = job_id,
            active = state.running.len(),
            waiting = state.waiting.len(),
            "job released"
        );
        self.pump(state);
        true
    }
}

fn reject_timed_out(mut ticket: JobTicket) {
    let waited = ticket.enqueued_at.elapsed();
    info!(
        job_id = ticket.job_id.as_str(),
        waited_ms = waited.as_millis() as u64,
        "job timed out before admission"
    );
    let job_id = ticket.job_id.clone();
    ticket.resolve(Err(QueueError::Timeout { job_id, waited }));
}

// ---------------------------------------------------------------------------
// AdmissionQueue
// ---------------------------------------------------------------------------

/// Handle to an admission queue. Cloning is cheap and every clone refers to
/// the same queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    pub fn new(config: QueueConfig) -> Self {
        info!(
            max_concurrent = config.max_concurrent,
            max_queue_size = config.max_queue_size,
            timeout_ms = config.processing_timeout_ms,
            "initialized admission queue"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                epoch: Instant::now(),
                state: Mutex::new(QueueState {
                    waiting: WaitingList::new(),
                    running: HashMap::new(),
                    next_seq: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Wait for a processing slot for `job_id`.
    ///
    /// Resolves once the job has been admitted (it is then counted as running
    /// until [`AdmissionQueue::release`]) or fails with
    /// [`QueueError::Timeout`] if no slot frees up within the processing
    /// timeout. Dropping the returned future gives up the place in line, and
    /// gives back the slot if admission had already been granted.
    pub async fn enqueue(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        tier: PriorityTier,
    ) -> Result<(), QueueError> {
        self.enqueue_inner(job_id, owner_id, tier).await.map(|_| ())
    }

    /// Like [`AdmissionQueue::enqueue`], returning a permit that releases the
    /// slot when dropped.
    pub async fn admit(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        tier: PriorityTier,
    ) -> Result<AdmissionPermit, QueueError> {
        let seq = self.enqueue_inner(job_id, owner_id, tier).await?;
        Ok(AdmissionPermit::new(self.clone(), job_id.to_string(), seq))
    }

    async fn enqueue_inner(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        tier: PriorityTier,
    ) -> Result<u64, QueueError> {
        let (seq, enqueued_at, rx) = self.register(job_id, owner_id, tier)?;
        let mut pending = PendingAdmission {
            queue: self,
            job_id,
            seq,
            enqueued_at,
            rx,
            settled: false,
        };
        pending.wait().await.map(|_| seq)
    }

    fn register(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        tier: PriorityTier,
    ) -> Result<(u64, Instant, oneshot::Receiver<Result<(), QueueError>>), QueueError> {
        if job_id.is_empty() {
            return Err(QueueError::InvalidJobId);
        }

        let config = &self.inner.config;
        let mut state = self.inner.lock();
        self.inner.expire_overdue(&mut state);

        if state.running.contains_key(job_id) || state.waiting.contains(job_id) {
            debug!(job_id = job_id, "duplicate job rejected");
            return Err(QueueError::Duplicate {
                job_id: job_id.to_string(),
            });
        }

        if state.waiting.len() >= config.max_queue_size {
            info!(
                job_id = job_id,
                waiting = state.waiting.len(),
                max = config.max_queue_size,
                "job rejected: queue full"
            );
            return Err(QueueError::QueueFull {
                capacity: config.max_queue_size,
            });
        }

        let now = Instant::now();
        let arrival_ms = now.duration_since(self.inner.epoch).as_millis() as i64;
        let rank = arrival_ms - config.tier_offset(tier);
        let seq = state.next_seq;
        state.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        state.waiting.insert(JobTicket {
            job_id: job_id.to_string(),
            owner_id: owner_id.map(str::to_string),
            tier,
            rank,
            seq,
            enqueued_at: now,
            notify: Some(tx),
        });
        debug!(
            job_id = job_id,
            owner_id = owner_id.unwrap_or("-"),
            tier = %tier,
            rank = rank,
            waiting = state.waiting.len(),
            "job enqueued"
        );

        self.inner.pump(&mut state);
        Ok((seq, now, rx))
    }

    /// Give back the slot held by `job_id` and admit the next waiting job.
    ///
    /// Unknown ids are ignored, so failure paths may release defensively.
    pub fn release(&self, job_id: &str) {
        let mut state = self.inner.lock();
        if !self.inner.release_locked(&mut state, job_id, None) {
            debug!(job_id = job_id, "release of unknown job ignored");
        }
    }

    pub(crate) fn release_admission(&self, job_id: &str, seq: u64) {
        let mut state = self.inner.lock();
        self.inner.release_locked(&mut state, job_id, Some(seq));
    }

    /// Withdraw a waiting job. Its `enqueue` call fails with
    /// [`QueueError::Cancelled`]. Returns `false` if `job_id` was not waiting.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut state = self.inner.lock();
        let Some(mut ticket) = state.waiting.remove(job_id) else {
            return false;
        };
        info!(job_id = job_id, "waiting job cancelled");
        ticket.resolve(Err(QueueError::Cancelled {
            job_id: job_id.to_string(),
        }));
        self.inner.pump(&mut state);
        true
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock();
        let mut processing_job_ids: Vec<String> = state.running.keys().cloned().collect();
        processing_job_ids.sort();
        QueueStatus {
            queue_length: state.waiting.len(),
            active_count: state.running.len(),
            processing_job_ids,
            waiting_job_ids: state.waiting.job_ids(),
            max_concurrent: self.inner.config.max_concurrent,
            max_queue_size: self.inner.config.max_queue_size,
        }
    }

    /// Drop every waiting and running job. Waiters fail with
    /// [`QueueError::Cleared`]; outstanding permits become no-ops.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let dropped = state.waiting.drain();
        let waiting = dropped.len();
        for mut ticket in dropped {
            let job_id = ticket.job_id.clone();
            ticket.resolve(Err(QueueError::Cleared { job_id }));
        }
        let running = state.running.len();
        state.running.clear();
        info!(waiting = waiting, running = running, "admission queue cleared");
    }
}

// ---------------------------------------------------------------------------
// PendingAdmission
// ---------------------------------------------------------------------------

/// A registered ticket whose caller is parked until admission or timeout.
struct PendingAdmission<'a> {
    queue: &'a AdmissionQueue,
    job_id: &'a str,
    seq: u64,
    enqueued_at: Instant,
    rx: oneshot::Receiver<Result<(), QueueError>>,
    settled: bool,
}

impl PendingAdmission<'_> {
    async fn wait(&mut self) -> Result<(), QueueError> {
        // A ticket is overdue only once its wait exceeds the timeout.
        let deadline = self.enqueued_at
            + self.queue.inner.config.processing_timeout()
            + Duration::from_millis(1);
        let woke = tokio::select! {
            biased;
            res = &mut self.rx => Some(res),
            _ = tokio::time::sleep_until(deadline) => None,
        };
        let outcome = match woke {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => Err(self.cleared()),
            None => self.expire(),
        };
        self.settled = true;
        outcome
    }

    /// Deadline passed. Whichever of timeout or admission got the lock first
    /// wins.
    fn expire(&mut self) -> Result<(), QueueError> {
        let mut state = self.queue.inner.lock();
        if state.waiting.remove_seq(self.seq).is_some() {
            let waited = self.enqueued_at.elapsed();
            info!(
                job_id = self.job_id,
                waited_ms = waited.as_millis() as u64,
                "job timed out before admission"
            );
            return Err(QueueError::Timeout {
                job_id: self.job_id.to_string(),
                waited,
            });
        }
        drop(state);
        match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(self.cleared()),
        }
    }

    fn cleared(&self) -> QueueError {
        QueueError::Cleared {
            job_id: self.job_id.to_string(),
        }
    }
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.queue.inner.lock();
        if state.waiting.remove_seq(self.seq).is_some() {
            debug!(job_id = self.job_id, "waiter went away, ticket withdrawn");
            return;
        }
        if let Ok(Ok(())) = self.rx.try_recv() {
            debug!(job_id = self.job_id, "waiter went away after admission, releasing");
            self.queue
                .inner
                .release_locked(&mut state, self.job_id, Some(self.seq));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
