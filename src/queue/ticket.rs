//! Job tickets and the rank-ordered waiting list.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::QueueError;
use super::tier::PriorityTier;

/// One-shot channel used to wake a parked `enqueue` caller.
pub(crate) type Notifier = oneshot::Sender<Result<(), QueueError>>;

/// A job waiting for a processing slot.
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: String,
    pub owner_id: Option<String>,
    pub tier: PriorityTier,
    /// Arrival millis minus the tier offset. Lower is served first.
    pub rank: i64,
    /// Insertion sequence, breaks ties between equal ranks.
    pub seq: u64,
    pub enqueued_at: Instant,
    pub(crate) notify: Option<Notifier>,
}

impl JobTicket {
    pub fn sort_key(&self) -> (i64, u64) {
        (self.rank, self.seq)
    }

    /// True if the parked caller has gone away (its future was dropped).
    pub(crate) fn is_abandoned(&self) -> bool {
        self.notify.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Wake the parked caller with `outcome`. Returns whether anyone was
    /// still listening.
    pub(crate) fn resolve(&mut self, outcome: Result<(), QueueError>) -> bool {
        match self.notify.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Waiting tickets, kept sorted ascending by `(rank, seq)`.
#[derive(Debug, Default)]
pub struct WaitingList {
    tickets: Vec<JobTicket>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.tickets.iter().any(|t| t.job_id == job_id)
    }

    pub fn contains_seq(&self, seq: u64) -> bool {
        self.tickets.iter().any(|t| t.seq == seq)
    }

    /// Insert keeping sort order. Equal keys land after existing entries.
    pub fn insert(&mut self, ticket: JobTicket) {
        let key = ticket.sort_key();
        let idx = self.tickets.partition_point(|t| t.sort_key() <= key);
        self.tickets.insert(idx, ticket);
    }

    /// Stable re-sort by `(rank, seq)`.
    pub fn resort(&mut self) {
        self.tickets.sort_by_key(JobTicket::sort_key);
    }

    pub fn pop_front(&mut self) -> Option<JobTicket> {
        if self.tickets.is_empty() {
            None
        } else {
            Some(self.tickets.remove(0))
        }
    }

    pub fn remove(&mut self, job_id: &str) -> Option<JobTicket> {
        let idx = self.tickets.iter().position(|t| t.job_id == job_id)?;
        Some(self.tickets.remove(idx))
    }

    pub fn remove_seq(&mut self, seq: u64) -> Option<JobTicket> {
        let idx = self.tickets.iter().position(|t| t.seq == seq)?;
        Some(self.tickets.remove(idx))
    }

    /// Remove and return every ticket that has waited longer than `timeout`.
    pub fn take_overdue(&mut self, timeout: Duration) -> Vec<JobTicket> {
        let (overdue, keep) = std::mem::take(&mut self.tickets)
            .into_iter()
            .partition(|t| t.enqueued_at.elapsed() > timeout);
        self.tickets = keep;
        overdue
    }

    pub fn drain(&mut self) -> Vec<JobTicket> {
        std::mem::take(&mut self.tickets)
    }

    /// Job ids in service order.
    pub fn job_ids(&self) -> Vec<String> {
        self.tickets.iter().map(|t| t.job_id.clone()).collect()
    }
}
