use super::AdmissionQueue;

/// RAII handle for an admitted job. The slot is given back when the permit
/// is released or dropped, whichever comes first.
pub struct AdmissionPermit {
    queue: AdmissionQueue,
    job_id: String,
    seq: u64,
    released: bool,
}

impl AdmissionPermit {
    pub(crate) fn new(queue: AdmissionQueue, job_id: String, seq: u64) -> Self {
        Self {
            queue,
            job_id,
            seq,
            released: false,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Release the slot now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.queue.release_admission(&self.job_id, self.seq);
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("job_id", &self.job_id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}
