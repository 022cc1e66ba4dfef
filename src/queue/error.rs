use std::time::Duration;

use thiserror::Error;

/// Reasons an admission request can fail.
///
/// Every variant is surfaced directly to the `enqueue` caller; the queue
/// never retries internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job {job_id} is already queued or processing")]
    Duplicate { job_id: String },

    #[error("admission queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("job {job_id} timed out after waiting {}ms for a processing slot", .waited.as_millis())]
    Timeout { job_id: String, waited: Duration },

    #[error("job id must not be empty")]
    InvalidJobId,

    #[error("job {job_id} was cancelled while waiting")]
    Cancelled { job_id: String },

    #[error("job {job_id} was dropped because the queue was cleared")]
    Cleared { job_id: String },
}

impl QueueError {
    /// Whether the caller may reasonably submit the same job again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::QueueFull { .. } | QueueError::Timeout { .. } | QueueError::Cleared { .. }
        )
    }

    /// Suggested back-off before retrying, for callers translating this into
    /// a "try again" response upstream.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            QueueError::QueueFull { .. } => Some(Duration::from_secs(10)),
            QueueError::Timeout { .. } | QueueError::Cleared { .. } => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    /// Short user-facing status for the boundary layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            QueueError::Duplicate { .. } => "already processing",
            QueueError::QueueFull { .. } | QueueError::Timeout { .. } | QueueError::Cleared { .. } => {
                "busy, try again"
            }
            QueueError::InvalidJobId => "invalid request",
            QueueError::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_errors_are_retryable() {
        let full = QueueError::QueueFull { capacity: 50 };
        assert!(full.is_retryable());
        assert_eq!(full.retry_after(), Some(Duration::from_secs(10)));
        assert_eq!(full.user_message(), "busy, try again");
    }

    #[test]
    fn test_duplicate_is_not_retryable() {
        let dup = QueueError::Duplicate {
            job_id: "img-1".into(),
        };
        assert!(!dup.is_retryable());
        assert!(dup.retry_after().is_none());
        assert_eq!(dup.user_message(), "already processing");
    }

    #[test]
    fn test_timeout_message_reports_wait() {
        let err = QueueError::Timeout {
            job_id: "img-7".into(),
            waited: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "job img-7 timed out after waiting 1500ms for a processing slot"
        );
    }
}
