use tracing::info;
use uuid::Uuid;

use crate::queue::{JobQueue, QueueError};
use crate::tracker::JobTracker;
use crate::types::{JobStatus, QueuedScan};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Submission path for scans: validates, records the job, hands it to the queue.
/// Never waits on the scan itself; a full queue is an immediate error.
#[derive(Clone)]
pub struct Dispatcher {
    tracker: JobTracker,
    queue: JobQueue,
}

impl Dispatcher {
    pub fn new(tracker: JobTracker, queue: JobQueue) -> Self {
        Self { tracker, queue }
    }

    pub async fn request_scan(&self, target: Option<&str>) -> Result<Uuid, DispatchError> {
        let target = validate_target(target)?;
        let job_id = self
            .tracker
            .submit_with(target, |job_id| {
                self.queue.enqueue(QueuedScan {
                    job_id,
                    target: target.to_string(),
                })
            })
            .await?;
        info!(job_id = %job_id, scan_target = target, "scan requested");
        Ok(job_id)
    }

    /// Current status; ids that are not UUIDs are simply unknown.
    pub async fn get_status(&self, id: &str) -> Result<JobStatus, DispatchError> {
        let job_id = Uuid::parse_str(id).map_err(|_| DispatchError::NotFound(id.to_string()))?;
        self.tracker
            .status(job_id)
            .await
            .map_err(|_| DispatchError::NotFound(id.to_string()))
    }
}

/// A target is handed to the scanner as one argument, so besides being
/// non-blank it must not look like an option or carry control characters.
pub fn validate_target(target: Option<&str>) -> Result<&str, DispatchError> {
    let target = target.map(str::trim).unwrap_or_default();
    if target.is_empty() {
        return Err(DispatchError::InvalidRequest("Target IP is required".into()));
    }
    if target.starts_with('-') {
        return Err(DispatchError::InvalidRequest(
            "Target must not start with '-'".into(),
        ));
    }
    if target.chars().any(char::is_control) {
        return Err(DispatchError::InvalidRequest(
            "Target contains control characters".into(),
        ));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobState;
    use std::time::Duration;

    fn dispatcher(capacity: usize) -> (Dispatcher, JobTracker, crate::queue::JobReceiver) {
        let tracker = JobTracker::new(Duration::from_secs(60));
        let (queue, rx) = JobQueue::bounded(capacity);
        (Dispatcher::new(tracker.clone(), queue), tracker, rx)
    }

    #[test]
    fn target_validation() {
        assert_eq!(validate_target(Some(" 10.0.0.5 ")), Ok("10.0.0.5"));
        assert_eq!(validate_target(Some("192.168.1.0/24")), Ok("192.168.1.0/24"));
        assert_eq!(validate_target(Some("scanme.nmap.org")), Ok("scanme.nmap.org"));
        for bad in [None, Some(""), Some("   "), Some("-oN /tmp/x"), Some("a\nb")] {
            assert!(matches!(
                validate_target(bad),
                Err(DispatchError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn valid_request_queues_job() {
        let (d, tracker, mut rx) = dispatcher(4);
        let id = d.request_scan(Some("10.0.0.5")).await.unwrap();

        let delivered = rx.next().await.unwrap();
        assert_eq!(delivered.job_id, id);
        assert_eq!(delivered.target, "10.0.0.5");
        assert_eq!(tracker.status(id).await.unwrap().state, JobState::Queued);
        assert_eq!(d.get_status(&id.to_string()).await.unwrap().task_id, id);
    }

    #[tokio::test]
    async fn invalid_request_creates_nothing() {
        let (d, tracker, _rx) = dispatcher(4);
        assert!(d.request_scan(Some("")).await.is_err());
        assert!(d.request_scan(None).await.is_err());
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn closed_queue_fails_call_and_leaves_no_job() {
        let (d, tracker, rx) = dispatcher(1);
        drop(rx);
        assert_eq!(
            d.request_scan(Some("10.0.0.5")).await,
            Err(DispatchError::Queue(QueueError::Closed))
        );
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately_and_leaves_no_job() {
        let (d, tracker, _rx) = dispatcher(1);
        let first = d.request_scan(Some("10.0.0.1")).await.unwrap();
        assert_eq!(
            d.request_scan(Some("10.0.0.2")).await,
            Err(DispatchError::Queue(QueueError::Full))
        );
        assert_eq!(tracker.len().await, 1);
        assert!(tracker.status(first).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids_are_not_found() {
        let (d, _, _rx) = dispatcher(1);
        assert!(matches!(
            d.get_status("not-a-uuid").await,
            Err(DispatchError::NotFound(_))
        ));
        assert!(matches!(
            d.get_status(&Uuid::new_v4().to_string()).await,
            Err(DispatchError::NotFound(_))
        ));
    }
}
