use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

use crate::types::QueuedScan;

/// Errors that can occur when enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
    #[error("job queue is full, try again later")]
    Full,
}

/// Handle that lets the dispatch path push jobs to the worker pool.
///
/// Bounded: `enqueue` never waits, it refuses jobs while the queue is full.
#[derive(Clone, Debug)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedScan>,
}

/// Consuming side of the queue, owned by the worker pool. Each message is
/// delivered to exactly one receiver call.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<QueuedScan>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (JobQueue { tx }, JobReceiver { rx })
    }

    pub fn enqueue(&self, job: QueuedScan) -> Result<(), QueueError> {
        let job_id = job.job_id;
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!(job_id = %job_id, "job queue full, rejecting job");
                QueueError::Full
            }
            TrySendError::Closed(_) => {
                error!(job_id = %job_id, "failed to enqueue job: queue closed");
                QueueError::Closed
            }
        })
    }
}

impl JobReceiver {
    /// Next job, or `None` once every [`JobQueue`] handle is dropped and the queue is drained.
    pub async fn next(&mut self) -> Option<QueuedScan> {
        self.rx.recv().await
    }
}
