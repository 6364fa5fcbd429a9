//! Job lifecycle tracking.
//!
//! Every state change goes through [`JobTracker`], which validates it against
//! [`JobState::can_transition_to`] under one write lock, so concurrent status
//! readers only ever observe states a job has actually reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{JobOutcome, JobState, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("job not found: {0}")]
    NotFound(Uuid),
}

/// What a worker should do with a delivered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// `queued → running` applied; execute it.
    Started,
    /// Already `running` (redelivery after a lost worker); execute it again.
    Redelivered,
    /// Already terminal; the delivery is a no-op.
    AlreadyFinished(JobState),
}

#[derive(Debug, Clone)]
struct JobRecord {
    target: String,
    state: JobState,
    result: Option<JobOutcome>,
    submitted_at: OffsetDateTime,
    finished: Option<Instant>,
}

impl JobRecord {
    fn queued(target: &str) -> Self {
        Self {
            target: target.to_string(),
            state: JobState::Queued,
            result: None,
            submitted_at: OffsetDateTime::now_utc(),
            finished: None,
        }
    }

    fn status(&self, id: Uuid) -> JobStatus {
        JobStatus {
            task_id: id,
            target: self.target.clone(),
            state: self.state,
            result: self.result.clone(),
            submitted_at: self.submitted_at,
        }
    }
}

/// Shared job table. Terminal jobs are evicted once `retention` has elapsed.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    retention: Duration,
}

impl JobTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Create a `queued` job and return its id.
    pub async fn submit(&self, target: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.write().await.insert(id, JobRecord::queued(target));
        debug!(job_id = %id, scan_target = target, "job queued");
        id
    }

    /// Create a `queued` job only if `admit` accepts its id. `admit` runs while
    /// the table is locked, so either the job is recorded and admitted or
    /// nothing is left behind, and no worker can look the job up in between.
    pub async fn submit_with<E>(
        &self,
        target: &str,
        admit: impl FnOnce(Uuid) -> Result<(), E>,
    ) -> Result<Uuid, E> {
        let id = Uuid::new_v4();
        let mut jobs = self.jobs.write().await;
        admit(id)?;
        jobs.insert(id, JobRecord::queued(target));
        debug!(job_id = %id, scan_target = target, "job queued");
        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatus, TrackerError> {
        let jobs = self.jobs.read().await;
        match jobs.get(&id) {
            Some(record) if !self.expired(record, Instant::now()) => Ok(record.status(id)),
            _ => Err(TrackerError::NotFound(id)),
        }
    }

    pub async fn start(&self, id: Uuid) -> Result<StartDecision, TrackerError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        match record.state {
            JobState::Queued => {
                record.state = JobState::Running;
                info!(job_id = %id, "job running");
                Ok(StartDecision::Started)
            }
            JobState::Running => Ok(StartDecision::Redelivered),
            terminal => Ok(StartDecision::AlreadyFinished(terminal)),
        }
    }

    /// Record a terminal outcome. Returns `false` when the job was already
    /// terminal; the first outcome is kept.
    pub async fn finish(&self, id: Uuid, outcome: JobOutcome) -> Result<bool, TrackerError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        let next = outcome.state();
        if !record.state.can_transition_to(next) {
            debug!(job_id = %id, state = %record.state, "ignoring transition on finished job");
            return Ok(false);
        }
        record.state = next;
        record.result = Some(outcome);
        record.finished = Some(Instant::now());
        info!(job_id = %id, state = %next, "job finished");
        Ok(true)
    }

    /// Remove terminal jobs past the retention window; returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| !self.expired(record, now));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, "evicted finished jobs");
        }
        evicted
    }

    /// Periodically evict expired jobs until `shutdown` fires.
    pub fn spawn_sweeper(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tracker.evict_expired().await;
                    }
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expired(&self, record: &JobRecord, now: Instant) -> bool {
        record
            .finished
            .is_some_and(|at| now.duration_since(at) >= self.retention)
    }
}
