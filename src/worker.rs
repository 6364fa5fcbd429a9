use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::parser::{parse_scan_output, ParseError};
use crate::queue::JobReceiver;
use crate::scanner::{CapabilityError, ScanCapability};
use crate::store::{FindingStore, StoreError};
use crate::tracker::{JobTracker, StartDecision};
use crate::types::{JobErrorKind, JobOutcome, QueuedScan};

/// Failures inside one job's execution. All of them end the job as `failed`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("could not parse scan output: {0}")]
    Parse(#[from] ParseError),
    #[error("DB error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Capability(_) => JobErrorKind::ScanCapability,
            Self::Timeout(_) => JobErrorKind::Timeout,
            Self::Parse(_) => JobErrorKind::Parse,
            Self::Store(_) => JobErrorKind::Store,
        }
    }
}

/// Executes scan jobs: scan, parse, persist, record the outcome.
///
/// Dependencies are injected at construction; the worker holds no ambient state.
#[derive(Clone)]
pub struct ScanWorker {
    tracker: JobTracker,
    findings: Arc<dyn FindingStore>,
    scanner: Arc<dyn ScanCapability>,
    scan_timeout: Duration,
}

impl ScanWorker {
    pub fn new(
        tracker: JobTracker,
        findings: Arc<dyn FindingStore>,
        scanner: Arc<dyn ScanCapability>,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            findings,
            scanner,
            scan_timeout,
        }
    }

    /// Run one delivered job to a terminal state and return the outcome the
    /// tracker holds for it afterwards.
    ///
    /// Returns `None` when the delivery is skipped: the job is unknown (evicted)
    /// or already terminal. Safe to call again for the same job.
    pub async fn execute(&self, job: QueuedScan) -> Option<JobOutcome> {
        let id = job.job_id;
        match self.tracker.start(id).await {
            Ok(StartDecision::Started) => {}
            Ok(StartDecision::Redelivered) => {
                warn!(job_id = %id, "job redelivered while running, executing again");
            }
            Ok(StartDecision::AlreadyFinished(state)) => {
                debug!(job_id = %id, %state, "skipping delivery of finished job");
                return None;
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "dropping delivery of unknown job");
                return None;
            }
        }

        // Own task so a panic anywhere below still ends the job.
        let this = self.clone();
        let target = job.target;
        let outcome = match tokio::spawn(async move { this.run(&target).await }).await {
            Ok(Ok(count)) => {
                info!(job_id = %id, count, "scan job succeeded");
                JobOutcome::Success { count }
            }
            Ok(Err(err)) => {
                warn!(job_id = %id, error = %err, "scan job failed");
                JobOutcome::failed(err.kind(), err.to_string())
            }
            Err(join_err) => {
                error!(job_id = %id, error = %join_err, "scan job aborted");
                JobOutcome::failed(
                    JobErrorKind::Internal,
                    format!("scan job aborted: {join_err}"),
                )
            }
        };

        match self.tracker.finish(id, outcome.clone()).await {
            Ok(true) => Some(outcome),
            Ok(false) => self.tracker.status(id).await.ok().and_then(|s| s.result),
            Err(e) => {
                warn!(job_id = %id, error = %e, "job vanished before its outcome was recorded");
                None
            }
        }
    }

    async fn run(&self, target: &str) -> Result<usize, JobError> {
        let raw = tokio::time::timeout(self.scan_timeout, self.scanner.scan(target))
            .await
            .map_err(|_| JobError::Timeout(self.scan_timeout))??;
        let findings = parse_scan_output(&raw, target)?;
        debug!(scan_target = target, count = findings.len(), "parsed scan output");
        Ok(self.findings.insert_many(findings).await?)
    }
}

/// Spawn the pool that drains `receiver`, running at most `concurrency` jobs at
/// once. On `shutdown` it stops taking new jobs and waits for running ones.
pub fn spawn_worker_pool(
    worker: ScanWorker,
    mut receiver: JobReceiver,
    concurrency: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    tokio::spawn(async move {
        info!(concurrency, "scan worker pool started");
        let mut running = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(err) => {
                        error!(error = %err, "worker pool semaphore closed");
                        break;
                    }
                },
            };

            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = receiver.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let worker = worker.clone();
            running.spawn(async move {
                let _permit = permit;
                worker.execute(job).await;
            });

            while let Some(res) = running.try_join_next() {
                if let Err(e) = res {
                    error!(error = %e, "worker task ended abnormally");
                }
            }
        }

        let in_flight = running.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for running scan jobs");
        }
        while running.join_next().await.is_some() {}
        info!("scan worker pool stopped");
    })
}
